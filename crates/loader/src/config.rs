//! Loader configuration loaded from TOML.
//!
//! ```toml
//! mode = "serial"
//! delay_ms = 200
//! timeout_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::mode::Mode;

/// Delay before a loading indicator is worth showing.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),
}

/// How a [`Loadable`](crate::Loadable) runs its loaders and reports progress.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
	/// Execution strategy for named loader sets.
	pub mode: Mode,
	/// Time before the loading view reports `past_delay`.
	#[serde(rename = "delay_ms", deserialize_with = "millis")]
	pub delay: Duration,
	/// Caller-side deadline; `None` or `0` disables it.
	#[serde(rename = "timeout_ms", deserialize_with = "optional_millis")]
	pub timeout: Option<Duration>,
}

impl Default for LoadConfig {
	fn default() -> Self {
		Self {
			mode: Mode::Parallel,
			delay: DEFAULT_DELAY,
			timeout: None,
		}
	}
}

impl LoadConfig {
	/// Parses configuration from a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(input)?)
	}

	/// Reads and parses a configuration file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	/// Sets the execution strategy.
	pub fn with_mode(mut self, mode: Mode) -> Self {
		self.mode = mode;
		self
	}

	/// Sets the delay before `past_delay` turns true.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}

	/// Sets the deadline; a zero duration disables it.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = (!timeout.is_zero()).then_some(timeout);
		self
	}
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
	D: Deserializer<'de>,
{
	let ms = Option::<u64>::deserialize(deserializer)?;
	Ok(ms.filter(|ms| *ms > 0).map(Duration::from_millis))
}
