use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{LoadError, Result};

/// Non-empty identity of a load operation.
///
/// Requests sharing a key share one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadKey(String);

impl LoadKey {
	/// Creates a key, rejecting the empty string.
	pub fn new(id: impl Into<String>) -> Result<Self> {
		let id = id.into();
		if id.is_empty() {
			return Err(LoadError::InvalidKey);
		}
		Ok(Self(id))
	}

	/// Creates a key from an optional id; `None` is rejected like an empty id.
	pub fn from_option(id: Option<&str>) -> Result<Self> {
		id.map_or(Err(LoadError::InvalidKey), Self::new)
	}

	/// Derives a key from structured input.
	///
	/// Strings are used as-is; anything else is serialized to JSON with object
	/// fields sorted, so structurally equal inputs map to the same key
	/// regardless of field order. `null` is rejected.
	pub fn canonical<K>(value: &K) -> Result<Self>
	where
		K: Serialize + ?Sized,
	{
		match serde_json::to_value(value).map_err(|_| LoadError::InvalidKey)? {
			Value::Null => Err(LoadError::InvalidKey),
			Value::String(id) => Self::new(id),
			other => Self::new(other.to_string()),
		}
	}

	/// The key as stored in the registry.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for LoadKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for LoadKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl Borrow<str> for LoadKey {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl TryFrom<&str> for LoadKey {
	type Error = LoadError;

	fn try_from(id: &str) -> Result<Self> {
		Self::new(id)
	}
}

impl TryFrom<String> for LoadKey {
	type Error = LoadError;

	fn try_from(id: String) -> Result<Self> {
		Self::new(id)
	}
}
