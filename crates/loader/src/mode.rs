use serde::Deserialize;

/// Execution strategy for a named loader set.
///
/// Ignored for single loaders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	/// Start every loader at once and interleave them on one task.
	#[default]
	Parallel,
	/// Run loaders one after another in insertion order; stop at the first failure.
	Serial,
}

impl Mode {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Parallel => "parallel",
			Self::Serial => "serial",
		}
	}
}
