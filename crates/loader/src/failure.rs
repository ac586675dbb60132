//! Stored loader failures and their classification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::key::LoadKey;

/// Remote API error code reported for missing resources.
pub const NOT_FOUND_CODE: &str = "HTTP_NOT_FOUND_EXCEPTION";

/// Coarse classification of a [`LoaderFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
	/// The remote resource does not exist.
	NotFound,
	/// The loader panicked instead of returning an error.
	Panicked,
	/// Any other failure.
	Other,
}

/// Error a loader returns for a failed remote API call.
///
/// Carries the transport status and the API error code when the server sent
/// one, so failures can be classified without inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
	pub status: Option<u16>,
	pub code: Option<String>,
	pub message: String,
}

impl RemoteError {
	/// Error with a transport status.
	pub fn status(status: u16, message: impl Into<String>) -> Self {
		Self {
			status: Some(status),
			code: None,
			message: message.into(),
		}
	}

	/// Error with an API error code.
	pub fn code(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			status: None,
			code: Some(code.into()),
			message: message.into(),
		}
	}

	/// Status 404 or the not-found error code.
	pub fn is_not_found(&self) -> bool {
		self.status == Some(404) || self.code.as_deref() == Some(NOT_FOUND_CODE)
	}
}

struct FailureInner {
	loader: Option<String>,
	error: anyhow::Error,
	panicked: bool,
}

/// A loader failure stored on an errored operation.
///
/// Cloning shares the same underlying error, so every observer of an errored
/// operation sees the identical failure until it is cleared.
#[derive(Clone)]
pub struct LoaderFailure {
	inner: Arc<FailureInner>,
}

impl LoaderFailure {
	/// Wraps an error from an unnamed loader.
	pub fn new(error: impl Into<anyhow::Error>) -> Self {
		Self::build(None, error.into(), false)
	}

	/// Wraps an error from the named loader `name`.
	pub fn named(name: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
		Self::build(Some(name.into()), error.into(), false)
	}

	/// A loader that panicked, optionally within a named set.
	pub(crate) fn panicked(loader: Option<String>, message: Option<String>) -> Self {
		let error = match message {
			Some(msg) => anyhow::anyhow!("loader panicked: {msg}"),
			None => anyhow::anyhow!("loader panicked"),
		};
		Self::build(loader, error, true)
	}

	fn build(loader: Option<String>, error: anyhow::Error, panicked: bool) -> Self {
		Self {
			inner: Arc::new(FailureInner { loader, error, panicked }),
		}
	}

	/// Name of the failing loader within a named set.
	pub fn loader(&self) -> Option<&str> {
		self.inner.loader.as_deref()
	}

	/// The error the loader failed with, verbatim.
	pub fn error(&self) -> &anyhow::Error {
		&self.inner.error
	}

	/// Looks for an error of type `E` anywhere in the failure's cause chain.
	pub fn find<E>(&self) -> Option<&E>
	where
		E: std::error::Error + 'static,
	{
		self.inner.error.chain().find_map(|cause| cause.downcast_ref::<E>())
	}

	/// Classifies the failure without inspecting its message.
	pub fn kind(&self) -> FailureKind {
		if self.inner.panicked {
			return FailureKind::Panicked;
		}
		if self.find::<RemoteError>().is_some_and(RemoteError::is_not_found) {
			return FailureKind::NotFound;
		}
		FailureKind::Other
	}

	/// Shorthand for `kind() == FailureKind::NotFound`.
	pub fn is_not_found(&self) -> bool {
		self.kind() == FailureKind::NotFound
	}

	/// Returns true when both handles refer to the same stored failure.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl fmt::Debug for LoaderFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoaderFailure")
			.field("loader", &self.inner.loader)
			.field("error", &self.inner.error)
			.field("panicked", &self.inner.panicked)
			.finish()
	}
}

impl fmt::Display for LoaderFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.inner.loader {
			Some(name) => write!(f, "loader `{name}` failed: {}", self.inner.error),
			None => write!(f, "{}", self.inner.error),
		}
	}
}

impl std::error::Error for LoaderFailure {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		self.inner.error.chain().nth(1)
	}
}

/// A caller-side deadline expired while the operation was still pending.
///
/// The underlying computation keeps running and settles in the registry
/// regardless.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("load `{key}` timed out after {after:?}")]
pub struct TimeoutFailure {
	pub key: LoadKey,
	pub after: Duration,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_404_is_not_found() {
		let failure = LoaderFailure::named("page", RemoteError::status(404, "no such story"));
		assert_eq!(failure.kind(), FailureKind::NotFound);
		assert_eq!(failure.loader(), Some("page"));
		assert_eq!(failure.to_string(), "loader `page` failed: no such story");
	}

	#[test]
	fn api_code_is_not_found() {
		let failure = LoaderFailure::new(RemoteError::code(NOT_FOUND_CODE, "gone"));
		assert!(failure.is_not_found());
	}

	#[test]
	fn not_found_is_detected_through_context() {
		let error = anyhow::Error::new(RemoteError::status(404, "missing")).context("fetching user:42");
		let failure = LoaderFailure::new(error);
		assert!(failure.is_not_found());
		assert_eq!(failure.find::<RemoteError>().and_then(|e| e.status), Some(404));
	}

	#[test]
	fn other_failures_are_other() {
		assert_eq!(LoaderFailure::new(RemoteError::status(500, "boom")).kind(), FailureKind::Other);
		assert_eq!(LoaderFailure::new(anyhow::anyhow!("plain")).kind(), FailureKind::Other);
		assert_eq!(LoaderFailure::panicked(None, Some("oops".into())).kind(), FailureKind::Panicked);
	}

	#[test]
	fn clones_share_the_stored_error() {
		let failure = LoaderFailure::new(anyhow::anyhow!("boom"));
		let replay = failure.clone();
		assert!(failure.ptr_eq(&replay));
		assert!(!failure.ptr_eq(&LoaderFailure::new(anyhow::anyhow!("boom"))));
	}
}
