//! Error type for loader requests.

use thiserror::Error;

use crate::failure::{LoaderFailure, TimeoutFailure};

/// Errors surfaced by [`LoadRegistry`](crate::LoadRegistry) and [`Loadable`](crate::Loadable).
///
/// Contract violations (`InvalidKey`, `InvalidLoader`, `NoRuntime`) are raised
/// before any loader runs. Loader failures only appear here through the
/// awaiting helpers; the polling API reports them as [`Outcome::Failed`](crate::Outcome::Failed).
#[derive(Debug, Clone, Error)]
pub enum LoadError {
	/// The load key was empty or missing.
	#[error("load key must not be empty")]
	InvalidKey,

	/// The loader set cannot be run.
	#[error("invalid loader set: {0}")]
	InvalidLoader(String),

	/// The request was issued outside a tokio runtime.
	#[error("no tokio runtime available to drive the load")]
	NoRuntime,

	/// A loader failed.
	#[error(transparent)]
	Failed(#[from] LoaderFailure),

	/// The caller-side deadline passed before the load settled.
	#[error(transparent)]
	TimedOut(#[from] TimeoutFailure),
}

/// Result alias for loader operations.
pub type Result<T, E = LoadError> = std::result::Result<T, E>;
