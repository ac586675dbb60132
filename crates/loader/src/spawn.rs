use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{LoadError, Result};

/// Handle of the runtime the caller is running on.
///
/// Loads are driven by the caller's runtime; no runtime is created here.
pub(crate) fn current_handle() -> Result<Handle> {
	Handle::try_current().map_err(|_| LoadError::NoRuntime)
}

/// Spawns load work on `handle`.
#[allow(clippy::disallowed_methods)]
pub(crate) fn spawn_on<F>(handle: &Handle, task: &'static str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task, "loader.spawn");
	handle.spawn(fut)
}

/// Extracts the panic payload message from a failed join, if it panicked.
pub(crate) fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return Some((*msg).to_string());
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return Some(msg.clone());
	}
	Some("non-string panic payload".to_string())
}
