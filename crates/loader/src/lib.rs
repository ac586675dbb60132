//! Keyed async resource loading.
//!
//! A [`LoadRegistry`] deduplicates in-flight loads by key and hands results
//! back through a non-blocking polling contract:
//! * [`LoadRegistry::request`] never awaits; it returns an [`Outcome`] that is
//!   either the loaded value, a [`Suspender`] to wait on, or the stored failure
//! * resolved values are consumed by the first observer; failures are replayed
//!   until [`LoadRegistry::clear`] dismisses them
//! * [`LoaderSet`] runs one loader or an ordered set of named loaders, either
//!   interleaved ([`Mode::Parallel`]) or one after another ([`Mode::Serial`])
//! * [`Loadable`] layers delay and timeout phases on top for loading indicators

pub mod config;
pub mod error;
pub mod failure;
pub mod key;
pub mod loader;
pub mod mode;
pub mod progress;
pub mod registry;
mod spawn;
pub mod suspender;

pub use config::{ConfigError, LoadConfig};
pub use error::{LoadError, Result};
pub use failure::{FailureKind, LoaderFailure, RemoteError, TimeoutFailure};
pub use key::LoadKey;
pub use loader::{Export, Loaded, LoaderSet, NamedLoaders};
pub use mode::Mode;
pub use progress::{Loadable, View};
pub use registry::{LoadRegistry, OperationRecord, OperationState, Outcome};
pub use suspender::Suspender;
