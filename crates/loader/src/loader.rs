//! Loader sets and their normalization into one awaited computation.

use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;

use crate::error::{LoadError, Result};
use crate::failure::LoaderFailure;
use crate::mode::Mode;
use crate::spawn::{current_handle, join_error_panic_message, spawn_on};

type BoxLoader<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// A loader's raw output.
///
/// Lazily loaded modules hand back their value wrapped as a default export;
/// loaders returning a plain value produce [`Export::Value`] through `From`.
/// Both are unwrapped before results are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export<T> {
	Default(T),
	Value(T),
}

impl<T> Export<T> {
	/// Unwraps the exported value.
	pub fn into_inner(self) -> T {
		match self {
			Self::Default(value) | Self::Value(value) => value,
		}
	}
}

impl<T> From<T> for Export<T> {
	fn from(value: T) -> Self {
		Self::Value(value)
	}
}

/// Result of running a [`LoaderSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<T> {
	/// Output of a single loader.
	Single(T),
	/// Outputs of a named set, in the set's insertion order.
	Named(IndexMap<String, T>),
}

impl<T> Loaded<T> {
	/// Output of a single loader, `None` for a named set.
	pub fn into_single(self) -> Option<T> {
		match self {
			Self::Single(value) => Some(value),
			Self::Named(_) => None,
		}
	}

	/// Outputs of a named set in insertion order, `None` for a single loader.
	pub fn into_named(self) -> Option<IndexMap<String, T>> {
		match self {
			Self::Single(_) => None,
			Self::Named(values) => Some(values),
		}
	}

	/// Looks up one named output.
	pub fn get(&self, name: &str) -> Option<&T> {
		match self {
			Self::Single(_) => None,
			Self::Named(values) => values.get(name),
		}
	}
}

fn boxed<A, T, F, Fut, R>(f: F) -> BoxLoader<A, T>
where
	F: Fn(A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
	R: Into<Export<T>> + Send + 'static,
	T: Send + 'static,
{
	Arc::new(move |args| {
		let fut = f(args);
		async move { fut.await.map(|raw| Into::<Export<T>>::into(raw).into_inner()) }.boxed()
	})
}

fn boxed_ready<A, T, F, R>(f: F) -> BoxLoader<A, T>
where
	F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
	R: Into<Export<T>>,
	T: Send + 'static,
{
	Arc::new(move |args| future::ready(f(args).map(|raw| Into::<Export<T>>::into(raw).into_inner())).boxed())
}

enum LoaderKind<A, T> {
	Single(BoxLoader<A, T>),
	Named(IndexMap<String, BoxLoader<A, T>>),
}

impl<A, T> Clone for LoaderKind<A, T> {
	fn clone(&self) -> Self {
		match self {
			Self::Single(loader) => Self::Single(Arc::clone(loader)),
			Self::Named(loaders) => Self::Named(loaders.clone()),
		}
	}
}

/// One loader, or an ordered set of named loaders sharing the same arguments.
pub struct LoaderSet<A, T> {
	kind: LoaderKind<A, T>,
	defect: Option<String>,
}

impl<A, T> Clone for LoaderSet<A, T> {
	fn clone(&self) -> Self {
		Self {
			kind: self.kind.clone(),
			defect: self.defect.clone(),
		}
	}
}

impl<A, T> std::fmt::Debug for LoaderSet<A, T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.kind {
			LoaderKind::Single(_) => f.write_str("LoaderSet::Single"),
			LoaderKind::Named(loaders) => f.debug_tuple("LoaderSet::Named").field(&loaders.keys().collect::<Vec<_>>()).finish(),
		}
	}
}

impl<A, T> LoaderSet<A, T>
where
	A: Clone + Send + 'static,
	T: Send + 'static,
{
	/// A single async loader.
	pub fn single<F, Fut, R>(f: F) -> Self
	where
		F: Fn(A) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
		R: Into<Export<T>> + Send + 'static,
	{
		Self {
			kind: LoaderKind::Single(boxed(f)),
			defect: None,
		}
	}

	/// A single loader that produces its value synchronously.
	pub fn ready<F, R>(f: F) -> Self
	where
		F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
		R: Into<Export<T>>,
	{
		Self {
			kind: LoaderKind::Single(boxed_ready(f)),
			defect: None,
		}
	}

	/// Starts building a named loader set.
	pub fn named() -> NamedLoaders<A, T> {
		NamedLoaders {
			loaders: IndexMap::new(),
			defect: None,
		}
	}

	/// Number of loaders in the set.
	pub fn len(&self) -> usize {
		match &self.kind {
			LoaderKind::Single(_) => 1,
			LoaderKind::Named(loaders) => loaders.len(),
		}
	}

	/// Returns true for a named set without loaders.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Checks that the set can be run.
	pub fn validate(&self) -> Result<()> {
		if let Some(defect) = &self.defect {
			return Err(LoadError::InvalidLoader(defect.clone()));
		}
		if self.is_empty() {
			return Err(LoadError::InvalidLoader("named loader set is empty".into()));
		}
		Ok(())
	}

	/// Builds the computation for this set.
	///
	/// Nothing is invoked until the returned future is first polled.
	pub(crate) fn run(&self, args: A, mode: Mode) -> BoxFuture<'static, Result<Loaded<T>, LoaderFailure>> {
		match &self.kind {
			LoaderKind::Single(loader) => {
				let loader = Arc::clone(loader);
				async move { loader(args).await.map(Loaded::Single).map_err(LoaderFailure::new) }.boxed()
			}
			LoaderKind::Named(loaders) => {
				let calls: Vec<_> = loaders.iter().map(|(name, loader)| (name.clone(), Arc::clone(loader))).collect();
				match mode {
					Mode::Parallel => run_parallel(calls, args).boxed(),
					Mode::Serial => run_serial(calls, args).boxed(),
				}
			}
		}
	}
}

/// Each loader runs as its own task, so a failure only detaches its siblings.
async fn run_parallel<A, T>(calls: Vec<(String, BoxLoader<A, T>)>, args: A) -> Result<Loaded<T>, LoaderFailure>
where
	A: Clone + Send + 'static,
	T: Send + 'static,
{
	let handle = current_handle().map_err(LoaderFailure::new)?;
	let tasks: Vec<_> = calls
		.into_iter()
		.map(|(name, loader)| {
			let args = args.clone();
			let task = spawn_on(&handle, "loader.named", async move { loader(args).await });
			async move {
				match task.await {
					Ok(Ok(value)) => Ok((name, value)),
					Ok(Err(error)) => Err(LoaderFailure::named(name, error)),
					Err(err) => Err(LoaderFailure::panicked(Some(name), join_error_panic_message(err))),
				}
			}
		})
		.collect();
	let values = future::try_join_all(tasks).await?;
	Ok(Loaded::Named(values.into_iter().collect()))
}

async fn run_serial<A, T>(calls: Vec<(String, BoxLoader<A, T>)>, args: A) -> Result<Loaded<T>, LoaderFailure>
where
	A: Clone + Send + 'static,
	T: Send + 'static,
{
	let mut values = IndexMap::with_capacity(calls.len());
	for (name, loader) in calls {
		match loader(args.clone()).await {
			Ok(value) => {
				values.insert(name, value);
			}
			Err(error) => return Err(LoaderFailure::named(name, error)),
		}
	}
	Ok(Loaded::Named(values))
}

/// Builder for a named [`LoaderSet`].
///
/// Names must be non-empty and unique; violations surface as
/// [`LoadError::InvalidLoader`] when the set is validated.
pub struct NamedLoaders<A, T> {
	loaders: IndexMap<String, BoxLoader<A, T>>,
	defect: Option<String>,
}

impl<A, T> NamedLoaders<A, T>
where
	A: Clone + Send + 'static,
	T: Send + 'static,
{
	/// Adds an async loader under `name`.
	pub fn with<F, Fut, R>(self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(A) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
		R: Into<Export<T>> + Send + 'static,
	{
		self.insert(name.into(), boxed(f))
	}

	/// Adds a synchronous loader under `name`.
	pub fn ready<F, R>(self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
		R: Into<Export<T>>,
	{
		self.insert(name.into(), boxed_ready(f))
	}

	fn insert(mut self, name: String, loader: BoxLoader<A, T>) -> Self {
		if self.defect.is_none() {
			if name.is_empty() {
				self.defect = Some("loader name must not be empty".into());
			} else if self.loaders.contains_key(&name) {
				self.defect = Some(format!("duplicate loader name `{name}`"));
			}
		}
		self.loaders.insert(name, loader);
		self
	}

	/// Finishes the set; defects are reported by [`LoaderSet::validate`].
	pub fn build(self) -> LoaderSet<A, T> {
		LoaderSet {
			kind: LoaderKind::Named(self.loaders),
			defect: self.defect,
		}
	}
}

impl<A, T> From<NamedLoaders<A, T>> for LoaderSet<A, T>
where
	A: Clone + Send + 'static,
	T: Send + 'static,
{
	fn from(named: NamedLoaders<A, T>) -> Self {
		named.build()
	}
}
