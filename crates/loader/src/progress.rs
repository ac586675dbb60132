//! Loading-indicator view over one keyed load.
//!
//! A [`Loadable`] binds a key and loader set to a [`LoadConfig`] and reports
//! what to show while the operation runs: nothing yet, a loading indicator
//! once the delay has passed, the result, the failure, or a timeout.

use tokio::time::{Instant, sleep_until};

use crate::config::LoadConfig;
use crate::error::Result;
use crate::failure::{LoaderFailure, TimeoutFailure};
use crate::key::LoadKey;
use crate::loader::{Loaded, LoaderSet};
use crate::registry::{LoadRegistry, Outcome};
use crate::suspender::Suspender;

/// What a consumer should present for a [`Loadable`].
#[derive(Debug)]
pub enum View<T> {
	/// Still loading. `past_delay` turns true once the configured delay elapsed.
	Loading { past_delay: bool },
	Ready(Loaded<T>),
	Failed(LoaderFailure),
	/// The deadline passed first; the load itself keeps running.
	///
	/// Its result still settles into the registry and stays there until the
	/// caller drops it with [`Loadable::reset`].
	TimedOut(TimeoutFailure),
}

impl<T> View<T> {
	/// Returns true for [`View::Loading`].
	pub fn is_loading(&self) -> bool {
		matches!(self, Self::Loading { .. })
	}
}

/// A keyed load with delay and timeout tracking.
pub struct Loadable<A, T> {
	registry: LoadRegistry<T>,
	key: LoadKey,
	loaders: LoaderSet<A, T>,
	config: LoadConfig,
	started: Option<Instant>,
	pending: Option<Suspender>,
	timed_out: Option<TimeoutFailure>,
}

impl<A, T> Loadable<A, T>
where
	A: Clone + Send + 'static,
	T: Send + 'static,
{
	/// Binds `id` and `loaders` to `registry`, validating both up front.
	pub fn new(registry: LoadRegistry<T>, id: &str, loaders: LoaderSet<A, T>, config: LoadConfig) -> Result<Self> {
		let key = LoadKey::new(id)?;
		loaders.validate()?;
		Ok(Self {
			registry,
			key,
			loaders,
			config,
			started: None,
			pending: None,
			timed_out: None,
		})
	}

	/// Key of the underlying operation.
	pub fn key(&self) -> &LoadKey {
		&self.key
	}

	/// Delay, timeout and mode in effect.
	pub fn config(&self) -> &LoadConfig {
		&self.config
	}

	/// Requests the load and returns the current view without waiting.
	///
	/// The delay and timeout clock starts on the first poll. Once timed out
	/// the view stays [`View::TimedOut`] until [`Self::reset`].
	pub fn poll(&mut self, args: A) -> Result<View<T>> {
		if let Some(failure) = &self.timed_out {
			return Ok(View::TimedOut(failure.clone()));
		}
		let started = *self.started.get_or_insert_with(Instant::now);

		match self.registry.request_key(&self.key, &self.loaders, args, self.config.mode)? {
			Outcome::Ready(value) => {
				self.started = None;
				self.pending = None;
				Ok(View::Ready(value))
			}
			Outcome::Failed(failure) => {
				self.pending = None;
				Ok(View::Failed(failure))
			}
			Outcome::Pending(suspender) => {
				let elapsed = started.elapsed();
				if let Some(timeout) = self.config.timeout
					&& elapsed >= timeout
				{
					let failure = TimeoutFailure {
						key: self.key.clone(),
						after: timeout,
					};
					tracing::warn!(key = %self.key, timeout_ms = timeout.as_millis() as u64, "loader.timeout");
					self.pending = None;
					self.timed_out = Some(failure.clone());
					return Ok(View::TimedOut(failure));
				}
				self.pending = Some(suspender);
				Ok(View::Loading {
					past_delay: elapsed >= self.config.delay,
				})
			}
		}
	}

	/// Waits for the next change of view and returns it.
	///
	/// Changes are settlement of the operation, the delay elapsing, or the
	/// timeout. Views other than `Loading` are returned immediately.
	pub async fn next(&mut self, args: A) -> Result<View<T>> {
		let view = self.poll(args.clone())?;
		let View::Loading { past_delay } = view else {
			return Ok(view);
		};
		let (Some(started), Some(suspender)) = (self.started, self.pending.clone()) else {
			return Ok(view);
		};

		let delay_at = (!past_delay).then(|| started + self.config.delay);
		let timeout_at = self.config.timeout.map(|timeout| started + timeout);
		tokio::select! {
			_ = suspender.settled() => {}
			_ = sleep_until_some(delay_at) => {}
			_ = sleep_until_some(timeout_at) => {}
		}
		self.poll(args)
	}

	/// Drops the stored operation and restarts the clock so the next poll retries.
	pub fn reset(&mut self) {
		self.registry.clear(self.key.as_str());
		self.started = None;
		self.pending = None;
		self.timed_out = None;
	}
}

async fn sleep_until_some(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}
