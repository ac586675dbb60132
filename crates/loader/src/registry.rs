//! Keyed registry of load operations.
//!
//! One operation exists per live key. Requests for a key that is already
//! pending share the in-flight computation; settlement updates the stored
//! operation in place from the task that ran it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{LoadError, Result};
use crate::failure::LoaderFailure;
use crate::key::LoadKey;
use crate::loader::{Loaded, LoaderSet};
use crate::mode::Mode;
use crate::spawn::{current_handle, join_error_panic_message, spawn_on};
use crate::suspender::{GenerationClock, Suspender};

/// Observation of an operation returned by [`LoadRegistry::request`].
#[derive(Debug)]
pub enum Outcome<T> {
	/// The operation resolved; its entry has been removed.
	Ready(T),
	/// The operation is still running; wait on the handle and request again.
	Pending(Suspender),
	/// The operation failed; the failure stays stored until cleared.
	Failed(LoaderFailure),
}

impl<T> Outcome<T> {
	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready(_))
	}

	pub fn is_pending(&self) -> bool {
		matches!(self, Self::Pending(_))
	}

	pub fn ready(self) -> Option<T> {
		match self {
			Self::Ready(value) => Some(value),
			_ => None,
		}
	}

	pub fn suspender(&self) -> Option<&Suspender> {
		match self {
			Self::Pending(suspender) => Some(suspender),
			_ => None,
		}
	}

	pub fn failure(&self) -> Option<&LoaderFailure> {
		match self {
			Self::Failed(failure) => Some(failure),
			_ => None,
		}
	}
}

/// Lifecycle state of a stored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
	Pending,
	Resolved,
	Errored,
}

impl OperationState {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Resolved => "resolved",
			Self::Errored => "errored",
		}
	}
}

/// Snapshot of one stored operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
	pub key: LoadKey,
	pub state: OperationState,
	pub generation: u64,
}

enum Slot<T> {
	Pending,
	Resolved(Loaded<T>),
	Errored(LoaderFailure),
}

struct Operation<T> {
	suspender: Suspender,
	slot: Slot<T>,
}

impl<T> Operation<T> {
	fn state(&self) -> OperationState {
		match self.slot {
			Slot::Pending => OperationState::Pending,
			Slot::Resolved(_) => OperationState::Resolved,
			Slot::Errored(_) => OperationState::Errored,
		}
	}

	fn into_outcome(self) -> Outcome<Loaded<T>> {
		match self.slot {
			Slot::Pending => Outcome::Pending(self.suspender),
			Slot::Resolved(value) => Outcome::Ready(value),
			Slot::Errored(failure) => Outcome::Failed(failure),
		}
	}
}

struct RegistryInner<T> {
	operations: Mutex<HashMap<LoadKey, Operation<T>>>,
	generations: GenerationClock,
}

/// Registry of keyed load operations.
///
/// Construct one per session and share it; clones refer to the same
/// operations. Requests must be issued from within a tokio runtime, which
/// drives the loaders.
pub struct LoadRegistry<T> {
	inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for LoadRegistry<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Default for LoadRegistry<T> {
	fn default() -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				operations: Mutex::new(HashMap::new()),
				generations: GenerationClock::default(),
			}),
		}
	}
}

impl<T> std::fmt::Debug for LoadRegistry<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LoadRegistry").field("operations", &self.len()).finish()
	}
}

impl<T> LoadRegistry<T> {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Removes the operation stored under `id`, whatever its state.
	///
	/// A pending computation keeps running; its settlement is discarded.
	/// Returns whether an entry existed.
	pub fn clear(&self, id: &str) -> bool {
		let removed = self.inner.operations.lock().remove(id);
		if let Some(op) = &removed {
			tracing::debug!(key = id, generation = op.suspender.generation(), state = op.state().as_str(), "loader.clear");
		}
		removed.is_some()
	}

	/// Returns the state of the operation stored under `id`.
	pub fn state(&self, id: &str) -> Option<OperationState> {
		self.inner.operations.lock().get(id).map(Operation::state)
	}

	pub fn len(&self) -> usize {
		self.inner.operations.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns snapshots sorted by key.
	pub fn snapshots(&self) -> Vec<OperationRecord> {
		let guard = self.inner.operations.lock();
		let mut records: Vec<_> = guard
			.iter()
			.map(|(key, op)| OperationRecord {
				key: key.clone(),
				state: op.state(),
				generation: op.suspender.generation(),
			})
			.collect();
		drop(guard);
		records.sort_by(|a, b| a.key.cmp(&b.key));
		records
	}
}

impl<T> LoadRegistry<T>
where
	T: Send + 'static,
{
	/// Observes or starts the operation for `id`.
	///
	/// Never waits. A pending operation yields the same [`Suspender`] to every
	/// caller; a resolved one is handed to the first caller and removed; an
	/// errored one is replayed until [`Self::clear`]. Without an entry the
	/// loaders are started on the current runtime and `Pending` is returned.
	pub fn request<A>(&self, id: &str, loaders: &LoaderSet<A, T>, args: A, mode: Mode) -> Result<Outcome<Loaded<T>>>
	where
		A: Clone + Send + 'static,
	{
		let key = LoadKey::new(id)?;
		self.request_key(&key, loaders, args, mode)
	}

	/// [`Self::request`] with a prevalidated key.
	pub fn request_key<A>(&self, key: &LoadKey, loaders: &LoaderSet<A, T>, args: A, mode: Mode) -> Result<Outcome<Loaded<T>>>
	where
		A: Clone + Send + 'static,
	{
		loaders.validate()?;

		let mut operations = self.inner.operations.lock();
		if let Entry::Occupied(entry) = operations.entry(key.clone()) {
			let op = entry.get();
			match &op.slot {
				Slot::Pending => return Ok(Outcome::Pending(op.suspender.clone())),
				Slot::Errored(failure) => return Ok(Outcome::Failed(failure.clone())),
				Slot::Resolved(_) => {}
			}
			let op = entry.remove();
			tracing::debug!(key = %key, generation = op.suspender.generation(), "loader.consume");
			return Ok(op.into_outcome());
		}

		let handle = current_handle()?;
		let suspender = Suspender::new(self.inner.generations.next());
		operations.insert(
			key.clone(),
			Operation {
				suspender: suspender.clone(),
				slot: Slot::Pending,
			},
		);
		drop(operations);

		tracing::debug!(
			key = %key,
			generation = suspender.generation(),
			loaders = loaders.len(),
			mode = mode.as_str(),
			"loader.start"
		);

		let guard = SettleGuard {
			registry: self.clone(),
			key: key.clone(),
			suspender: suspender.clone(),
			settled: false,
		};
		let computation = spawn_on(&handle, "loader.compute", loaders.run(args, mode));
		spawn_on(&handle, "loader.settle", settle_when_done(guard, computation));

		Ok(Outcome::Pending(suspender))
	}

	/// Requests `id` until it resolves or fails, waiting on each suspension.
	pub async fn resolve<A>(&self, id: &str, loaders: &LoaderSet<A, T>, args: A, mode: Mode) -> Result<Loaded<T>>
	where
		A: Clone + Send + 'static,
	{
		let key = LoadKey::new(id)?;
		loop {
			match self.request_key(&key, loaders, args.clone(), mode)? {
				Outcome::Ready(value) => return Ok(value),
				Outcome::Failed(failure) => return Err(LoadError::Failed(failure)),
				Outcome::Pending(suspender) => suspender.settled().await,
			}
		}
	}
}

impl<T> LoadRegistry<T> {
	fn settle(&self, key: &LoadKey, suspender: &Suspender, slot: Slot<T>) {
		let mut operations = self.inner.operations.lock();
		match operations.get_mut(key) {
			Some(op) if op.suspender.same_operation(suspender) => {
				op.slot = slot;
				tracing::debug!(key = %key, generation = suspender.generation(), state = op.state().as_str(), "loader.settle");
			}
			_ => {
				tracing::debug!(key = %key, generation = suspender.generation(), "loader.settle discarded; operation was cleared");
			}
		}
	}
}

/// Settles one operation and wakes its waiters.
///
/// Dropped without [`SettleGuard::finish`] (runtime shutdown before the load
/// completed), the operation is stored as errored so later requests do not
/// wait on a load that will never settle.
struct SettleGuard<T> {
	registry: LoadRegistry<T>,
	key: LoadKey,
	suspender: Suspender,
	settled: bool,
}

impl<T> SettleGuard<T> {
	fn finish(mut self, slot: Slot<T>) {
		self.registry.settle(&self.key, &self.suspender, slot);
		self.settled = true;
	}
}

impl<T> Drop for SettleGuard<T> {
	fn drop(&mut self) {
		if !self.settled {
			tracing::warn!(key = %self.key, generation = self.suspender.generation(), "loader abandoned before settling");
			let failure = LoaderFailure::new(anyhow::anyhow!("load of `{}` abandoned before it settled", self.key));
			self.registry.settle(&self.key, &self.suspender, Slot::Errored(failure));
		}
		self.suspender.release();
	}
}

async fn settle_when_done<T>(guard: SettleGuard<T>, computation: JoinHandle<Result<Loaded<T>, LoaderFailure>>)
where
	T: Send + 'static,
{
	let slot = match computation.await {
		Ok(Ok(value)) => Slot::Resolved(value),
		Ok(Err(failure)) => Slot::Errored(failure),
		Err(err) => {
			let message = join_error_panic_message(err);
			tracing::warn!(key = %guard.key, generation = guard.suspender.generation(), panic = ?message, "loader panicked");
			Slot::Errored(LoaderFailure::panicked(None, message))
		}
	};
	guard.finish(slot);
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use tokio::sync::oneshot;

	use super::*;

	fn counting(calls: &Arc<AtomicUsize>, value: u32) -> LoaderSet<(), u32> {
		let calls = Arc::clone(calls);
		LoaderSet::single(move |()| {
			calls.fetch_add(1, Ordering::SeqCst);
			async move { Ok(value) }
		})
	}

	#[tokio::test]
	async fn pending_requests_share_one_operation() {
		let registry = LoadRegistry::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let loaders = counting(&calls, 5);

		let first = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		let second = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		let (Some(a), Some(b)) = (first.suspender(), second.suspender()) else {
			panic!("both requests should be pending");
		};
		assert!(a.same_operation(b));

		a.settled().await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(registry.state("k"), Some(OperationState::Resolved));
	}

	#[tokio::test]
	async fn resolved_results_are_consumed_once() {
		let registry = LoadRegistry::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let loaders = counting(&calls, 5);

		let outcome = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		outcome.suspender().unwrap().settled().await;

		let ready = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		assert_eq!(ready.ready(), Some(Loaded::Single(5)));
		assert!(registry.is_empty());

		let fresh = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		assert!(fresh.is_pending());
		fresh.suspender().unwrap().settled().await;
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn settlement_after_clear_is_discarded() {
		let registry: LoadRegistry<u32> = LoadRegistry::new();
		let (tx, rx) = oneshot::channel::<u32>();
		let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));
		let loaders = LoaderSet::single(move |()| {
			let rx = rx.lock().take();
			async move { anyhow::Ok(rx.expect("loader runs once").await?) }
		});

		let outcome = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		let suspender = outcome.suspender().unwrap().clone();
		assert!(registry.clear("k"));
		assert!(!registry.clear("k"));

		tx.send(9).unwrap();
		tokio::time::timeout(Duration::from_secs(1), suspender.settled()).await.unwrap();
		assert_eq!(registry.state("k"), None);
	}

	#[tokio::test]
	async fn stale_settlement_leaves_replacement_alone() {
		let registry: LoadRegistry<u32> = LoadRegistry::new();
		let (old_tx, old_rx) = oneshot::channel::<u32>();
		let (new_tx, new_rx) = oneshot::channel::<u32>();
		let receivers = Arc::new(parking_lot::Mutex::new(vec![new_rx, old_rx]));
		let loaders = LoaderSet::single(move |()| {
			let rx = receivers.lock().pop();
			async move { anyhow::Ok(rx.expect("loader runs twice").await?) }
		});

		let old = registry.request("k", &loaders, (), Mode::Parallel).unwrap().suspender().cloned().unwrap();
		assert!(registry.clear("k"));
		let new = registry.request("k", &loaders, (), Mode::Parallel).unwrap().suspender().cloned().unwrap();
		assert!(!old.same_operation(&new));

		old_tx.send(0).unwrap();
		tokio::time::timeout(Duration::from_secs(1), old.settled()).await.unwrap();
		assert_eq!(registry.state("k"), Some(OperationState::Pending));
		assert!(!new.is_settled());

		new_tx.send(1).unwrap();
		tokio::time::timeout(Duration::from_secs(1), new.settled()).await.unwrap();
		let outcome = registry.request("k", &loaders, (), Mode::Parallel).unwrap();
		assert_eq!(outcome.ready(), Some(Loaded::Single(1)));
	}

	#[test]
	fn runtime_shutdown_settles_pending_operations() {
		let registry: LoadRegistry<u32> = LoadRegistry::new();
		let loaders = LoaderSet::single(|()| std::future::pending::<anyhow::Result<u32>>());
		let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

		let outcome = runtime.block_on(async { registry.request("k", &loaders, (), Mode::Parallel) }).unwrap();
		let suspender = outcome.suspender().cloned().unwrap();
		assert!(!suspender.is_settled());

		drop(runtime);
		assert!(suspender.is_settled());
		assert_eq!(registry.state("k"), Some(OperationState::Errored));

		let other = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
		let err = other.block_on(registry.resolve("k", &loaders, (), Mode::Parallel)).unwrap_err();
		assert!(err.to_string().contains("abandoned"), "got {err}");
	}

	#[tokio::test]
	async fn panicking_loader_is_stored_as_failure() {
		let registry: LoadRegistry<u32> = LoadRegistry::new();
		let loaders = LoaderSet::<(), u32>::ready(|()| -> anyhow::Result<u32> { panic!("loader blew up") });

		let err = registry.resolve("k", &loaders, (), Mode::Parallel).await.unwrap_err();
		let LoadError::Failed(failure) = err else {
			panic!("expected a loader failure, got {err:?}");
		};
		assert_eq!(failure.kind(), crate::FailureKind::Panicked);
		assert!(failure.to_string().contains("loader blew up"));
		assert_eq!(registry.state("k"), Some(OperationState::Errored));
	}

	#[test]
	fn request_outside_runtime_registers_nothing() {
		let registry: LoadRegistry<u32> = LoadRegistry::new();
		let loaders = LoaderSet::<(), u32>::ready(|()| Ok(1u32));
		let err = registry.request("k", &loaders, (), Mode::Parallel).unwrap_err();
		assert!(matches!(err, LoadError::NoRuntime));
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn snapshots_are_sorted_by_key() {
		let registry: LoadRegistry<u32> = LoadRegistry::new();
		let loaders = LoaderSet::single(|()| std::future::pending::<anyhow::Result<u32>>());
		for id in ["b", "a", "c"] {
			registry.request(id, &loaders, (), Mode::Parallel).unwrap();
		}
		let keys: Vec<_> = registry.snapshots().into_iter().map(|r| r.key.to_string()).collect();
		assert_eq!(keys, ["a", "b", "c"]);
		assert!(registry.snapshots().iter().all(|r| r.state == OperationState::Pending));
	}
}
