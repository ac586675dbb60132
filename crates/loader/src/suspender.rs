use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// Monotonic generation clock for load operations.
#[derive(Debug, Default)]
pub(crate) struct GenerationClock {
	next: AtomicU64,
}

impl GenerationClock {
	/// Returns the next generation ID, starting at 1.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

#[derive(Debug)]
struct SettleSignal {
	generation: u64,
	settled: AtomicBool,
	done: Notify,
}

/// Handle to a pending load operation.
///
/// Every request that finds the operation pending receives a clone of the
/// same handle. Await [`Suspender::settled`] and request again to observe the
/// outcome.
#[derive(Debug, Clone)]
pub struct Suspender {
	inner: Arc<SettleSignal>,
}

impl Suspender {
	pub(crate) fn new(generation: u64) -> Self {
		Self {
			inner: Arc::new(SettleSignal {
				generation,
				settled: AtomicBool::new(false),
				done: Notify::new(),
			}),
		}
	}

	/// Generation of the operation this handle belongs to.
	pub fn generation(&self) -> u64 {
		self.inner.generation
	}

	/// Returns true once the operation has settled.
	pub fn is_settled(&self) -> bool {
		self.inner.settled.load(Ordering::Acquire)
	}

	/// Returns true when both handles belong to the same operation.
	pub fn same_operation(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Completes once the operation has settled, immediately if it already has.
	pub async fn settled(&self) {
		loop {
			// Register before checking the flag so a release between the check
			// and the await is not lost.
			let notified = self.inner.done.notified();
			if self.is_settled() {
				return;
			}
			notified.await;
		}
	}

	pub(crate) fn release(&self) {
		self.inner.settled.store(true, Ordering::Release);
		self.inner.done.notify_waiters();
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn generations_are_monotonic() {
		let clock = GenerationClock::default();
		assert_eq!(clock.next(), 1);
		assert_eq!(clock.next(), 2);
	}

	#[tokio::test]
	async fn waiters_wake_on_release() {
		let suspender = Suspender::new(1);
		let waiter = suspender.clone();
		let task = tokio::spawn(async move { waiter.settled().await });

		tokio::task::yield_now().await;
		assert!(!suspender.is_settled());
		suspender.release();

		tokio::time::timeout(Duration::from_secs(1), task)
			.await
			.expect("waiter should wake")
			.expect("waiter task should not panic");
	}

	#[tokio::test]
	async fn settled_returns_immediately_after_release() {
		let suspender = Suspender::new(7);
		suspender.release();
		tokio::time::timeout(Duration::from_millis(50), suspender.settled())
			.await
			.expect("already settled");
		assert_eq!(suspender.generation(), 7);
	}

	#[test]
	fn identity_is_per_operation() {
		let a = Suspender::new(1);
		assert!(a.same_operation(&a.clone()));
		assert!(!a.same_operation(&Suspender::new(1)));
	}
}
