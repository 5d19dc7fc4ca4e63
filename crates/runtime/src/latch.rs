//! Set-once completion signal with any number of observers.
//!
//! The first [`Latch::set`] stores the value and wakes every waiter; later
//! calls are no-ops and report `false`. Readiness, disconnect, and session
//! outcomes are all published this way.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot value that many tasks can await without re-triggering it.
pub struct Latch<T> {
	tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Latch<T> {
	fn clone(&self) -> Self {
		Self {
			tx: Arc::clone(&self.tx),
		}
	}
}

impl<T: Clone> Default for Latch<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Clone> Latch<T> {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(None);
		Self { tx: Arc::new(tx) }
	}

	/// Stores `value` unless a value is already present.
	///
	/// Returns true for the caller that won.
	pub fn set(&self, value: T) -> bool {
		self.tx.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(value);
			true
		})
	}

	pub fn is_set(&self) -> bool {
		self.tx.borrow().is_some()
	}

	/// Current value, if set.
	pub fn get(&self) -> Option<T> {
		self.tx.borrow().clone()
	}

	/// Waits until the latch is set and returns its value.
	pub async fn wait(&self) -> T {
		let mut rx = self.tx.subscribe();
		loop {
			if let Some(value) = rx.borrow_and_update().as_ref() {
				return value.clone();
			}
			// The sender lives as long as `self`, so this only fails if it is
			// dropped mid-await, which the borrow rules out.
			if rx.changed().await.is_err() {
				std::future::pending::<()>().await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn first_setter_wins() {
		let latch = Latch::new();
		assert!(latch.set("crash"));
		assert!(!latch.set("clean"));
		assert_eq!(latch.get(), Some("crash"));
	}

	#[tokio::test]
	async fn all_waiters_observe_the_same_value() {
		let latch = Latch::<u32>::new();
		let waiters: Vec<_> = (0..3)
			.map(|_| {
				let latch = latch.clone();
				tokio::spawn(async move { latch.wait().await })
			})
			.collect();

		tokio::time::sleep(Duration::from_millis(10)).await;
		latch.set(7);
		latch.set(8);

		for waiter in waiters {
			assert_eq!(waiter.await.unwrap(), 7);
		}
		assert_eq!(latch.wait().await, 7);
	}
}
