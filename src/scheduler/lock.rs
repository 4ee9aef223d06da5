//! Per-worker locking, with a zero-cost shim under the `single-thread`
//! feature.
//!
//! Mirrors the reference scheduler's own `#if defined(SINGLE_THREAD))`
//! stub `proc_lock`/`proc_unlock` pair: the locking surface stays the
//! same either way, only what's behind it changes.

use crate::panic_nounwind;

#[cfg(not(feature = "single-thread"))]
mod imp {
	use std::sync::{Condvar, Mutex, MutexGuard};

	use super::panic_nounwind;

	pub(crate) struct Lock<T> {
		mutex: Mutex<T>,
		condvar: Condvar
	}

	impl<T> Lock<T> {
		pub(crate) fn new(value: T) -> Self {
			Self { mutex: Mutex::new(value), condvar: Condvar::new() }
		}

		pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
			self.mutex
				.lock()
				.unwrap_or_else(|_| panic_nounwind!("worker lock poisoned by a panicking fiber"))
		}

		pub(crate) fn wait<'a>(&'a self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
			self.condvar
				.wait(guard)
				.unwrap_or_else(|_| panic_nounwind!("worker lock poisoned by a panicking fiber"))
		}

		pub(crate) fn notify(&self) {
			self.condvar.notify_one();
		}
	}
}

#[cfg(feature = "single-thread")]
mod imp {
	use std::cell::UnsafeCell;

	use super::panic_nounwind;

	pub(crate) struct Lock<T> {
		value: UnsafeCell<T>
	}

	/* Safety: the single-thread build runs exactly one worker on exactly
	 * one thread; nothing else ever touches this cell */
	unsafe impl<T> Sync for Lock<T> {}

	impl<T> Lock<T> {
		pub(crate) fn new(value: T) -> Self {
			Self { value: UnsafeCell::new(value) }
		}

		pub(crate) fn lock(&self) -> &mut T {
			/* Safety: single worker thread, never re-entrant */
			unsafe { &mut *self.value.get() }
		}

		pub(crate) fn wait<'a>(&'a self, _guard: &'a mut T) -> &'a mut T {
			panic_nounwind!(
				"single-thread build: worker ready queue is empty and there is no other \
				 thread that could wake it; this is a deadlock, not a missing lock"
			)
		}

		pub(crate) fn notify(&self) {}
	}
}

pub(crate) use imp::Lock;
