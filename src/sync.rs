use std::sync::atomic::{AtomicU32, Ordering};

/// Spins before falling back to yielding the processor.
pub(crate) const SPINS_BEFORE_YIELD: u32 = 64;

/// Busy-wait lock over a single word.
///
/// Acquired with compare-and-swap, released with a plain store. Meant for
/// critical sections a few pointer writes long; there is no wakeup, a
/// waiter keeps retrying until the holder stores zero.
#[derive(Debug, Default)]
pub struct SpinLock {
	word: AtomicU32,
}

/// Releases the lock on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
	lock: &'a SpinLock,
}

impl SpinLock {
	pub const fn new() -> Self {
		Self { word: AtomicU32::new(0) }
	}

	pub fn lock(&self) -> SpinGuard<'_> {
		let mut spins = 0u32;
		loop {
			if let Some(guard) = self.try_lock() {
				return guard;
			}
			// wait for the holder before retrying the CAS
			while self.is_locked() {
				if spins < SPINS_BEFORE_YIELD {
					spins += 1;
					std::hint::spin_loop();
				} else {
					std::thread::yield_now();
				}
			}
		}
	}

	pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
		self.word
			.compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
			.ok()
			.map(|_| SpinGuard { lock: self })
	}

	#[inline]
	pub fn is_locked(&self) -> bool {
		self.word.load(Ordering::Relaxed) != 0
	}
}

impl Drop for SpinGuard<'_> {
	fn drop(&mut self) {
		self.lock.word.store(0, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn guard_releases_on_drop() {
		let lock = SpinLock::new();
		{
			let _guard = lock.lock();
			assert!(lock.is_locked());
			assert!(lock.try_lock().is_none());
		}
		assert!(!lock.is_locked());
		assert!(lock.try_lock().is_some());
	}

	#[test]
	fn serializes_writers() {
		struct Shared {
			lock: SpinLock,
			counter: AtomicU32,
		}
		let shared = Arc::new(Shared { lock: SpinLock::new(), counter: AtomicU32::new(0) });

		let handles: Vec<_> = (0..4)
			.map(|_| {
				let shared = Arc::clone(&shared);
				thread::spawn(move || {
					for _ in 0..1000 {
						let _guard = shared.lock.lock();
						// non-atomic read-modify-write, only safe under the lock
						let v = shared.counter.load(Ordering::Relaxed);
						shared.counter.store(v + 1, Ordering::Relaxed);
					}
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(shared.counter.load(Ordering::Relaxed), 4000);
	}
}
