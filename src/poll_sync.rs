//! Handshake between the hardware polling thread and socket reclaimers.
//!
//! The polling thread holds the poll lock while it drains the receive ring
//! and walks the hash index without taking any other lock. A thread that
//! wants to unlink and reuse a socket record takes a ticket from the
//! request counter and waits until either nobody is polling or a poll
//! iteration has completed after the ticket was issued.
//!
//! Valid for exactly one polling thread: the acknowledgment counter is
//! advanced by whoever holds the poll lock, and a second concurrent poller
//! would need its own acknowledgment.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::sync::SPINS_BEFORE_YIELD;

#[derive(Debug, Default)]
pub struct PollSync {
	/// Non-zero while a poll iteration is in progress.
	lock: AtomicU32,
	/// Bumped once by every reclaimer.
	reclaim_req: AtomicU32,
	/// Copied from `reclaim_req` at the end of each poll iteration.
	reclaim_ack: AtomicU32,
}

/// Held by the polling thread for one receive pass.
///
/// Dropping the guard acknowledges every outstanding reclaim request and
/// releases the poll lock.
#[must_use = "dropping the guard ends the poll iteration"]
pub struct PollGuard<'a> {
	sync: &'a PollSync,
}

impl PollSync {
	pub const fn new() -> Self {
		Self {
			lock: AtomicU32::new(0),
			reclaim_req: AtomicU32::new(0),
			reclaim_ack: AtomicU32::new(0),
		}
	}

	/// Starts a poll iteration if no other thread is polling.
	pub fn try_poll(&self) -> Option<PollGuard<'_>> {
		self.lock
			.compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
			.ok()
			.map(|_| PollGuard { sync: self })
	}

	/// Starts a poll iteration, spinning and then yielding until the lock
	/// is free.
	pub fn poll(&self) -> PollGuard<'_> {
		let mut spins = 0u32;
		loop {
			if let Some(guard) = self.try_poll() {
				return guard;
			}
			if spins < SPINS_BEFORE_YIELD {
				spins += 1;
				std::hint::spin_loop();
			} else {
				std::thread::yield_now();
			}
		}
	}

	#[inline]
	pub fn is_polling(&self) -> bool {
		self.lock.load(Ordering::SeqCst) != 0
	}

	pub fn reclaim_request(&self) -> u32 {
		self.reclaim_req.load(Ordering::SeqCst)
	}

	pub fn reclaim_ack(&self) -> u32 {
		self.reclaim_ack.load(Ordering::SeqCst)
	}

	/// Waits until no poll iteration can still observe a record that was
	/// unlinked before this call. Returns the ticket that was issued.
	///
	/// Must not be called by the thread holding the poll lock.
	pub fn reclaim_sync(&self) -> u32 {
		let ticket = self.take_ticket();

		let mut spins = 0u64;
		while !self.reclaim_done(ticket) {
			spins += 1;
			std::thread::yield_now();
		}
		tracing::trace!(ticket, spins, "reclaim sync complete");
		ticket
	}

	/// Whether the wait for `ticket` may end.
	#[inline]
	fn reclaim_done(&self, ticket: u32) -> bool {
		!self.is_polling() || seq_after(self.reclaim_ack(), ticket)
	}

	/// Increments the request counter exactly once, returning the value
	/// before the increment.
	fn take_ticket(&self) -> u32 {
		let mut req = self.reclaim_req.load(Ordering::SeqCst);
		loop {
			match self.reclaim_req.compare_exchange_weak(
				req,
				req.wrapping_add(1),
				Ordering::SeqCst,
				Ordering::SeqCst,
			) {
				Ok(_) => return req,
				Err(current) => req = current,
			}
		}
	}

	fn acknowledge(&self) {
		let req = self.reclaim_req.load(Ordering::SeqCst);
		self.reclaim_ack.store(req, Ordering::SeqCst);
	}
}

impl PollGuard<'_> {
	/// Marks the end of one receive pass while keeping the poll lock.
	pub fn ack(&self) {
		self.sync.acknowledge();
	}
}

impl Drop for PollGuard<'_> {
	fn drop(&mut self) {
		self.sync.acknowledge();
		self.sync.lock.store(0, Ordering::SeqCst);
	}
}

/// `a` is strictly after `b` in wrapping sequence space.
#[inline]
fn seq_after(a: u32, b: u32) -> bool {
	(a.wrapping_sub(b) as i32) > 0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seq_after_handles_wraparound() {
		assert!(seq_after(1, 0));
		assert!(!seq_after(0, 0));
		assert!(!seq_after(0, 1));
		assert!(seq_after(0, u32::MAX));
		assert!(seq_after(5, u32::MAX - 5));
		assert!(!seq_after(u32::MAX - 5, 5));
	}

	#[test]
	fn ticket_is_pre_increment_value() {
		let sync = PollSync::new();
		assert_eq!(sync.take_ticket(), 0);
		assert_eq!(sync.take_ticket(), 1);
		assert_eq!(sync.reclaim_request(), 2);
	}

	#[test]
	fn ticket_counter_wraps() {
		let sync = PollSync::new();
		sync.reclaim_req.store(u32::MAX, Ordering::SeqCst);
		sync.reclaim_ack.store(u32::MAX, Ordering::SeqCst);

		let guard = sync.poll();
		let ticket = sync.take_ticket();
		assert_eq!(ticket, u32::MAX);
		assert_eq!(sync.reclaim_request(), 0);
		assert!(!sync.reclaim_done(ticket));

		guard.ack();
		assert_eq!(sync.reclaim_ack(), 0);
		assert!(sync.reclaim_done(ticket));
	}

	#[test]
	fn reclaim_without_poller_returns_immediately() {
		let sync = PollSync::new();
		assert_eq!(sync.reclaim_sync(), 0);
		assert_eq!(sync.reclaim_sync(), 1);
		assert_eq!(sync.reclaim_ack(), 0);
	}
}
