//! Intrusive list of every live socket record.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::registry::SocketTable;
use crate::socket::{NO_FD, SocketSlot};
use crate::sync::SpinLock;

/// Doubly linked list threaded through `list_prev` / `list_next` of the
/// records themselves.
#[derive(Debug)]
pub struct SocketList {
	head: AtomicI32,
	lock: SpinLock,
}

impl Default for SocketList {
	fn default() -> Self {
		Self::new()
	}
}

impl SocketList {
	pub const fn new() -> Self {
		Self {
			head: AtomicI32::new(NO_FD),
			lock: SpinLock::new(),
		}
	}

	pub fn head(&self) -> i32 {
		self.head.load(Ordering::Acquire)
	}

	pub fn is_empty(&self) -> bool {
		self.head() == NO_FD
	}

	/// Links `sock` in at the head.
	pub fn insert(&self, sockets: &SocketTable, sock: &SocketSlot) {
		let fd = sockets.fd_of(sock);
		let _guard = self.lock.lock();

		let old_head = self.head.load(Ordering::Relaxed);
		sock.list_prev.store(NO_FD, Ordering::Relaxed);
		sock.list_next.store(old_head, Ordering::Release);
		if let Some(next) = sockets.get(old_head) {
			next.list_prev.store(fd, Ordering::Release);
		}
		self.head.store(fd, Ordering::Release);
	}

	/// Unlinks `sock`. Does nothing if the record is not at the head and
	/// has no predecessor, i.e. is not on the list.
	pub fn remove(&self, sockets: &SocketTable, sock: &SocketSlot) {
		let fd = sockets.fd_of(sock);
		let _guard = self.lock.lock();

		let prev = sock.list_prev.load(Ordering::Relaxed);
		let next = sock.list_next.load(Ordering::Relaxed);

		match sockets.get(prev) {
			Some(p) => p.list_next.store(next, Ordering::Release),
			None if self.head.load(Ordering::Relaxed) == fd => self.head.store(next, Ordering::Release),
			None => return,
		}
		if let Some(n) = sockets.get(next) {
			n.list_prev.store(prev, Ordering::Release);
		}
		sock.list_prev.store(NO_FD, Ordering::Relaxed);
		sock.list_next.store(NO_FD, Ordering::Relaxed);
	}

	/// Walks the list from the head. Records unlinked concurrently may cut
	/// the walk short.
	pub fn iter<'a>(&self, sockets: &'a SocketTable) -> ListIter<'a> {
		ListIter {
			sockets,
			next: self.head(),
		}
	}

	/// Descriptors currently on the list, in list order.
	pub fn fds(&self, sockets: &SocketTable) -> Vec<i32> {
		let _guard = self.lock.lock();
		self.iter(sockets).map(|sock| sockets.fd_of(sock)).collect()
	}
}

pub struct ListIter<'a> {
	sockets: &'a SocketTable,
	next: i32,
}

impl<'a> Iterator for ListIter<'a> {
	type Item = &'a SocketSlot;

	fn next(&mut self) -> Option<Self::Item> {
		let sock = self.sockets.get(self.next)?;
		self.next = sock.list_next.load(Ordering::Acquire);
		Some(sock)
	}
}
