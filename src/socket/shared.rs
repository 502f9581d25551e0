use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use super::HashLink;

/// Protocol receive and transmit buffers of a bypass socket.
#[derive(Debug)]
pub struct SocketBuffers {
	pub rx: Box<[u8]>,
	pub tx: Box<[u8]>,
}

impl SocketBuffers {
	pub fn new(rx_size: usize, tx_size: usize) -> Self {
		Self {
			rx: vec![0; rx_size].into_boxed_slice(),
			tx: vec![0; tx_size].into_boxed_slice(),
		}
	}
}

/// The one hash index entry of a socket: which descriptor's record is
/// linked, and into which chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
	pub fd: i32,
	pub link: HashLink,
}

/// State shared by every descriptor referring to the same socket.
///
/// Created once per socket and released when the last duplicate closes.
#[derive(Debug, Default)]
pub struct SharedState {
	rx_ready: AtomicBool,
	tx_ready: AtomicBool,
	eof_ready: AtomicBool,
	buffers: Mutex<Option<SocketBuffers>>,
	/// Taken after the record lock, never before it.
	hash_entry: Mutex<Option<HashEntry>>,
}

impl SharedState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current readiness as published by the protocol layer.
	pub fn ready(&self) -> ReadyFlags {
		ReadyFlags {
			rx: self.rx_ready.load(Ordering::Acquire),
			tx: self.tx_ready.load(Ordering::Acquire),
			eof: self.eof_ready.load(Ordering::Acquire),
		}
	}

	pub fn set_ready(&self, ready: ReadyFlags) {
		self.rx_ready.store(ready.rx, Ordering::Release);
		self.tx_ready.store(ready.tx, Ordering::Release);
		self.eof_ready.store(ready.eof, Ordering::Release);
	}

	pub fn set_rx_ready(&self, ready: bool) {
		self.rx_ready.store(ready, Ordering::Release);
	}

	pub fn set_tx_ready(&self, ready: bool) {
		self.tx_ready.store(ready, Ordering::Release);
	}

	pub fn set_eof_ready(&self, ready: bool) {
		self.eof_ready.store(ready, Ordering::Release);
	}

	/// Allocates the buffers unless another duplicate already did.
	/// Returns whether an allocation happened.
	pub fn ensure_buffers(&self, rx_size: usize, tx_size: usize) -> bool {
		let mut buffers = self.buffers.lock();
		if buffers.is_some() {
			return false;
		}
		*buffers = Some(SocketBuffers::new(rx_size, tx_size));
		true
	}

	pub fn has_buffers(&self) -> bool {
		self.buffers.lock().is_some()
	}

	/// Descriptor currently indexed for this socket, if any.
	pub fn hash_entry(&self) -> Option<HashEntry> {
		*self.hash_entry.lock()
	}

	pub(crate) fn lock_hash_entry(&self) -> MutexGuard<'_, Option<HashEntry>> {
		self.hash_entry.lock()
	}

	/// Runs `f` with the buffers held locked.
	pub fn with_buffers<R>(&self, f: impl FnOnce(&mut SocketBuffers) -> R) -> Option<R> {
		self.buffers.lock().as_mut().map(f)
	}
}

/// Readiness flags, kept locally per descriptor for edge detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyFlags {
	pub rx: bool,
	pub tx: bool,
	pub eof: bool,
}

/// Flags that went from clear to set since the last check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyEdges {
	pub rx: bool,
	pub tx: bool,
	pub eof: bool,
}

impl ReadyEdges {
	pub fn any(&self) -> bool {
		self.rx || self.tx || self.eof
	}
}

impl ReadyFlags {
	/// Replaces the local copy with `current` and reports rising edges.
	pub fn update(&mut self, current: ReadyFlags) -> ReadyEdges {
		let edges = ReadyEdges {
			rx: current.rx && !self.rx,
			tx: current.tx && !self.tx,
			eof: current.eof && !self.eof,
		};
		*self = current;
		edges
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn edges_fire_on_rising_transition_only() {
		let shared = SharedState::new();
		let mut local = ReadyFlags::default();

		shared.set_rx_ready(true);
		let edges = local.update(shared.ready());
		assert!(edges.rx && !edges.tx && !edges.eof);

		// level stays high: no new edge
		assert!(!local.update(shared.ready()).any());

		shared.set_rx_ready(false);
		assert!(!local.update(shared.ready()).any());
		shared.set_rx_ready(true);
		assert!(local.update(shared.ready()).rx);
	}

	#[test]
	fn buffers_allocated_once() {
		let shared = SharedState::new();
		assert!(!shared.has_buffers());
		assert!(shared.ensure_buffers(64, 32));
		assert!(!shared.ensure_buffers(128, 128));
		let sizes = shared.with_buffers(|b| (b.rx.len(), b.tx.len()));
		assert_eq!(sizes, Some((64, 32)));
	}
}
