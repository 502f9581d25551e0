//! Descriptor-indexed socket table.

use crate::error::ConfigError;
use crate::socket::SocketSlot;

/// Fixed-capacity table of socket records, indexed by descriptor.
///
/// The shape never changes after construction; per-record mutation goes
/// through the record lock.
#[derive(Debug)]
pub struct SocketTable {
	slots: Box<[SocketSlot]>,
}

impl SocketTable {
	pub fn new(capacity: usize) -> Result<Self, ConfigError> {
		if capacity == 0 {
			return Err(ConfigError::ZeroCapacity);
		}
		if capacity > i32::MAX as usize {
			return Err(ConfigError::CapacityTooLarge { capacity });
		}
		let slots = (0..capacity as i32).map(SocketSlot::new).collect();
		Ok(Self { slots })
	}

	/// Returns the record at `fd`, or `None` when `fd` is outside the
	/// table. Whether the record holds a live socket is up to the caller.
	#[inline]
	pub fn get(&self, fd: i32) -> Option<&SocketSlot> {
		usize::try_from(fd).ok().and_then(|i| self.slots.get(i))
	}

	/// Descriptor of a record obtained from this table.
	#[inline]
	pub fn fd_of(&self, sock: &SocketSlot) -> i32 {
		debug_assert!(
			self.get(sock.fd()).is_some_and(|s| std::ptr::eq(s, sock)),
			"record does not belong to this table"
		);
		sock.fd()
	}

	pub fn capacity(&self) -> usize {
		self.slots.len()
	}

	/// All slots, valid or not.
	pub fn iter(&self) -> impl Iterator<Item = &SocketSlot> {
		self.slots.iter()
	}
}
