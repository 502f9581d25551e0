use crate::error::{ConfigError, errno};
use crate::socket::BypassState;

/// Upper bound on the table size picked from `RLIMIT_NOFILE`.
pub const DEFAULT_MAX_CAPACITY: usize = 65536;

pub const DEFAULT_RX_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_TX_BUFFER_SIZE: usize = 64 * 1024;

/// Stack construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
	/// Number of socket table slots; descriptors at or above this are
	/// never handled by the stack.
	pub capacity: usize,
	/// Initial bypass state of new sockets. `Inactive` disables bypass by
	/// default while still letting the application opt in.
	pub default_bypass: BypassState,
	pub rx_buffer_size: usize,
	pub tx_buffer_size: usize,
}

impl Default for StackConfig {
	fn default() -> Self {
		Self {
			capacity: 1024,
			default_bypass: BypassState::Avail,
			rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
			tx_buffer_size: DEFAULT_TX_BUFFER_SIZE,
		}
	}
}

impl StackConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sizes the table after the soft descriptor limit of the process,
	/// clamped to `DEFAULT_MAX_CAPACITY`.
	pub fn from_rlimit() -> Result<Self, ConfigError> {
		Ok(Self::default().capacity(nofile_limit()?.min(DEFAULT_MAX_CAPACITY)))
	}

	pub fn capacity(mut self, capacity: usize) -> Self {
		self.capacity = capacity;
		self
	}

	pub fn default_bypass(mut self, state: BypassState) -> Self {
		self.default_bypass = state;
		self
	}

	/// Start new sockets `Inactive` instead of `Avail`.
	pub fn disabled_by_default(self) -> Self {
		self.default_bypass(BypassState::Inactive)
	}

	pub fn buffers(mut self, rx: usize, tx: usize) -> Self {
		self.rx_buffer_size = rx;
		self.tx_buffer_size = tx;
		self
	}
}

/// Soft `RLIMIT_NOFILE` of the calling process.
fn nofile_limit() -> Result<usize, ConfigError> {
	let mut rlim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
	let result = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) };
	if result == -1 {
		return Err(ConfigError::Rlimit { errno: errno() });
	}
	Ok(usize::try_from(rlim.rlim_cur).unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rlimit_sizing_is_clamped() {
		let config = StackConfig::from_rlimit().unwrap();
		assert!(config.capacity > 0);
		assert!(config.capacity <= DEFAULT_MAX_CAPACITY);
	}

	#[test]
	fn builder_chains() {
		let config = StackConfig::new().capacity(16).disabled_by_default().buffers(128, 256);
		assert_eq!(config.capacity, 16);
		assert_eq!(config.default_bypass, BypassState::Inactive);
		assert_eq!((config.rx_buffer_size, config.tx_buffer_size), (128, 256));
	}
}
