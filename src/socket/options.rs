use std::time::Duration;

/// Maximum number of epoll instances a socket can be a member of.
pub const MAX_NUM_EPOLL: usize = 4;

pub const SOF_TIMESTAMPING_RX_HARDWARE: i32 = 1 << 2;
pub const SOF_TIMESTAMPING_RX_SOFTWARE: i32 = 1 << 3;
pub const SOF_TIMESTAMPING_SOFTWARE: i32 = 1 << 4;

/// SO_SNDTIMEO / SO_RCVTIMEO setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
	/// Block indefinitely.
	#[default]
	Disabled,
	Enabled(Duration),
}

impl Timeout {
	/// A zero `timeval` disables the timeout.
	pub fn from_duration(val: Duration) -> Self {
		if val.is_zero() { Timeout::Disabled } else { Timeout::Enabled(val) }
	}
}

/// Keep-alive timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
	pub idle_secs: u32,
	pub interval_secs: u32,
	pub count: u32,
}

impl Default for KeepaliveConfig {
	fn default() -> Self {
		Self {
			idle_secs: 7200,
			interval_secs: 75,
			count: 9,
		}
	}
}

impl KeepaliveConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn idle(mut self, secs: u32) -> Self {
		self.idle_secs = secs;
		self
	}

	pub fn interval(mut self, secs: u32) -> Self {
		self.interval_secs = secs;
		self
	}

	pub fn count(mut self, count: u32) -> Self {
		self.count = count;
		self
	}
}

/// Socket options that are tracked by the stack rather than the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
	/// IP_MULTICAST_IF, network byte order.
	pub ip_multicast_if: u32,
	pub ip_multicast_ttl: u8,
	/// SO_LINGER timeout in seconds, `None` when lingering is off.
	pub so_linger: Option<u32>,
	pub so_timestamp: bool,
	pub so_timestampns: bool,
	pub so_timestamping: i32,
	pub so_sndtimeo: Timeout,
	pub so_rcvtimeo: Timeout,
	pub so_keepalive: bool,
	pub keepalive: KeepaliveConfig,
	/// TCP_USER_TIMEOUT in milliseconds, 0 for the system default.
	pub tcp_user_timeout: u32,
	/// Timestamps are generated on receive.
	pub rx_sw_timestamp: bool,
	/// Timestamps are reported to the application.
	pub report_timestamp: bool,
}

impl Default for SocketOptions {
	fn default() -> Self {
		Self {
			ip_multicast_if: 0,
			ip_multicast_ttl: 1,
			so_linger: None,
			so_timestamp: false,
			so_timestampns: false,
			so_timestamping: 0,
			so_sndtimeo: Timeout::Disabled,
			so_rcvtimeo: Timeout::Disabled,
			so_keepalive: false,
			keepalive: KeepaliveConfig::default(),
			tcp_user_timeout: 0,
			rx_sw_timestamp: false,
			report_timestamp: false,
		}
	}
}

impl SocketOptions {
	/// Sets SO_TIMESTAMP, SO_TIMESTAMPNS and SO_TIMESTAMPING together and
	/// recomputes the derived generation/reporting state.
	pub fn set_timestamping(&mut self, timestamp: bool, timestampns: bool, timestamping: i32) {
		self.so_timestamp = timestamp;
		self.so_timestampns = timestampns;
		self.so_timestamping = timestamping;

		let software = timestamping & SOF_TIMESTAMPING_SOFTWARE != 0;
		self.rx_sw_timestamp =
			timestamp || timestampns || timestamping & SOF_TIMESTAMPING_RX_SOFTWARE != 0;
		self.report_timestamp = timestamp
			|| timestampns
			|| (software && self.rx_sw_timestamp)
			|| timestamping & SOF_TIMESTAMPING_RX_HARDWARE != 0;
	}

	pub fn set_keepalive(&mut self, enable: bool, config: KeepaliveConfig) {
		self.so_keepalive = enable;
		self.keepalive = config;
	}
}

/// Epoll instances a non-bypass socket is registered with.
///
/// Dropped when the socket moves into bypass mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpollMembership {
	fds: [i32; MAX_NUM_EPOLL],
	len: usize,
}

impl EpollMembership {
	/// Records membership in `epfd`. Returns false when the set is full.
	/// Adding an existing member is a no-op.
	pub fn add(&mut self, epfd: i32) -> bool {
		if self.contains(epfd) {
			return true;
		}
		if self.len == MAX_NUM_EPOLL {
			return false;
		}
		self.fds[self.len] = epfd;
		self.len += 1;
		true
	}

	pub fn remove(&mut self, epfd: i32) -> bool {
		match self.as_slice().iter().position(|&fd| fd == epfd) {
			Some(i) => {
				self.fds.copy_within(i + 1..self.len, i);
				self.len -= 1;
				true
			}
			None => false,
		}
	}

	pub fn contains(&self, epfd: i32) -> bool {
		self.as_slice().contains(&epfd)
	}

	pub fn clear(&mut self) {
		self.len = 0;
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn as_slice(&self) -> &[i32] {
		&self.fds[..self.len]
	}
}

/// One-shot warnings, each logged at most once per socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
	/// Bound to a multicast address; unicast traffic is not accelerated.
	McastBound,
	/// SO_SNDBUF is accepted but has no effect on bypass sockets.
	SoSndbuf,
	/// SO_RCVBUF is accepted but has no effect on bypass sockets.
	SoRcvbuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Warnings {
	pub mcast_bound: bool,
	pub so_sndbuf: bool,
	pub so_rcvbuf: bool,
}

impl Warnings {
	/// Logs `warning` for `fd` unless it was logged before.
	/// Returns whether the warning was emitted.
	pub fn warn_once(&mut self, fd: i32, warning: Warning) -> bool {
		let seen = match warning {
			Warning::McastBound => &mut self.mcast_bound,
			Warning::SoSndbuf => &mut self.so_sndbuf,
			Warning::SoRcvbuf => &mut self.so_rcvbuf,
		};
		if *seen {
			return false;
		}
		*seen = true;
		match warning {
			Warning::McastBound => tracing::warn!(fd, "socket bound to multicast address, unicast receive is not accelerated"),
			Warning::SoSndbuf => tracing::warn!(fd, "SO_SNDBUF has no effect on accelerated sockets"),
			Warning::SoRcvbuf => tracing::warn!(fd, "SO_RCVBUF has no effect on accelerated sockets"),
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn epoll_set_is_bounded() {
		let mut set = EpollMembership::default();
		for epfd in 10..10 + MAX_NUM_EPOLL as i32 {
			assert!(set.add(epfd));
		}
		assert!(!set.add(99));
		assert!(set.add(10), "re-adding a member is not an overflow");
		assert_eq!(set.len(), MAX_NUM_EPOLL);

		assert!(set.remove(11));
		assert!(!set.remove(11));
		assert_eq!(set.as_slice(), &[10, 12, 13]);
		assert!(set.add(99));
	}

	#[test]
	fn timestamping_derives_enable_state() {
		let mut opts = SocketOptions::default();
		opts.set_timestamping(true, false, 0);
		assert!(opts.rx_sw_timestamp && opts.report_timestamp);

		opts.set_timestamping(false, false, SOF_TIMESTAMPING_RX_SOFTWARE);
		assert!(opts.rx_sw_timestamp);
		assert!(!opts.report_timestamp);

		opts.set_timestamping(false, false, SOF_TIMESTAMPING_RX_SOFTWARE | SOF_TIMESTAMPING_SOFTWARE);
		assert!(opts.report_timestamp);

		opts.set_timestamping(false, false, 0);
		assert!(!opts.rx_sw_timestamp && !opts.report_timestamp);
	}

	#[test]
	fn warnings_fire_once() {
		let mut warn = Warnings::default();
		assert!(warn.warn_once(3, Warning::SoSndbuf));
		assert!(!warn.warn_once(3, Warning::SoSndbuf));
		assert!(warn.warn_once(3, Warning::SoRcvbuf));
	}

	#[test]
	fn zero_timeout_disables() {
		assert_eq!(Timeout::from_duration(Duration::ZERO), Timeout::Disabled);
		assert_eq!(
			Timeout::from_duration(Duration::from_millis(5)),
			Timeout::Enabled(Duration::from_millis(5))
		);
	}
}
