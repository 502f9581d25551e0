mod options;
mod record;
mod shared;

pub use self::options::{
	EpollMembership, KeepaliveConfig, SocketOptions, Timeout, Warning, Warnings, MAX_NUM_EPOLL,
	SOF_TIMESTAMPING_RX_HARDWARE, SOF_TIMESTAMPING_RX_SOFTWARE, SOF_TIMESTAMPING_SOFTWARE,
};
pub use self::record::{HashLink, ListenConfig, ListenScope, ProtocolCtx, SocketInner, SocketSlot, NO_FD};
pub use self::shared::{HashEntry, ReadyEdges, ReadyFlags, SharedState, SocketBuffers};

/// Bypass availability of a socket.
///
/// Variants are ordered from least to most available and comparisons such
/// as `state >= BypassState::Avail` rely on that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum BypassState {
	/// Permanently disabled. Nothing leaves this state.
	#[default]
	Disabled = 0,
	/// Disabled for now, e.g. by a global default.
	Inactive = 1,
	/// Eligible for bypass but not in use yet.
	Avail = 2,
	/// Used for bypass. Only left by closing the socket.
	Active = 3,
}

impl BypassState {
	#[inline]
	pub(crate) fn from_raw(raw: u8) -> Self {
		match raw {
			0 => BypassState::Disabled,
			1 => BypassState::Inactive,
			2 => BypassState::Avail,
			_ => BypassState::Active,
		}
	}

	/// Whether a socket in this state may be moved to `to` without closing.
	pub fn can_transition(self, to: BypassState) -> bool {
		match (self, to) {
			(BypassState::Disabled, to) => to == BypassState::Disabled,
			(BypassState::Active, to) => to == BypassState::Active,
			_ => true,
		}
	}
}

/// Which protocol layer owns a socket, derived from its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockProto {
	Tcp,
	Udp,
}

impl SockProto {
	/// Maps a `socket()` type argument, flag bits included.
	pub fn from_type(sock_type: i32) -> Option<Self> {
		match sock_type & !(libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC) {
			libc::SOCK_STREAM => Some(SockProto::Tcp),
			libc::SOCK_DGRAM => Some(SockProto::Udp),
			_ => None,
		}
	}
}
