/// Socket registry and lifecycle errors.
///
/// Each variant corresponds to the errno a syscall-interception layer would
/// hand back to the application.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
	#[error("fd {fd} is outside the socket table: {}", errno_to_str(libc::EBADF))]
	BadDescriptor { fd: i32 },

	#[error("fd {fd} already holds a valid socket")]
	InUse { fd: i32 },

	#[error("fd {fd} is not a valid bypass socket")]
	NotValid { fd: i32 },

	#[error("fd {fd} is already bound")]
	AlreadyBound { fd: i32 },

	#[error("fd {fd} is not bound")]
	NotBound { fd: i32 },

	#[error("fd {fd}: bypass state cannot move from {from:?} to {to:?}")]
	InvalidTransition { fd: i32, from: crate::BypassState, to: crate::BypassState },

	#[error("fd {fd}: bypass is permanently disabled")]
	BypassDisabled { fd: i32 },

	#[error("fd {fd}: protocol context does not match socket type {sock_type}")]
	ProtocolMismatch { fd: i32, sock_type: i32 },

	#[error("fd {fd} is already a member of {max} epoll instances")]
	EpollLimit { fd: i32, max: usize },

	#[error("fd {fd} already holds a multicast membership")]
	McastInUse { fd: i32 },

	#[error("fd {fd} has no multicast membership")]
	McastNotMember { fd: i32 },
}

impl SocketError {
	/// Returns the errno this error maps to.
	pub fn errno(&self) -> i32 {
		match self {
			SocketError::BadDescriptor { .. } => libc::EBADF,
			SocketError::InUse { .. } => libc::EBUSY,
			SocketError::NotValid { .. } => libc::EBADF,
			SocketError::AlreadyBound { .. } => libc::EINVAL,
			SocketError::NotBound { .. } => libc::EINVAL,
			SocketError::InvalidTransition { .. } => libc::EINVAL,
			SocketError::BypassDisabled { .. } => libc::EOPNOTSUPP,
			SocketError::ProtocolMismatch { .. } => libc::EPROTOTYPE,
			SocketError::EpollLimit { .. } => libc::ENOSPC,
			SocketError::McastInUse { .. } => libc::EADDRINUSE,
			SocketError::McastNotMember { .. } => libc::EADDRNOTAVAIL,
		}
	}
}

/// Stack configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("socket table capacity must be non-zero")]
	ZeroCapacity,

	#[error("socket table capacity {capacity} exceeds the descriptor range")]
	CapacityTooLarge { capacity: usize },

	#[error("getrlimit(RLIMIT_NOFILE) failed: {}", errno_to_str(*.errno))]
	Rlimit { errno: i32 },
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
	std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Converts errno to human-readable string.
fn errno_to_str(errno: i32) -> String {
	match errno {
		libc::EADDRINUSE => "address already in use".into(),
		libc::EADDRNOTAVAIL => "address not available".into(),
		libc::EBADF => "bad file descriptor".into(),
		libc::EBUSY => "device or resource busy".into(),
		libc::EFAULT => "bad address".into(),
		libc::EINVAL => "invalid argument".into(),
		libc::ENOSPC => "no space left".into(),
		libc::EOPNOTSUPP => "operation not supported".into(),
		libc::EPERM => "operation not permitted".into(),
		libc::EPROTOTYPE => "protocol wrong type for socket".into(),
		_ => format!("errno {}", errno),
	}
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
	match errno {
		libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
		libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
		libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
		libc::EBUSY => std::io::ErrorKind::ResourceBusy,
		libc::EINVAL | libc::EBADF => std::io::ErrorKind::InvalidInput,
		libc::ENOSPC => std::io::ErrorKind::StorageFull,
		libc::EOPNOTSUPP => std::io::ErrorKind::Unsupported,
		_ => std::io::ErrorKind::Other,
	}
}

impl From<SocketError> for std::io::Error {
	fn from(err: SocketError) -> Self {
		std::io::Error::new(errno_to_kind(err.errno()), err)
	}
}

impl From<ConfigError> for std::io::Error {
	fn from(err: ConfigError) -> Self {
		let errno = match &err {
			ConfigError::ZeroCapacity => libc::EINVAL,
			ConfigError::CapacityTooLarge { .. } => libc::EINVAL,
			ConfigError::Rlimit { errno } => *errno,
		};
		std::io::Error::new(errno_to_kind(errno), err)
	}
}
