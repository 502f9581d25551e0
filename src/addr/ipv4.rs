/// The wildcard address in network byte order.
pub const INADDR_ANY: u32 = 0;

/// IPv4 socket address (IP + port).
///
/// Stored in host-friendly form; `in_addr()` and `in_port()` produce the
/// network-order words the hash index works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub const fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// `0.0.0.0:0`, the unconnected peer.
	pub const fn any() -> Self {
		Self { ip: [0; 4], port: 0 }
	}

	/// Creates from an `in_addr_t` / `in_port_t` pair in network byte order.
	pub const fn from_in(addr: u32, port: u16) -> Self {
		Self {
			ip: addr.to_ne_bytes(),
			port: u16::from_be(port),
		}
	}

	/// Creates from raw sockaddr_in.
	pub fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self::from_in(raw.sin_addr.s_addr, raw.sin_port)
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Address as `in_addr_t` (network byte order).
	#[inline]
	pub const fn in_addr(&self) -> u32 {
		u32::from_ne_bytes(self.ip)
	}

	/// Port as `in_port_t` (network byte order).
	#[inline]
	pub const fn in_port(&self) -> u16 {
		self.port.to_be()
	}

	/// True for 224.0.0.0/4.
	#[inline]
	pub fn is_multicast(&self) -> bool {
		self.ip[0] & 0xf0 == 0xe0
	}

	/// Converts to the raw sockaddr_in handed back to the application.
	pub fn to_raw(&self) -> libc::sockaddr_in {
		// SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
		let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
		raw.sin_family = libc::AF_INET as libc::sa_family_t;
		raw.sin_port = self.in_port();
		raw.sin_addr = libc::in_addr { s_addr: self.in_addr() };
		raw
	}
}

impl std::fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let [a, b, c, d] = self.ip;
		write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
	}
}

/// True if a network-order `in_addr_t` lies in 224.0.0.0/4.
#[inline]
pub fn in_multicast(addr: u32) -> bool {
	addr.to_ne_bytes()[0] & 0xf0 == 0xe0
}
