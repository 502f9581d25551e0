//! Endpoint types used as hash index keys.
//!
//! Addresses and ports are kept as `in_addr_t` / `in_port_t` words in
//! network byte order, the form in which they arrive in packet headers.

mod ipv4;
pub use self::ipv4::{SocketAddrV4, INADDR_ANY, in_multicast};

/// Unicast flow 4-tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
	pub local_addr: u32,
	pub peer_addr: u32,
	pub local_port: u16,
	pub peer_port: u16,
}

impl Endpoint {
	/// Creates an endpoint from local and peer socket addresses.
	pub const fn new(local: SocketAddrV4, peer: SocketAddrV4) -> Self {
		Self {
			local_addr: local.in_addr(),
			peer_addr: peer.in_addr(),
			local_port: local.in_port(),
			peer_port: peer.in_port(),
		}
	}

	/// Locally bound endpoint with no peer restriction.
	pub const fn bound(local: SocketAddrV4) -> Self {
		Self::new(local, SocketAddrV4::any())
	}

	pub fn local(&self) -> SocketAddrV4 {
		SocketAddrV4::from_in(self.local_addr, self.local_port)
	}

	pub fn peer(&self) -> SocketAddrV4 {
		SocketAddrV4::from_in(self.peer_addr, self.peer_port)
	}

	/// Same endpoint with the peer replaced.
	pub fn with_peer(self, peer: SocketAddrV4) -> Self {
		Self {
			peer_addr: peer.in_addr(),
			peer_port: peer.in_port(),
			..self
		}
	}
}

impl std::fmt::Display for Endpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} -> {}", self.local(), self.peer())
	}
}

/// Multicast group joined on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct McastEndpoint {
	pub multiaddr: u32,
	pub interface: u32,
}

impl McastEndpoint {
	pub const fn new(group: [u8; 4], interface: [u8; 4]) -> Self {
		Self {
			multiaddr: u32::from_ne_bytes(group),
			interface: u32::from_ne_bytes(interface),
		}
	}

	/// Membership on every interface.
	pub const fn any_interface(group: [u8; 4]) -> Self {
		Self::new(group, [0; 4])
	}
}

/// Multicast membership of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct McastMembership {
	pub mcast_ep: McastEndpoint,
	pub mcast_ep_valid: bool,
	/// Interfaces joined but not handled through bypass.
	pub num_not_bypassed: u32,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bound_endpoint_has_wildcard_peer() {
		let ep = Endpoint::bound(SocketAddrV4::new([10, 0, 0, 1], 5000));
		assert_eq!(ep.peer_addr, INADDR_ANY);
		assert_eq!(ep.peer_port, 0);
		assert_eq!(ep.local(), SocketAddrV4::new([10, 0, 0, 1], 5000));
	}

	#[test]
	fn display_is_readable() {
		let ep = Endpoint::new(
			SocketAddrV4::new([10, 0, 0, 1], 5000),
			SocketAddrV4::new([10, 0, 0, 2], 6000),
		);
		assert_eq!(ep.to_string(), "10.0.0.1:5000 -> 10.0.0.2:6000");
	}
}
