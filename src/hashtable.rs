//! Endpoint hash index used to demultiplex received packets.
//!
//! Buckets hold the descriptor at the head of a chain; the chain continues
//! through each record's `hashtable_next_fd`. Mutation is serialized by a
//! single spinlock. Lookups take no lock at all: removal only unlinks a
//! record, it never frees it, and a removed record keeps its own next link
//! so a reader standing on it can finish the walk. Reusing an unlinked
//! record is fenced by [`PollSync::reclaim_sync`](crate::PollSync::reclaim_sync).

use std::sync::atomic::{AtomicI32, Ordering};

use crate::addr::{Endpoint, INADDR_ANY, McastEndpoint};
use crate::registry::SocketTable;
use crate::socket::{NO_FD, SocketSlot};
use crate::sync::SpinLock;

pub const HASHTABLE_SIZE_LOG2: u32 = 16;
pub const HASHTABLE_SIZE: usize = 1 << HASHTABLE_SIZE_LOG2;

const BUCKET_MASK: u32 = (1 << HASHTABLE_SIZE_LOG2) - 1;

/// Two addresses and two ports, all in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
	pub addr: [u32; 2],
	pub port: [u16; 2],
}

impl HashKey {
	pub fn unicast(ep: &Endpoint) -> Self {
		Self {
			addr: [ep.local_addr, ep.peer_addr],
			port: [ep.local_port, ep.peer_port],
		}
	}

	/// Peer address is not part of a multicast key, the interface address
	/// takes its place. Holds as long as source-specific membership is not
	/// supported.
	pub fn multicast(mc_ep: &McastEndpoint, local_port: u16) -> Self {
		Self {
			addr: [mc_ep.multiaddr, mc_ep.interface],
			port: [local_port, 0],
		}
	}

	/// Final mixing stage of Bob Jenkins' lookup3.
	pub fn hash(&self) -> u32 {
		let mut a = self.addr[0];
		let mut b = self.addr[1];
		let mut c = (self.port[0] as u32) << 16 | self.port[1] as u32;

		c ^= b; c = c.wrapping_sub(b.rotate_left(14));
		a ^= c; a = a.wrapping_sub(c.rotate_left(11));
		b ^= a; b = b.wrapping_sub(a.rotate_left(25));
		c ^= b; c = c.wrapping_sub(b.rotate_left(16));
		a ^= c; a = a.wrapping_sub(c.rotate_left(4));
		b ^= a; b = b.wrapping_sub(a.rotate_left(14));
		c ^= b; c = c.wrapping_sub(b.rotate_left(24));

		c
	}

	#[inline]
	pub fn bucket(&self) -> usize {
		(self.hash() & BUCKET_MASK) as usize
	}
}

impl std::fmt::Display for HashKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"[{:#010x}, {:#010x}, {:#06x}, {:#06x}]",
			self.addr[0], self.addr[1], self.port[0], self.port[1]
		)
	}
}

pub struct EndpointHashTable {
	table: Box<[AtomicI32]>,
	write_lock: SpinLock,
}

impl Default for EndpointHashTable {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for EndpointHashTable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EndpointHashTable")
			.field("buckets", &self.table.len())
			.field("occupied", &self.occupied_buckets())
			.finish()
	}
}

impl EndpointHashTable {
	pub fn new() -> Self {
		Self {
			table: (0..HASHTABLE_SIZE).map(|_| AtomicI32::new(NO_FD)).collect(),
			write_lock: SpinLock::new(),
		}
	}

	/// Descriptor at the head of `bucket`'s chain, `NO_FD` if empty.
	#[inline]
	pub fn head(&self, bucket: usize) -> i32 {
		self.table[bucket].load(Ordering::Acquire)
	}

	pub fn occupied_buckets(&self) -> usize {
		self.table.iter().filter(|b| b.load(Ordering::Relaxed) != NO_FD).count()
	}

	/// Pushes `sock` onto the head of `key`'s bucket.
	pub fn insert(&self, sock: &SocketSlot, fd: i32, key: &HashKey) {
		let idx = key.bucket();

		let guard = self.write_lock.lock();
		sock.hashtable_next_fd.store(self.table[idx].load(Ordering::Relaxed), Ordering::Release);
		self.table[idx].store(fd, Ordering::Release);
		drop(guard);

		tracing::trace!(fd, bucket = idx, "hash insert");
	}

	/// Unlinks `remove_fd` from `key`'s bucket. Returns false when the
	/// entry is not in the chain.
	///
	/// The removed record keeps its own next link until it is reused.
	pub fn remove(&self, sockets: &SocketTable, remove_sock: &SocketSlot, remove_fd: i32, key: &HashKey) -> bool {
		let idx = key.bucket();

		let guard = self.write_lock.lock();
		let next = remove_sock.hashtable_next_fd.load(Ordering::Relaxed);

		let mut found = false;
		let mut fd = self.table[idx].load(Ordering::Relaxed);
		if fd == remove_fd {
			self.table[idx].store(next, Ordering::Release);
			found = true;
		} else {
			while fd != NO_FD {
				let Some(sock) = sockets.get(fd) else { break };
				let link = sock.hashtable_next_fd.load(Ordering::Relaxed);
				if link == remove_fd {
					sock.hashtable_next_fd.store(next, Ordering::Release);
					found = true;
					break;
				}
				fd = link;
			}
		}
		drop(guard);

		if found {
			tracing::trace!(fd = remove_fd, bucket = idx, "hash remove");
		} else {
			tracing::warn!(fd = remove_fd, bucket = idx, %key, "hash remove of entry not in table");
		}
		found
	}

	/// Indexes `sock` under its bound endpoint.
	pub fn ucast_insert(&self, sock: &SocketSlot) {
		let key = HashKey::unicast(&sock.bind_endpoint());
		self.insert(sock, sock.fd(), &key);
	}

	pub fn ucast_remove(&self, sockets: &SocketTable, sock: &SocketSlot) -> bool {
		let key = HashKey::unicast(&sock.bind_endpoint());
		self.remove(sockets, sock, sock.fd(), &key)
	}

	/// Indexes `sock` under `mc_ep` and its bound local port.
	pub fn mcast_insert(&self, sock: &SocketSlot, mc_ep: &McastEndpoint) {
		let key = HashKey::multicast(mc_ep, sock.bind_endpoint().local_port);
		self.insert(sock, sock.fd(), &key);
	}

	pub fn mcast_remove(&self, sockets: &SocketTable, sock: &SocketSlot, mc_ep: &McastEndpoint) -> bool {
		let key = HashKey::multicast(mc_ep, sock.bind_endpoint().local_port);
		self.remove(sockets, sock, sock.fd(), &key)
	}

	/// First record in `key`'s chain accepted by `matches`.
	#[inline]
	fn find(&self, sockets: &SocketTable, key: &HashKey, matches: impl Fn(&SocketSlot) -> bool) -> Option<i32> {
		let mut fd = self.head(key.bucket());
		while fd != NO_FD {
			let sock = sockets.get(fd)?;
			if matches(sock) {
				return Some(fd);
			}
			fd = sock.hashtable_next_fd();
		}
		None
	}

	/// Finds the socket owning a received unicast packet.
	///
	/// Tries, in order: the exact 4-tuple; the local address and port with
	/// no peer; the local port on the wildcard address.
	pub fn ucast_lookup(&self, sockets: &SocketTable, e: &Endpoint) -> Option<i32> {
		let mut key = HashKey::unicast(e);
		let found = self.find(sockets, &key, |sock| sock.bind_endpoint() == *e);
		if found.is_some() {
			return found;
		}

		key.addr[1] = INADDR_ANY;
		key.port[1] = 0;
		let found = self.find(sockets, &key, |sock| {
			let b = sock.bind_endpoint();
			b.local_addr == e.local_addr
				&& b.peer_addr == INADDR_ANY
				&& b.local_port == e.local_port
				&& b.peer_port == 0
		});
		if found.is_some() {
			return found;
		}

		key.addr[0] = INADDR_ANY;
		self.find(sockets, &key, |sock| {
			let b = sock.bind_endpoint();
			b.local_addr == INADDR_ANY
				&& b.peer_addr == INADDR_ANY
				&& b.local_port == e.local_port
				&& b.peer_port == 0
		})
	}

	/// Finds the socket owning a received multicast packet. `e.local_addr`
	/// is the group address, `if_addr` the receiving interface.
	///
	/// Tries the exact interface first, then memberships on any interface.
	pub fn mcast_lookup(&self, sockets: &SocketTable, e: &Endpoint, if_addr: u32) -> Option<i32> {
		let mut key = HashKey {
			addr: [e.local_addr, if_addr],
			port: [e.local_port, 0],
		};
		let found = self.find(sockets, &key, |sock| is_member(sock, e, if_addr));
		if found.is_some() {
			return found;
		}

		key.addr[1] = INADDR_ANY;
		self.find(sockets, &key, |sock| is_member(sock, e, INADDR_ANY))
	}
}

/// `sock` holds the membership for group `e.local_addr` on `iface` and is
/// bound to the packet's destination port.
#[inline]
fn is_member(sock: &SocketSlot, e: &Endpoint, iface: u32) -> bool {
	let b = sock.bind_endpoint();
	let m = sock.mcast_endpoint();
	b.local_port == e.local_port && b.peer_port == 0 && m.multiaddr == e.local_addr && m.interface == iface
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_matches_lookup3_final() {
		let zero = HashKey { addr: [0, 0], port: [0, 0] };
		assert_eq!(zero.hash(), 0);

		let key = HashKey { addr: [0x0100_000a, 0x0200_000a], port: [0x8813, 0x7017] };
		assert_eq!(key.hash(), 0xecd9_fab4);
		assert_eq!(key.bucket(), 0xfab4);

		let key = HashKey { addr: [0xdead_beef, 0x1234_5678], port: [0xabcd, 0x1234] };
		assert_eq!(key.hash(), 0xea31_d274);
		assert_eq!(key.bucket(), 0xd274);
	}

	#[test]
	fn ports_pack_into_one_word() {
		let a = HashKey { addr: [1, 2], port: [3, 4] };
		let b = HashKey { addr: [1, 2], port: [4, 3] };
		assert_ne!(a.hash(), b.hash());
	}

	#[test]
	fn new_table_is_empty() {
		let ht = EndpointHashTable::new();
		assert_eq!(ht.occupied_buckets(), 0);
		assert_eq!(ht.head(0), NO_FD);
		assert_eq!(ht.head(HASHTABLE_SIZE - 1), NO_FD);
	}

	#[test]
	fn remove_walks_past_second_link() {
		let sockets = SocketTable::new(8).unwrap();
		let ht = EndpointHashTable::new();
		let key = HashKey { addr: [7, 7], port: [7, 7] };

		// chain: 4 -> 3 -> 2 -> 1 -> 0
		for fd in 0..5 {
			ht.insert(sockets.get(fd).unwrap(), fd, &key);
		}
		assert!(ht.remove(&sockets, sockets.get(0).unwrap(), 0, &key));
		assert!(ht.remove(&sockets, sockets.get(2).unwrap(), 2, &key));
		assert!(!ht.remove(&sockets, sockets.get(2).unwrap(), 2, &key));

		let mut chain = Vec::new();
		let mut fd = ht.head(key.bucket());
		while fd != NO_FD {
			chain.push(fd);
			fd = sockets.get(fd).unwrap().hashtable_next_fd();
		}
		assert_eq!(chain, vec![4, 3, 1]);
	}
}
