//! Socket lifecycle on top of the table, hash index, list and poll handshake.
//!
//! Every operation here takes the record's write lock, so callers on
//! different descriptors only contend on the hash index spinlock.

use std::sync::Arc;

use crate::addr::{Endpoint, INADDR_ANY, McastEndpoint, McastMembership, SocketAddrV4, in_multicast};
use crate::config::StackConfig;
use crate::error::{ConfigError, SocketError};
use crate::hashtable::EndpointHashTable;
use crate::list::SocketList;
use crate::poll_sync::PollSync;
use crate::registry::SocketTable;
use crate::socket::{
	BypassState, HashEntry, HashLink, ListenConfig, ListenScope, ProtocolCtx, ReadyEdges,
	SharedState, SockProto, SocketInner, SocketOptions, SocketSlot, Warning,
};

/// The socket registry and receive-path index of one process.
#[derive(Debug)]
pub struct BypassStack {
	config: StackConfig,
	sockets: SocketTable,
	hashtable: EndpointHashTable,
	list: SocketList,
	poll_sync: PollSync,
}

impl BypassStack {
	pub fn new(config: StackConfig) -> Result<Self, ConfigError> {
		let sockets = SocketTable::new(config.capacity)?;
		tracing::debug!(capacity = config.capacity, default_bypass = ?config.default_bypass, "bypass stack created");
		Ok(Self {
			config,
			sockets,
			hashtable: EndpointHashTable::new(),
			list: SocketList::new(),
			poll_sync: PollSync::new(),
		})
	}

	pub fn config(&self) -> &StackConfig {
		&self.config
	}

	pub fn sockets(&self) -> &SocketTable {
		&self.sockets
	}

	pub fn hashtable(&self) -> &EndpointHashTable {
		&self.hashtable
	}

	pub fn list(&self) -> &SocketList {
		&self.list
	}

	pub fn poll_sync(&self) -> &PollSync {
		&self.poll_sync
	}

	/// Record at `fd`, if `fd` is inside the table.
	pub fn get(&self, fd: i32) -> Option<&SocketSlot> {
		self.sockets.get(fd)
	}

	fn slot(&self, fd: i32) -> Result<&SocketSlot, SocketError> {
		self.sockets.get(fd).ok_or(SocketError::BadDescriptor { fd })
	}

	/// Registers a socket the kernel has just handed out as `fd`.
	///
	/// Returns the generation of the new record.
	pub fn create(&self, fd: i32, domain: i32, sock_type: i32, protocol: i32, flags: i32) -> Result<u32, SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		if inner.valid {
			return Err(SocketError::InUse { fd });
		}
		sock.zero(&mut inner);

		let proto = SockProto::from_type(sock_type);
		inner.domain = domain;
		inner.sock_type = sock_type;
		inner.protocol = protocol;
		inner.flags = flags;
		inner.need_rx_ready_poll = proto == Some(SockProto::Tcp);
		inner.state = Some(Arc::new(SharedState::new()));
		inner.valid = true;

		let state = if domain == libc::AF_INET && proto.is_some() {
			self.config.default_bypass
		} else {
			BypassState::Disabled
		};
		sock.init_bypass_state(state);
		self.list.insert(&self.sockets, sock);

		let gen_id = sock.gen_id();
		tracing::debug!(fd, gen_id, bypass = ?state, "socket created");
		Ok(gen_id)
	}

	/// Makes `newfd` a duplicate of `oldfd`, sharing its socket state.
	///
	/// The hash entry stays with `oldfd` and moves to a surviving duplicate
	/// when `oldfd` closes.
	pub fn dup(&self, oldfd: i32, newfd: i32) -> Result<(), SocketError> {
		if oldfd == newfd {
			return Ok(());
		}
		let old = self.slot(oldfd)?;
		let new = self.slot(newfd)?;

		// snapshot first so two crossed dups never hold both locks
		let (mut copy, bind, mcast, state) = {
			let src = old.read();
			if !src.valid {
				return Err(SocketError::NotValid { fd: oldfd });
			}
			(src.clone(), old.bind_endpoint(), old.mcast_endpoint(), old.bypass_state())
		};
		copy.epoll.clear();

		let mut dst = new.write();
		if dst.valid {
			return Err(SocketError::InUse { fd: newfd });
		}
		new.zero(&mut dst);
		*dst = copy;
		new.set_bind_endpoint(&bind);
		new.set_mcast_endpoint(&mcast);
		new.init_bypass_state(state);
		self.list.insert(&self.sockets, new);

		tracing::debug!(oldfd, newfd, gen_id = new.gen_id(), "socket duplicated");
		Ok(())
	}

	/// Binds `fd` to a local address and indexes it for receive.
	pub fn bind(&self, fd: i32, local: SocketAddrV4) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		// a duplicate may already have bound and indexed the socket
		if inner.bound || inner.state.as_ref().is_some_and(|s| s.hash_entry().is_some()) {
			return Err(SocketError::AlreadyBound { fd });
		}

		sock.set_bind_endpoint(&Endpoint::bound(local));
		inner.bound = true;
		if local.is_multicast() {
			inner.warn.warn_once(fd, Warning::McastBound);
		}
		if sock.bypass_state() != BypassState::Disabled {
			self.link(sock, &inner, HashLink::Unicast);
		}
		Ok(())
	}

	/// Restricts a bound socket to one peer, reindexing it under the full
	/// 4-tuple. The entry moves to `fd` if a duplicate held it.
	pub fn connect(&self, fd: i32, peer: SocketAddrV4) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if !inner.bound {
			return Err(SocketError::NotBound { fd });
		}

		let link = self.unlink(&inner, None);
		if link != HashLink::None {
			self.poll_sync.reclaim_sync();
		}
		sock.set_bind_endpoint(&sock.bind_endpoint().with_peer(peer));
		inner.connected = peer != SocketAddrV4::any();
		self.link(sock, &inner, link);
		Ok(())
	}

	/// Tears down `fd`: unindexes it, waits out the poller, drops this
	/// descriptor's reference to the shared state and zeroes the record.
	///
	/// If `fd` held the socket's hash entry and a duplicate is still open,
	/// the duplicate takes over the entry.
	pub fn close(&self, fd: i32) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;

		let link = self.unlink(&inner, Some(fd));
		self.list.remove(&self.sockets, sock);
		self.poll_sync.reclaim_sync();

		let addressing = (link != HashLink::None).then(|| Addressing::capture(sock, &inner));
		let state = inner.state.take();
		let gen_id = sock.gen_id();
		sock.zero(&mut inner);
		drop(inner);
		tracing::debug!(fd, gen_id, "socket closed");

		if let Some(state) = state {
			if Arc::strong_count(&state) == 1 {
				tracing::debug!(fd, has_buffers = state.has_buffers(), "releasing shared socket state");
			} else if let Some(addressing) = addressing {
				self.hand_off(fd, &state, link, &addressing);
			}
		}
		Ok(())
	}

	/// Links a surviving duplicate sharing `state` in place of the closed
	/// `fd`. Must be called without any record lock held.
	fn hand_off(&self, fd: i32, state: &Arc<SharedState>, link: HashLink, addressing: &Addressing) {
		for sock in self.list.iter(&self.sockets) {
			let mut inner = sock.write();
			let shares = inner.valid && inner.state.as_ref().is_some_and(|s| Arc::ptr_eq(s, state));
			if !shares || sock.bypass_state() == BypassState::Disabled {
				continue;
			}
			if state.hash_entry().is_some() {
				return;
			}
			addressing.apply(sock, &mut inner);
			if self.link(sock, &inner, link) {
				tracing::debug!(from = fd, to = sock.fd(), ?link, "hash entry handed to duplicate");
			}
			return;
		}
	}

	/// Moves `fd` to `to`. `Active` goes through [`activate_bypass`](Self::activate_bypass).
	///
	/// Returns the previous state.
	pub fn set_bypass_state(&self, fd: i32, to: BypassState) -> Result<BypassState, SocketError> {
		if to == BypassState::Active {
			let from = self.slot(fd)?.bypass_state();
			self.activate_bypass(fd)?;
			return Ok(from);
		}

		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;

		let from = sock.transition_bypass(to).map_err(|from| transition_error(fd, from, to))?;
		if to == BypassState::Disabled && self.unlink(&inner, None) != HashLink::None {
			self.poll_sync.reclaim_sync();
		}
		tracing::debug!(fd, ?from, ?to, "bypass state changed");
		Ok(from)
	}

	/// Puts a bound, available socket into bypass mode and allocates its
	/// protocol buffers. Epoll memberships of the kernel socket are dropped.
	pub fn activate_bypass(&self, fd: i32) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if !inner.bound {
			return Err(SocketError::NotBound { fd });
		}

		match sock.bypass_state() {
			BypassState::Active => return Ok(()),
			BypassState::Avail => {}
			from => return Err(transition_error(fd, from, BypassState::Active)),
		}

		if let Some(state) = &inner.state {
			state.ensure_buffers(self.config.rx_buffer_size, self.config.tx_buffer_size);
		}
		inner.epoll.clear();
		sock.transition_bypass(BypassState::Active)
			.map_err(|from| transition_error(fd, from, BypassState::Active))?;
		// no-op when this or another duplicate is already indexed
		self.link(sock, &inner, HashLink::Unicast);

		tracing::debug!(fd, gen_id = sock.gen_id(), "bypass activated");
		Ok(())
	}

	/// Stores the protocol context. Its kind must match the socket type.
	pub fn attach_protocol(&self, fd: i32, ctx: ProtocolCtx) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if inner.proto() != Some(ctx.proto()) {
			return Err(SocketError::ProtocolMismatch { fd, sock_type: inner.sock_type });
		}
		inner.ctx = Some(ctx);
		Ok(())
	}

	/// Records the acceleration engine connection, `None` to stop using it.
	pub fn set_ate(&self, fd: i32, ate_id: Option<i32>) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		inner.ate_id = ate_id;
		inner.ate_init_pending = ate_id.is_some();
		Ok(())
	}

	/// Restricts receive to one interface (SO_BINDTODEVICE).
	pub fn bind_to_device(&self, fd: i32, if_addr: Option<u32>) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		inner.bound_to_device = if_addr.is_some();
		inner.listen.scope = match if_addr {
			Some(addr) => ListenScope::Interface(addr),
			None => ListenScope::AllInterfaces,
		};
		Ok(())
	}

	/// Joins a multicast group. The socket is indexed under the group
	/// instead of its unicast endpoint until it leaves.
	pub fn join_multicast(&self, fd: i32, mc_ep: McastEndpoint) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if !inner.bound {
			return Err(SocketError::NotBound { fd });
		}
		if inner.ip_membership.mcast_ep_valid {
			return Err(SocketError::McastInUse { fd });
		}

		if self.unlink(&inner, None) != HashLink::None {
			self.poll_sync.reclaim_sync();
		}
		inner.ip_membership = McastMembership {
			mcast_ep: mc_ep,
			mcast_ep_valid: true,
			num_not_bypassed: 0,
		};
		inner.listen = ListenConfig {
			scope: if mc_ep.interface == INADDR_ANY {
				ListenScope::AllInterfaces
			} else {
				ListenScope::Interface(mc_ep.interface)
			},
			mcast: true,
		};
		sock.set_mcast_endpoint(&mc_ep);
		if sock.bypass_state() != BypassState::Disabled {
			self.link(sock, &inner, HashLink::Multicast);
		}
		Ok(())
	}

	/// Leaves the joined group and returns to unicast indexing.
	pub fn leave_multicast(&self, fd: i32) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if !inner.ip_membership.mcast_ep_valid {
			return Err(SocketError::McastNotMember { fd });
		}

		let was_linked = self.unlink(&inner, None) != HashLink::None;
		if was_linked {
			self.poll_sync.reclaim_sync();
		}
		inner.ip_membership = McastMembership::default();
		inner.listen = ListenConfig::default();
		sock.set_mcast_endpoint(&McastEndpoint::default());
		if was_linked {
			self.link(sock, &inner, HashLink::Unicast);
		}
		Ok(())
	}

	/// Counts an interface joined through the kernel rather than bypass.
	pub fn note_unbypassed_interface(&self, fd: i32) -> Result<u32, SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if !inner.ip_membership.mcast_ep_valid {
			return Err(SocketError::McastNotMember { fd });
		}
		inner.ip_membership.num_not_bypassed += 1;
		Ok(inner.ip_membership.num_not_bypassed)
	}

	pub fn add_epoll(&self, fd: i32, epfd: i32) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		if !inner.epoll.add(epfd) {
			return Err(SocketError::EpollLimit { fd, max: crate::socket::MAX_NUM_EPOLL });
		}
		Ok(())
	}

	pub fn remove_epoll(&self, fd: i32, epfd: i32) -> Result<bool, SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		Ok(inner.epoll.remove(epfd))
	}

	/// Records membership in an epoll emulation instance.
	pub fn set_notify_parent(&self, fd: i32, parent: Option<i32>, kern_epoll_member: bool) -> Result<(), SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		inner.notify_parent = parent;
		inner.kern_epoll_member = parent.is_some() && kern_epoll_member;
		Ok(())
	}

	/// Runs `f` on the socket's option bookkeeping.
	pub fn update_options<R>(&self, fd: i32, f: impl FnOnce(&mut SocketOptions) -> R) -> Result<R, SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		Ok(f(&mut inner.options))
	}

	/// Logs `warning` the first time it applies to `fd`.
	pub fn warn_once(&self, fd: i32, warning: Warning) -> Result<bool, SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		Ok(inner.warn.warn_once(fd, warning))
	}

	/// Compares the shared readiness with this descriptor's last view and
	/// reports the flags that became set.
	pub fn poll_ready(&self, fd: i32) -> Result<ReadyEdges, SocketError> {
		let sock = self.slot(fd)?;
		let mut inner = sock.write();
		check_valid(fd, &inner)?;
		let current = match &inner.state {
			Some(state) => state.ready(),
			None => return Ok(ReadyEdges::default()),
		};
		Ok(inner.ready.update(current))
	}

	pub fn ucast_lookup(&self, ep: &Endpoint) -> Option<i32> {
		self.hashtable.ucast_lookup(&self.sockets, ep)
	}

	pub fn mcast_lookup(&self, ep: &Endpoint, if_addr: u32) -> Option<i32> {
		self.hashtable.mcast_lookup(&self.sockets, ep, if_addr)
	}

	/// Finds the owner of a received packet addressed to `ep.local`,
	/// sent from `ep.peer`, that arrived on interface `if_addr`.
	#[inline]
	pub fn demux(&self, ep: &Endpoint, if_addr: u32) -> Option<i32> {
		if in_multicast(ep.local_addr) {
			self.mcast_lookup(ep, if_addr)
		} else {
			self.ucast_lookup(ep)
		}
	}

	/// Calls `f` for every socket on the socket list.
	pub fn for_each_socket(&self, mut f: impl FnMut(i32, &SocketSlot)) {
		for sock in self.list.iter(&self.sockets) {
			f(self.sockets.fd_of(sock), sock);
		}
	}

	/// Closes every listed socket. Returns how many were closed.
	pub fn shutdown(&self) -> usize {
		let fds = self.list.fds(&self.sockets);
		let closed = fds.into_iter().filter(|&fd| self.close(fd).is_ok()).count();
		tracing::debug!(closed, "bypass stack shut down");
		closed
	}

	/// Makes `sock` the socket's hash entry, in the chain named by `link`.
	/// Does nothing if a duplicate already holds the entry. Returns whether
	/// the record was linked.
	fn link(&self, sock: &SocketSlot, inner: &SocketInner, link: HashLink) -> bool {
		let Some(state) = &inner.state else { return false };
		let link = match link {
			HashLink::Multicast if !inner.ip_membership.mcast_ep_valid => HashLink::Unicast,
			link => link,
		};

		let mut entry = state.lock_hash_entry();
		if entry.is_some() {
			return false;
		}
		match link {
			HashLink::None => return false,
			HashLink::Unicast => self.hashtable.ucast_insert(sock),
			HashLink::Multicast => self.hashtable.mcast_insert(sock, &sock.mcast_endpoint()),
		}
		*entry = Some(HashEntry { fd: sock.fd(), link });
		true
	}

	/// Removes the socket's hash entry and returns the chain it was on.
	/// With `owner` set, only an entry held by that descriptor is removed.
	///
	/// The entry may belong to a duplicate; its endpoint words are stable
	/// because they are only rewritten while unlinked. The caller runs the
	/// reclaim handshake before changing anything the poller reads.
	fn unlink(&self, inner: &SocketInner, owner: Option<i32>) -> HashLink {
		let Some(state) = &inner.state else { return HashLink::None };
		let mut entry = state.lock_hash_entry();
		let Some(HashEntry { fd, link }) = *entry else { return HashLink::None };
		if owner.is_some_and(|owner| owner != fd) {
			return HashLink::None;
		}

		let removed = match (self.sockets.get(fd), link) {
			(Some(sock), HashLink::Unicast) => self.hashtable.ucast_remove(&self.sockets, sock),
			(Some(sock), HashLink::Multicast) => {
				self.hashtable.mcast_remove(&self.sockets, sock, &sock.mcast_endpoint())
			}
			_ => false,
		};
		debug_assert!(removed, "fd {fd} recorded as indexed but missing from its chain");
		*entry = None;
		link
	}
}

/// Addressing a closing descriptor passes to the duplicate that takes over
/// its hash entry.
struct Addressing {
	bind: Endpoint,
	mcast_ep: McastEndpoint,
	bound: bool,
	connected: bool,
	ip_membership: McastMembership,
	listen: ListenConfig,
}

impl Addressing {
	fn capture(sock: &SocketSlot, inner: &SocketInner) -> Self {
		Self {
			bind: sock.bind_endpoint(),
			mcast_ep: sock.mcast_endpoint(),
			bound: inner.bound,
			connected: inner.connected,
			ip_membership: inner.ip_membership,
			listen: inner.listen,
		}
	}

	/// The record must not be linked.
	fn apply(&self, sock: &SocketSlot, inner: &mut SocketInner) {
		sock.set_bind_endpoint(&self.bind);
		sock.set_mcast_endpoint(&self.mcast_ep);
		inner.bound = self.bound;
		inner.connected = self.connected;
		inner.ip_membership = self.ip_membership;
		inner.listen = self.listen;
	}
}

fn check_valid(fd: i32, inner: &SocketInner) -> Result<(), SocketError> {
	if inner.valid { Ok(()) } else { Err(SocketError::NotValid { fd }) }
}

fn transition_error(fd: i32, from: BypassState, to: BypassState) -> SocketError {
	if from == BypassState::Disabled {
		SocketError::BypassDisabled { fd }
	} else {
		SocketError::InvalidTransition { fd, from, to }
	}
}
