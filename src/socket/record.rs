use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::addr::{Endpoint, McastEndpoint, McastMembership};
use super::{BypassState, EpollMembership, ReadyFlags, SharedState, SockProto, SocketOptions, Warnings};

/// End-of-chain / end-of-list marker.
pub const NO_FD: i32 = -1;

/// Opaque per-socket protocol context.
///
/// The core stores and hands these out but never looks inside.
#[derive(Clone)]
pub enum ProtocolCtx {
	Tcp(Arc<dyn Any + Send + Sync>),
	Udp(Arc<dyn Any + Send + Sync>),
}

impl ProtocolCtx {
	pub fn proto(&self) -> SockProto {
		match self {
			ProtocolCtx::Tcp(_) => SockProto::Tcp,
			ProtocolCtx::Udp(_) => SockProto::Udp,
		}
	}

	/// Borrows the context as its concrete protocol type.
	pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
		match self {
			ProtocolCtx::Tcp(ctx) | ProtocolCtx::Udp(ctx) => ctx.downcast_ref::<T>(),
		}
	}
}

impl std::fmt::Debug for ProtocolCtx {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ProtocolCtx::Tcp(_) => f.write_str("ProtocolCtx::Tcp(..)"),
			ProtocolCtx::Udp(_) => f.write_str("ProtocolCtx::Udp(..)"),
		}
	}
}

/// Interfaces a socket receives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenScope {
	#[default]
	AllInterfaces,
	/// A single interface, identified by its address (network byte order).
	Interface(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenConfig {
	pub scope: ListenScope,
	/// Listening on an interface through a joined multicast group.
	pub mcast: bool,
}

impl ListenConfig {
	pub fn all_if(&self) -> bool {
		self.scope == ListenScope::AllInterfaces
	}

	pub fn interface(&self) -> Option<u32> {
		match self.scope {
			ListenScope::Interface(addr) => Some(addr),
			ListenScope::AllInterfaces => None,
		}
	}
}

/// Which hash chain a socket is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashLink {
	#[default]
	None,
	Unicast,
	Multicast,
}

/// Per-descriptor state guarded by the record lock.
///
/// Read lock for every operation using the socket, write lock for
/// creating or tearing down its hash entry, shared state and buffers.
#[derive(Debug, Clone, Default)]
pub struct SocketInner {
	pub domain: i32,
	pub sock_type: i32,
	pub protocol: i32,
	pub flags: i32,

	pub bound: bool,
	pub connected: bool,
	pub valid: bool,

	/// Acceleration engine connection, `None` when not offloaded.
	pub ate_id: Option<i32>,
	pub ate_init_pending: bool,

	/// SO_BINDTODEVICE was applied.
	pub bound_to_device: bool,
	pub listen: ListenConfig,

	pub ctx: Option<ProtocolCtx>,
	pub state: Option<Arc<SharedState>>,

	/// Local copy of the shared readiness, for edge detection.
	pub ready: ReadyFlags,
	/// TCP sockets need polling for read readiness.
	pub need_rx_ready_poll: bool,

	pub options: SocketOptions,
	pub ip_membership: McastMembership,

	pub epoll: EpollMembership,
	/// Descriptor of the epoll emulation instance this socket belongs to.
	pub notify_parent: Option<i32>,
	/// Member of the parent's kernel epoll instance.
	pub kern_epoll_member: bool,

	pub warn: Warnings,
}

impl SocketInner {
	pub fn uses_ate(&self) -> bool {
		self.ate_id.is_some()
	}

	/// Chain this descriptor's record is linked into. A duplicate that
	/// does not own the socket's entry reports `HashLink::None`.
	pub fn hash_link(&self, fd: i32) -> HashLink {
		match self.state.as_ref().and_then(|s| s.hash_entry()) {
			Some(entry) if entry.fd == fd => entry.link,
			_ => HashLink::None,
		}
	}

	pub fn proto(&self) -> Option<SockProto> {
		SockProto::from_type(self.sock_type)
	}
}

/// Bound endpoint stored word by word so the poller can read it without
/// taking the record lock.
#[derive(Debug, Default)]
struct AtomicEndpoint {
	local_addr: AtomicU32,
	peer_addr: AtomicU32,
	/// `local_port << 16 | peer_port`
	ports: AtomicU32,
}

impl AtomicEndpoint {
	fn load(&self) -> Endpoint {
		let ports = self.ports.load(Ordering::Acquire);
		Endpoint {
			local_addr: self.local_addr.load(Ordering::Acquire),
			peer_addr: self.peer_addr.load(Ordering::Acquire),
			local_port: (ports >> 16) as u16,
			peer_port: ports as u16,
		}
	}

	fn store(&self, ep: &Endpoint) {
		self.local_addr.store(ep.local_addr, Ordering::Release);
		self.peer_addr.store(ep.peer_addr, Ordering::Release);
		self.ports.store((ep.local_port as u32) << 16 | ep.peer_port as u32, Ordering::Release);
	}
}

#[derive(Debug, Default)]
struct AtomicMcastEndpoint {
	multiaddr: AtomicU32,
	interface: AtomicU32,
}

impl AtomicMcastEndpoint {
	fn load(&self) -> McastEndpoint {
		McastEndpoint {
			multiaddr: self.multiaddr.load(Ordering::Acquire),
			interface: self.interface.load(Ordering::Acquire),
		}
	}

	fn store(&self, ep: &McastEndpoint) {
		self.multiaddr.store(ep.multiaddr, Ordering::Release);
		self.interface.store(ep.interface, Ordering::Release);
	}
}

/// One slot of the socket table.
///
/// Slots are never freed, only zeroed. Fields the receive path reads
/// (bound endpoint, multicast group, bypass state, chain link) live outside
/// the lock as atomics; everything else sits behind the record lock.
#[derive(Debug)]
pub struct SocketSlot {
	fd: i32,
	gen_id: AtomicU32,
	bypass_state: AtomicU8,
	/// Must not change while the record is linked into the hash index.
	bind: AtomicEndpoint,
	mcast_ep: AtomicMcastEndpoint,
	/// Next record in the same hash bucket. Only meaningful while linked.
	pub(crate) hashtable_next_fd: AtomicI32,
	pub(crate) list_prev: AtomicI32,
	pub(crate) list_next: AtomicI32,
	lock: RwLock<SocketInner>,
}

impl SocketSlot {
	pub(crate) fn new(fd: i32) -> Self {
		Self {
			fd,
			gen_id: AtomicU32::new(0),
			bypass_state: AtomicU8::new(BypassState::Disabled as u8),
			bind: AtomicEndpoint::default(),
			mcast_ep: AtomicMcastEndpoint::default(),
			hashtable_next_fd: AtomicI32::new(NO_FD),
			list_prev: AtomicI32::new(NO_FD),
			list_next: AtomicI32::new(NO_FD),
			lock: RwLock::new(SocketInner::default()),
		}
	}

	#[inline]
	pub(crate) fn fd(&self) -> i32 {
		self.fd
	}

	/// Incremented every time the slot is zeroed.
	pub fn gen_id(&self) -> u32 {
		self.gen_id.load(Ordering::Acquire)
	}

	#[inline]
	pub fn bypass_state(&self) -> BypassState {
		BypassState::from_raw(self.bypass_state.load(Ordering::Acquire))
	}

	/// Sets the state of a freshly created record, bypassing the ordering.
	pub(crate) fn init_bypass_state(&self, state: BypassState) {
		self.bypass_state.store(state as u8, Ordering::Release);
	}

	/// Moves the bypass state to `to` if the ordering allows it.
	///
	/// Returns the previous state, or the current state on refusal.
	pub(crate) fn transition_bypass(&self, to: BypassState) -> Result<BypassState, BypassState> {
		let mut current = self.bypass_state.load(Ordering::Acquire);
		loop {
			let from = BypassState::from_raw(current);
			if !from.can_transition(to) {
				return Err(from);
			}
			match self.bypass_state.compare_exchange_weak(
				current,
				to as u8,
				Ordering::AcqRel,
				Ordering::Acquire,
			) {
				Ok(_) => return Ok(from),
				Err(actual) => current = actual,
			}
		}
	}

	#[inline]
	pub fn bind_endpoint(&self) -> Endpoint {
		self.bind.load()
	}

	/// Writes the bound endpoint. Must not be called while the record is
	/// linked into the hash index.
	pub fn set_bind_endpoint(&self, ep: &Endpoint) {
		self.bind.store(ep);
	}

	/// Multicast group used as the hash key of a multicast entry.
	#[inline]
	pub fn mcast_endpoint(&self) -> McastEndpoint {
		self.mcast_ep.load()
	}

	/// Same restriction as [`set_bind_endpoint`](Self::set_bind_endpoint).
	pub fn set_mcast_endpoint(&self, ep: &McastEndpoint) {
		self.mcast_ep.store(ep);
	}

	#[inline]
	pub fn hashtable_next_fd(&self) -> i32 {
		self.hashtable_next_fd.load(Ordering::Acquire)
	}

	pub fn read(&self) -> RwLockReadGuard<'_, SocketInner> {
		self.lock.read()
	}

	pub fn write(&self) -> RwLockWriteGuard<'_, SocketInner> {
		self.lock.write()
	}

	pub fn is_valid(&self) -> bool {
		self.lock.read().valid
	}

	/// Resets the slot to its freshly allocated state and bumps the
	/// generation. The caller holds the write lock and has already unlinked
	/// the record from the hash index and the socket list.
	pub(crate) fn zero(&self, inner: &mut SocketInner) {
		*inner = SocketInner::default();
		self.bypass_state.store(BypassState::Disabled as u8, Ordering::Release);
		self.bind.store(&Endpoint::default());
		self.mcast_ep.store(&McastEndpoint::default());
		self.hashtable_next_fd.store(NO_FD, Ordering::Release);
		self.list_prev.store(NO_FD, Ordering::Release);
		self.list_next.store(NO_FD, Ordering::Release);
		self.gen_id.fetch_add(1, Ordering::AcqRel);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::addr::SocketAddrV4;

	#[test]
	fn endpoint_words_round_trip() {
		let slot = SocketSlot::new(7);
		let ep = Endpoint::new(
			SocketAddrV4::new([10, 0, 0, 1], 5000),
			SocketAddrV4::new([10, 0, 0, 2], 65535),
		);
		slot.set_bind_endpoint(&ep);
		assert_eq!(slot.bind_endpoint(), ep);
	}

	#[test]
	fn zero_bumps_generation_and_clears() {
		let slot = SocketSlot::new(3);
		{
			let mut inner = slot.write();
			inner.valid = true;
			inner.bound = true;
			slot.set_bind_endpoint(&Endpoint::bound(SocketAddrV4::new([1, 2, 3, 4], 80)));
			slot.bypass_state.store(BypassState::Avail as u8, Ordering::Release);
		}
		let gen_before = slot.gen_id();

		let mut inner = slot.write();
		slot.zero(&mut inner);
		assert!(!inner.valid && !inner.bound);
		drop(inner);

		assert_eq!(slot.gen_id(), gen_before + 1);
		assert_eq!(slot.bind_endpoint(), Endpoint::default());
		assert_eq!(slot.bypass_state(), BypassState::Disabled);
		assert_eq!(slot.hashtable_next_fd(), NO_FD);
	}

	#[test]
	fn disabled_refuses_transitions() {
		let slot = SocketSlot::new(0);
		assert_eq!(slot.transition_bypass(BypassState::Avail), Err(BypassState::Disabled));
		assert_eq!(slot.bypass_state(), BypassState::Disabled);
	}

	#[test]
	fn ctx_downcasts_to_concrete_type() {
		struct UdpCtx {
			port: u16,
		}
		let ctx = ProtocolCtx::Udp(Arc::new(UdpCtx { port: 53 }));
		assert_eq!(ctx.proto(), SockProto::Udp);
		assert_eq!(ctx.downcast_ref::<UdpCtx>().map(|c| c.port), Some(53));
		assert!(ctx.downcast_ref::<u32>().is_none());
	}
}
