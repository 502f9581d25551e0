//! Socket registry and receive-path demultiplexing for a kernel-bypass
//! network stack.
//!
//! - [`SocketTable`]: descriptor-indexed records shared with the
//!   syscall-interception layer.
//! - [`EndpointHashTable`]: endpoint to descriptor index, read lock-free by
//!   the polling thread.
//! - [`PollSync`]: handshake that lets a record be reused while the polling
//!   thread may still be walking it.
//! - [`BypassStack`]: lifecycle glue tying the three together.

pub mod socket;
mod addr;
mod config;
mod error;
mod hashtable;
mod list;
mod poll_sync;
mod registry;
mod stack;
mod sync;

pub use self::error::{ConfigError, SocketError, errno};
pub use self::addr::{Endpoint, McastEndpoint, McastMembership, SocketAddrV4, INADDR_ANY, in_multicast};
pub use self::config::{StackConfig, DEFAULT_MAX_CAPACITY, DEFAULT_RX_BUFFER_SIZE, DEFAULT_TX_BUFFER_SIZE};
pub use self::hashtable::{EndpointHashTable, HashKey, HASHTABLE_SIZE, HASHTABLE_SIZE_LOG2};
pub use self::list::{ListIter, SocketList};
pub use self::poll_sync::{PollGuard, PollSync};
pub use self::registry::SocketTable;
pub use self::socket::{BypassState, HashEntry, HashLink, ProtocolCtx, SockProto, SocketSlot, NO_FD};
pub use self::stack::BypassStack;
pub use self::sync::{SpinGuard, SpinLock};
