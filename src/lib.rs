//! PPIF is a parallel processor interface: the message-passing substrate
//! underneath a distributed mesh and solver framework. A fixed group of
//! processes is arranged both as a 3-D Cartesian array and as a spanning
//! tree embedded in that array, and exchanges opaque byte buffers through
//!
//! - synchronous channels, which block the caller for each transfer
//!   ([`sync_channel`]);
//! - asynchronous channels, where a sender and a receiver task per channel
//!   move queued buffers while the caller keeps working and polls for
//!   completion ([`async_channel`]);
//! - collective operations along the tree: broadcast, concentrate, spread
//!   and a barrier ([`collective`]);
//! - a best-effort mailbox for small unsolicited messages ([`mailbox`]).
//!
//! The group is joined with [`Ppif::init`] over any [`message::Transport`].
//! [`message::TcpTransport`] runs one process per rank over TCP, and
//! [`message::MemoryTransport`] runs the ranks as threads of one process.
//!
//! ```no_run
//! use ppif::{message::MemoryTransport, Config, Ppif};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let handles: Vec<_> = MemoryTransport::group(8)
//!     .into_iter()
//!     .map(|transport| {
//!         thread::spawn(move || -> ppif::Result<()> {
//!             let ppif = Ppif::init(Arc::new(transport), Config::default())?;
//!             let mut value = if ppif.me() == ppif.master() { [42] } else { [0] };
//!             ppif.broadcast(&mut value)?;
//!             assert_eq!(value, [42]);
//!             ppif.synchronize()?;
//!             ppif.exit()
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap().unwrap();
//! }
//! ```
//!
//! It does _not_ attempt to
//!
//! - Change the group after start-up. The number of processes and the
//!   topology are fixed for the lifetime of a run.
//! - Detect or replace lost peers. A blocking call against a peer that has
//!   gone away blocks forever.
//! - Impose timeouts. All blocking is indefinite; the non-blocking polls can
//!   be wrapped in [`async_channel::wait_for`] for a bounded wait.
//! - Interpret payloads. Byte order and structure belong to the callers.

pub mod async_channel;
pub mod collective;
pub mod config;
pub mod error;
pub mod fifo;
pub mod group;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod sync_channel;
pub mod task;
pub mod topology;

pub use async_channel::{wait_for, CarrierId, ChannelId, LinkState};
pub use config::{Config, HostArgs};
pub use error::{Error, Result};
pub use group::{Ppif, Usage};
pub use mailbox::Mail;
pub use sync_channel::SyncChannel;
pub use topology::{Axis, Coord, Dims};
