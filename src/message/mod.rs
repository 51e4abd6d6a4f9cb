//! Point-to-point message transports.
//!
//! Everything above this module is written against the [`Transport`] trait.
//! Implementors only need to deliver tagged byte buffers to a peer and hand
//! out received buffers by source and tag; a pure-Rust TCP implementation is
//! included in [`TcpTransport`], and [`MemoryTransport`] connects threads of
//! a single process for testing and single-host runs.

mod inbox;
mod memory;
mod tcp;
mod transport;
mod util;

pub use inbox::Inbox;
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use transport::{Envelope, Source, Tag, Transport};
