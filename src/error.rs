//! Error types for the processor interface.

use thiserror::Error;

/// Result type for processor interface operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building the group or moving messages.
#[derive(Debug, Error)]
pub enum Error {
    /// A peer could not be reached while building the tree or connecting a
    /// channel.
    #[error("connection to rank {peer} failed: {reason}")]
    Connection { peer: usize, reason: String },

    /// A fixed-capacity pool has no free entries left.
    #[error("{resource} exhausted (capacity {capacity})")]
    ResourceExhausted {
        resource: &'static str,
        capacity: usize,
    },

    /// The underlying transport failed while moving a message.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Unsolicited messages were dropped because the mailbox was full.
    #[error("mailbox overflow: {dropped} message(s) dropped")]
    Overflow { dropped: u64 },

    /// A handle was used outside of its lifecycle, or an operation was
    /// called where the tree does not allow it.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A payload exceeds a configured maximum.
    #[error("message too large: {size} bytes exceeds max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Invalid configuration or host arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The local transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// A bounded wait elapsed before the poll completed.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn connection(peer: usize, reason: impl ToString) -> Self {
        Self::Connection {
            peer,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }
}
