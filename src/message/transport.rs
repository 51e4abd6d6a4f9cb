use crate::error::Result;

/// Match key of a message. The high half of the tag names the kind of link
/// the message travels on, the low half its channel id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub u64);

impl Tag {
    const SYNC: u64 = 1;
    const ASYNC: u64 = 2;
    const MAIL: u64 = 3;

    /// Unsolicited mailbox messages.
    pub const MAILBOX: Tag = Tag(Self::MAIL << 32);

    /// Messages on the synchronous channel with the given id.
    pub fn sync(id: u32) -> Self {
        Tag(Self::SYNC << 32 | id as u64)
    }

    /// Messages on the asynchronous channel with the given id.
    pub fn async_channel(id: u32) -> Self {
        Tag(Self::ASYNC << 32 | id as u64)
    }
}

/// Which peer a receive will accept a message from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Rank(usize),
    Any,
}

impl Source {
    pub fn matches(&self, rank: usize) -> bool {
        match self {
            Source::Rank(r) => *r == rank,
            Source::Any => true,
        }
    }
}

/// A message together with its sender and tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// Interface for a group of processes that can exchange messages. The
/// underlying transport can in principle be TCP, shared memory, or a higher
/// level abstraction like MPI.
///
/// Messages between one pair of ranks that carry the same tag must be
/// delivered in the order they were sent.
pub trait Transport: Send + Sync {
    /// Must be implemented to return the rank of this process within the
    /// group.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of processes in the group.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// not wait for a matching receive to be posted; it returns once the
    /// message has been handed to the transport.
    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive the oldest message matching `source`
    /// and `tag`. This method blocks until such a message arrives, or fails
    /// with [`crate::Error::Closed`] once the transport has been shut down.
    fn recv(&self, source: Source, tag: Tag) -> Result<Envelope>;

    /// Must be implemented to drop the messages from `source` with `tag`
    /// that arrived ahead of the first one whose payload is `marker`, or
    /// all of them if none is. Returns how many were dropped.
    fn discard_before(&self, source: usize, tag: Tag, marker: &[u8]) -> usize;

    /// Stops accepting messages and wakes every blocked receive.
    fn shutdown(&self);
}
