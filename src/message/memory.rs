//! In-process transport connecting a group of threads.

use super::inbox::Inbox;
use super::transport::{Envelope, Source, Tag, Transport};
use crate::error::{Error, Result};
use std::sync::Arc;

/// One endpoint of a group whose members are threads of the current
/// process. Sending moves the payload straight into the destination's
/// inbox, so sends never block.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    rank: usize,
    inboxes: Arc<Vec<Arc<Inbox>>>,
}

impl MemoryTransport {
    /// Creates the endpoints of a group of `size` ranks, indexed by rank.
    pub fn group(size: usize) -> Vec<Self> {
        let inboxes: Arc<Vec<_>> = Arc::new((0..size).map(|_| Arc::new(Inbox::new())).collect());
        (0..size)
            .map(|rank| Self {
                rank,
                inboxes: inboxes.clone(),
            })
            .collect()
    }

    fn inbox(&self) -> &Inbox {
        &self.inboxes[self.rank]
    }
}

impl Transport for MemoryTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.inboxes.len()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let inbox = self
            .inboxes
            .get(dest)
            .ok_or_else(|| Error::connection(dest, "no such rank"))?;
        inbox
            .deliver(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| Error::Transfer(format!("rank {} has shut down", dest)))
    }

    fn recv(&self, source: Source, tag: Tag) -> Result<Envelope> {
        self.inbox().take(source, tag)
    }

    fn discard_before(&self, source: usize, tag: Tag, marker: &[u8]) -> usize {
        self.inbox().discard_before(source, tag, marker)
    }

    fn shutdown(&self) {
        self.inbox().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_reach_the_addressed_rank() {
        let group = MemoryTransport::group(3);
        group[0].send(2, Tag::sync(1), vec![1, 2, 3]).unwrap();
        let e = group[2].recv(Source::Rank(0), Tag::sync(1)).unwrap();
        assert_eq!(e.source, 0);
        assert_eq!(e.payload, vec![1, 2, 3]);
        assert!(group[1].inbox().try_take(Source::Any, Tag::sync(1)).is_none());
    }

    #[test]
    fn send_to_a_shut_down_rank_fails() {
        let group = MemoryTransport::group(2);
        group[1].shutdown();
        assert!(matches!(
            group[0].send(1, Tag::MAILBOX, vec![]),
            Err(Error::Transfer(_))
        ));
        assert!(matches!(
            group[0].send(5, Tag::MAILBOX, vec![]),
            Err(Error::Connection { peer: 5, .. })
        ));
    }
}
