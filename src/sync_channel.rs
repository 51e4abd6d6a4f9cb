//! Blocking point-to-point channels.
//!
//! A synchronous channel is an ephemeral link between this rank and one
//! peer, identified by the pair plus a channel id. Both ends must connect
//! with the same id; the connect handshake returns once the peer's matching
//! connect has been seen. No task is spawned: `send` and `recv` run on the
//! calling thread and block it until the transport completes.

use crate::error::{Error, Result};
use crate::message::{Source, Tag, Transport};
use std::sync::Arc;

/// Channel id carried by the tree edges used for collective operations.
pub const TREE_CHANNEL: u32 = u32::MAX;

const HELLO: &[u8] = b"ppif-sync";

/// A connected synchronous channel. Dropping or disconnecting it releases
/// nothing on the peer; after an error the channel should not be reused.
pub struct SyncChannel {
    transport: Arc<dyn Transport>,
    peer: usize,
    id: u32,
}

impl std::fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("peer", &self.peer)
            .field("id", &self.id)
            .finish()
    }
}

impl SyncChannel {
    /// Connects to `peer` on channel `id`, blocking until the peer has
    /// connected its end.
    pub fn connect(transport: Arc<dyn Transport>, peer: usize, id: u32) -> Result<Self> {
        if peer >= transport.size() {
            return Err(Error::connection(peer, "no such rank"));
        }
        if peer == transport.rank() {
            return Err(Error::connection(peer, "cannot connect a rank to itself"));
        }
        let channel = Self { transport, peer, id };
        let announce = |e: Error| Error::connection(peer, e);

        channel
            .transport
            .send(peer, channel.tag(), HELLO.to_vec())
            .map_err(announce)?;
        let reply = channel
            .transport
            .recv(Source::Rank(peer), channel.tag())
            .map_err(announce)?;
        if reply.payload != HELLO {
            return Err(Error::violation(format!(
                "rank {} answered connect on channel {} with {} bytes of data",
                peer,
                id,
                reply.payload.len()
            )));
        }
        tracing::debug!("sync channel {} to rank {} connected", id, peer);
        Ok(channel)
    }

    /// Closes the channel.
    pub fn disconnect(self) -> Result<()> {
        tracing::debug!("sync channel {} to rank {} disconnected", self.id, self.peer);
        Ok(())
    }

    pub fn peer(&self) -> usize {
        self.peer
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn tag(&self) -> Tag {
        Tag::sync(self.id)
    }

    /// Sends the whole buffer and returns the number of bytes sent.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        self.transport.send(self.peer, self.tag(), buf.to_vec())?;
        Ok(buf.len())
    }

    /// Receives the next message into `buf` and returns its length. A
    /// message longer than `buf` is an error.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let payload = self.recv_vec()?;
        if payload.len() > buf.len() {
            return Err(Error::Transfer(format!(
                "message of {} bytes from rank {} exceeds a {} byte buffer",
                payload.len(),
                self.peer,
                buf.len()
            )));
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    /// Receives the next message whatever its length.
    pub fn recv_vec(&self) -> Result<Vec<u8>> {
        Ok(self.transport.recv(Source::Rank(self.peer), self.tag())?.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MemoryTransport;
    use std::thread;

    fn pair() -> (Arc<dyn Transport>, Arc<dyn Transport>) {
        let mut group = MemoryTransport::group(2).into_iter();
        let a: Arc<dyn Transport> = Arc::new(group.next().unwrap());
        let b: Arc<dyn Transport> = Arc::new(group.next().unwrap());
        (a, b)
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let (a, b) = pair();
        let peer = thread::spawn(move || {
            let channel = SyncChannel::connect(b, 0, 3).unwrap();
            let mut buf = [0; 64];
            let n = channel.recv(&mut buf).unwrap();
            channel.send(&buf[..n]).unwrap();
            channel.disconnect().unwrap();
        });
        let channel = SyncChannel::connect(a, 1, 3).unwrap();
        let message: Vec<u8> = (0..50).collect();
        assert_eq!(channel.send(&message).unwrap(), 50);
        assert_eq!(channel.recv_vec().unwrap(), message);
        peer.join().unwrap();
    }

    #[test]
    fn oversized_messages_are_rejected() {
        let (a, b) = pair();
        let peer = thread::spawn(move || {
            let channel = SyncChannel::connect(b, 0, 0).unwrap();
            channel.send(&[1; 16]).unwrap();
        });
        let channel = SyncChannel::connect(a, 1, 0).unwrap();
        let mut buf = [0; 8];
        assert!(matches!(channel.recv(&mut buf), Err(Error::Transfer(_))));
        peer.join().unwrap();
    }

    #[test]
    fn bad_peers_are_refused() {
        let (a, _b) = pair();
        assert!(matches!(
            SyncChannel::connect(a.clone(), 0, 0),
            Err(Error::Connection { peer: 0, .. })
        ));
        assert!(matches!(
            SyncChannel::connect(a, 9, 0),
            Err(Error::Connection { peer: 9, .. })
        ));
    }
}
