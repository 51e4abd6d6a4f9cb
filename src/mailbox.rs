//! Best-effort delivery of small unsolicited messages.
//!
//! Each process runs one receiver task that accepts every message sent to
//! it with [`Tag::MAILBOX`], whoever the sender, and appends it to a bounded
//! ring. A full ring never blocks the task: the message is dropped and
//! counted, and the count is reported once by the next [`Mailbox::get`].

use crate::error::{Error, Result};
use crate::message::{Source, Tag, Transport};
use crate::task::TaskSpawner;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

const REQUEST_ID_BYTES: usize = 4;

/// One received unsolicited message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub source: usize,
    pub request_id: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<Mail>,
    capacity: usize,
    dropped: u64,
}

impl Ring {
    fn push(&mut self, mail: Mail) -> bool {
        if self.entries.len() < self.capacity {
            self.entries.push_back(mail);
            true
        } else {
            self.dropped += 1;
            false
        }
    }
}

pub struct Mailbox {
    transport: Arc<dyn Transport>,
    ring: Arc<Mutex<Ring>>,
    max_size: usize,
    task: Option<JoinHandle<()>>,
}

fn lock(ring: &Mutex<Ring>) -> MutexGuard<'_, Ring> {
    ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Mailbox {
    /// Starts the receiver task. The task runs until the transport is shut
    /// down.
    pub fn start(transport: Arc<dyn Transport>, spawner: &TaskSpawner, capacity: usize, max_size: usize) -> Result<Self> {
        let ring = Arc::new(Mutex::new(Ring {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }));
        let task = {
            let transport = transport.clone();
            let ring = ring.clone();
            spawner.spawn(format!("ppif-mail-{}", transport.rank()), move || {
                receive_mail(transport.as_ref(), &ring)
            })?
        };
        Ok(Self {
            transport,
            ring,
            max_size,
            task: Some(task),
        })
    }

    /// Sends `payload` to the mailbox of `dest` without waiting for it to be
    /// picked up. Delivery is not guaranteed: a full mailbox drops it.
    pub fn send(&self, dest: usize, request_id: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_size {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }
        let mut frame = Vec::with_capacity(REQUEST_ID_BYTES + payload.len());
        frame.extend_from_slice(&request_id.to_le_bytes());
        frame.extend_from_slice(payload);
        self.transport.send(dest, Tag::MAILBOX, frame)
    }

    /// Returns the oldest unread message, or `None` if there is none. If
    /// messages were dropped since the last call, the drop count is reported
    /// instead as [`Error::Overflow`], and the count starts over.
    pub fn get(&self) -> Result<Option<Mail>> {
        let mut ring = lock(&self.ring);
        if ring.dropped > 0 {
            let dropped = std::mem::take(&mut ring.dropped);
            return Err(Error::Overflow { dropped });
        }
        Ok(ring.entries.pop_front())
    }

    /// Number of buffered messages and of drops not yet reported.
    pub fn occupancy(&self) -> (usize, u64) {
        let ring = lock(&self.ring);
        (ring.entries.len(), ring.dropped)
    }

    /// Waits for the receiver task to exit; the transport must already be
    /// shut down.
    pub(crate) fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if task.join().is_err() {
                tracing::error!("mailbox receiver task panicked");
            }
        }
    }
}

fn receive_mail(transport: &dyn Transport, ring: &Mutex<Ring>) {
    loop {
        let envelope = match transport.recv(Source::Any, Tag::MAILBOX) {
            Ok(envelope) => envelope,
            Err(Error::Closed) => break,
            Err(e) => {
                tracing::error!("mailbox receive failed: {}", e);
                break;
            }
        };
        let mut slots = lock(ring);
        if envelope.payload.len() < REQUEST_ID_BYTES {
            tracing::warn!("malformed mail from rank {} dropped", envelope.source);
            slots.dropped += 1;
            continue;
        }
        let mut request_id = [0; REQUEST_ID_BYTES];
        request_id.copy_from_slice(&envelope.payload[..REQUEST_ID_BYTES]);
        let mail = Mail {
            source: envelope.source,
            request_id: u32::from_le_bytes(request_id),
            payload: envelope.payload[REQUEST_ID_BYTES..].to_vec(),
        };
        if !slots.push(mail) {
            tracing::warn!(
                "mailbox full, message from rank {} dropped ({} dropped so far)",
                envelope.source,
                slots.dropped
            );
        }
    }
    tracing::trace!("mailbox receiver exits");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MemoryTransport;
    use std::time::{Duration, Instant};

    fn start(group: &[MemoryTransport], rank: usize, capacity: usize) -> Mailbox {
        let spawner = TaskSpawner::new(false);
        Mailbox::start(Arc::new(group[rank].clone()), &spawner, capacity, 16).unwrap()
    }

    fn settle(mailbox: &Mailbox, expected: usize) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            let (buffered, dropped) = mailbox.occupancy();
            if buffered + dropped as usize >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn mail_arrives_with_source_and_request_id() {
        let group = MemoryTransport::group(2);
        let mut inbox = start(&group, 0, 4);
        let outbox = start(&group, 1, 4);

        outbox.send(0, 77, b"ping").unwrap();
        settle(&inbox, 1);
        let mail = inbox.get().unwrap().unwrap();
        assert_eq!(mail, Mail { source: 1, request_id: 77, payload: b"ping".to_vec() });
        assert_eq!(inbox.get().unwrap(), None);

        group[0].shutdown();
        inbox.join();
    }

    #[test]
    fn overflow_is_counted_and_reported_once() {
        let group = MemoryTransport::group(2);
        let inbox = start(&group, 0, 3);
        let outbox = start(&group, 1, 3);

        for i in 0..5u32 {
            outbox.send(0, i, &[i as u8]).unwrap();
        }
        settle(&inbox, 5);
        assert!(matches!(inbox.get(), Err(Error::Overflow { dropped: 2 })));
        let ids: Vec<_> = (0..3).map(|_| inbox.get().unwrap().unwrap().request_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(inbox.get().unwrap(), None);

        outbox.send(0, 9, b"").unwrap();
        settle(&inbox, 1);
        assert_eq!(inbox.get().unwrap().unwrap().request_id, 9);
    }

    #[test]
    fn oversized_mail_is_refused() {
        let group = MemoryTransport::group(2);
        let outbox = start(&group, 1, 1);
        assert!(matches!(
            outbox.send(0, 0, &[0; 17]),
            Err(Error::MessageTooLarge { size: 17, max: 16 })
        ));
    }
}
