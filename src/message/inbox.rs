//! Matching queue for received messages.

use super::transport::{Envelope, Source, Tag};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    undelivered: VecDeque<Envelope>,
    closed: bool,
}

/// Holds messages that have arrived at this rank but have not been received
/// yet. Several threads may wait on the same inbox for different
/// source/tag pairs; each one is handed the oldest envelope it matches.
#[derive(Debug, Default)]
pub struct Inbox {
    state: Mutex<State>,
    arrived: Condvar,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A receiver that panicked holds no partially updated state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues an arriving envelope and wakes the waiting receivers.
    pub fn deliver(&self, envelope: Envelope) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        state.undelivered.push_back(envelope);
        self.arrived.notify_all();
        Ok(())
    }

    /// Blocks until an envelope matching `source` and `tag` is available and
    /// removes it.
    pub fn take(&self, source: Source, tag: Tag) -> Result<Envelope> {
        let mut state = self.lock();
        loop {
            if let Some(envelope) = Self::extract(&mut state, source, tag) {
                return Ok(envelope);
            }
            if state.closed {
                return Err(Error::Closed);
            }
            state = self
                .arrived
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Removes a matching envelope if one has already arrived.
    pub fn try_take(&self, source: Source, tag: Tag) -> Option<Envelope> {
        Self::extract(&mut self.lock(), source, tag)
    }

    /// Removes the envelopes from `source` with `tag` that precede the
    /// first one carrying `marker`, and returns how many there were.
    pub fn discard_before(&self, source: usize, tag: Tag, marker: &[u8]) -> usize {
        let mut state = self.lock();
        let mut dropped = 0;
        let mut seen_marker = false;
        state.undelivered.retain(|e| {
            if seen_marker || e.source != source || e.tag != tag {
                return true;
            }
            if e.payload == marker {
                seen_marker = true;
                return true;
            }
            dropped += 1;
            false
        });
        dropped
    }

    /// Number of envelopes waiting to be received.
    pub fn pending(&self) -> usize {
        self.lock().undelivered.len()
    }

    /// Rejects further deliveries and wakes all blocked receivers, which
    /// fail with `Closed` once nothing matching is left.
    pub fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn extract(state: &mut State, source: Source, tag: Tag) -> Option<Envelope> {
        state
            .undelivered
            .iter()
            .position(|e| e.tag == tag && source.matches(e.source))
            .and_then(|index| state.undelivered.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn envelope(source: usize, tag: Tag, byte: u8) -> Envelope {
        Envelope {
            source,
            tag,
            payload: vec![byte],
        }
    }

    #[test]
    fn take_matches_source_and_tag() {
        let inbox = Inbox::new();
        inbox.deliver(envelope(1, Tag::sync(0), 10)).unwrap();
        inbox.deliver(envelope(2, Tag::sync(0), 20)).unwrap();
        inbox.deliver(envelope(1, Tag::sync(7), 30)).unwrap();
        inbox.deliver(envelope(1, Tag::sync(0), 40)).unwrap();

        let e = inbox.take(Source::Rank(1), Tag::sync(7)).unwrap();
        assert_eq!(e.payload, vec![30]);
        let e = inbox.take(Source::Rank(1), Tag::sync(0)).unwrap();
        assert_eq!(e.payload, vec![10]);
        let e = inbox.take(Source::Any, Tag::sync(0)).unwrap();
        assert_eq!(e.payload, vec![20]);
        assert_eq!(inbox.pending(), 1);
        assert!(inbox.try_take(Source::Rank(2), Tag::sync(0)).is_none());
    }

    #[test]
    fn discard_stops_at_the_marker() {
        let inbox = Inbox::new();
        let tag = Tag::async_channel(0);
        inbox.deliver(envelope(1, tag, 1)).unwrap();
        inbox.deliver(envelope(2, tag, 2)).unwrap();
        inbox.deliver(envelope(1, Tag::sync(0), 3)).unwrap();
        inbox.deliver(envelope(1, tag, 4)).unwrap();
        inbox.deliver(envelope(1, tag, 0)).unwrap();
        inbox.deliver(envelope(1, tag, 5)).unwrap();

        assert_eq!(inbox.discard_before(1, tag, &[0]), 2);
        assert_eq!(inbox.pending(), 4);
        assert_eq!(inbox.take(Source::Rank(1), tag).unwrap().payload, vec![0]);
        assert_eq!(inbox.take(Source::Rank(1), tag).unwrap().payload, vec![5]);
        assert_eq!(inbox.discard_before(2, tag, &[0]), 1);
        assert_eq!(inbox.pending(), 1);
    }

    #[test]
    fn close_wakes_blocked_receivers() {
        let inbox = Arc::new(Inbox::new());
        let waiter = {
            let inbox = inbox.clone();
            thread::spawn(move || inbox.take(Source::Any, Tag::MAILBOX))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        inbox.close();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Closed)));
        assert!(matches!(
            inbox.deliver(envelope(0, Tag::MAILBOX, 0)),
            Err(Error::Closed)
        ));
    }
}
