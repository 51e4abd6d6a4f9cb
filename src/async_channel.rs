//! Task-backed asynchronous channels.
//!
//! Every open channel owns a slot in the channel arena holding two
//! [`Fifo`]s and two background tasks. The sender task takes carriers off
//! the outgoing queue and pushes their payload to the peer; the receiver
//! task takes carriers off the incoming queue and fills each with the next
//! message from the peer. The application only enqueues carriers and polls
//! for their completion, so transfers overlap with its own work.
//!
//! Teardown is cooperative: `disconnect` enqueues a terminate command behind
//! whatever is already queued, each task exits when it reaches it, and
//! `info_disc` frees the slot once both tasks are gone.

use crate::error::{Error, Result};
use crate::fifo::Fifo;
use crate::message::{Source, Tag, Transport};
use crate::registry::{Key, SlotArena};
use crate::task::TaskSpawner;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Poll;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const HELLO: &[u8] = b"ppif-async";

/// Handle of an open asynchronous channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(Key);

/// Handle of one queued send or receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CarrierId(Key);

/// Progress of one direction of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// The task has not yet exchanged the connect announcement.
    Connecting,
    Live,
    /// The task drained its queue and exited.
    Closed,
    /// The transport failed; queued carriers fail without being attempted.
    Failed,
}

#[derive(Debug)]
struct Liveness(AtomicU8);

impl Liveness {
    fn new() -> Self {
        Self(AtomicU8::new(LinkState::Connecting as u8))
    }

    fn get(&self) -> LinkState {
        match self.0.load(Ordering::Acquire) {
            0 => LinkState::Connecting,
            1 => LinkState::Live,
            2 => LinkState::Closed,
            _ => LinkState::Failed,
        }
    }

    fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release)
    }

    fn failed(&self) -> bool {
        self.get() == LinkState::Failed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Send,
    Recv,
}

#[derive(Debug)]
enum CarrierState {
    Queued,
    Complete(Vec<u8>),
    Failed(String),
}

/// A pooled descriptor of one in-flight transfer. The task that owns the
/// transfer writes the outcome; the application reads it when polling.
#[derive(Debug)]
struct Carrier {
    channel: ChannelId,
    direction: Direction,
    size: usize,
    state: Mutex<CarrierState>,
}

impl Carrier {
    fn finish(&self, outcome: CarrierState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = outcome;
    }

    fn take_outcome(&self) -> CarrierState {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match &*state {
            CarrierState::Queued => CarrierState::Queued,
            _ => std::mem::replace(&mut *state, CarrierState::Queued),
        }
    }
}

enum Command {
    Transfer(Arc<Carrier>, Vec<u8>),
    Terminate,
}

struct Link {
    peer: usize,
    id: u32,
    outgoing: Fifo<Command>,
    incoming: Fifo<Command>,
    send_state: Arc<Liveness>,
    recv_state: Arc<Liveness>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
    disconnecting: bool,
}

impl Link {
    fn tasks_finished(&self) -> bool {
        [&self.sender, &self.receiver]
            .iter()
            .all(|task| task.as_ref().map_or(true, |t| t.is_finished()))
    }

    fn terminate(&mut self) {
        if !self.disconnecting {
            self.disconnecting = true;
            self.outgoing.put(Command::Terminate);
            self.incoming.put(Command::Terminate);
        }
    }
}

/// The asynchronous channels of one process, together with the pool of
/// carriers their transfers are described by.
pub struct AsyncChannels {
    transport: Arc<dyn Transport>,
    spawner: Arc<TaskSpawner>,
    links: Mutex<SlotArena<Link>>,
    carriers: Mutex<SlotArena<Arc<Carrier>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AsyncChannels {
    pub fn new(transport: Arc<dyn Transport>, spawner: Arc<TaskSpawner>, max_channels: usize, max_carriers: usize) -> Self {
        Self {
            transport,
            spawner,
            links: Mutex::new(SlotArena::new("channel slot", max_channels)),
            carriers: Mutex::new(SlotArena::new("message carrier", max_carriers)),
        }
    }

    /// Opens a channel to `peer` with id `id` and starts its sender and
    /// receiver tasks. Returns immediately; use [`Self::info_conn`] to learn
    /// when the peer has connected its end.
    pub fn connect(&self, peer: usize, id: u32) -> Result<ChannelId> {
        if peer >= self.transport.size() || peer == self.transport.rank() {
            return Err(Error::connection(peer, "not a peer of this rank"));
        }
        let mut links = lock(&self.links);
        if links.iter().any(|(_, l)| l.peer == peer && l.id == id) {
            return Err(Error::violation(format!(
                "channel {} to rank {} is already open",
                id, peer
            )));
        }
        let key = links.insert(Link {
            peer,
            id,
            outgoing: Fifo::new(),
            incoming: Fifo::new(),
            send_state: Arc::new(Liveness::new()),
            recv_state: Arc::new(Liveness::new()),
            sender: None,
            receiver: None,
            disconnecting: false,
        })?;

        let started = {
            let link = links.lookup_mut(key)?;
            self.start_tasks(link)
        };
        if let Err(e) = started {
            if let Some(mut link) = links.remove(key) {
                link.terminate();
            }
            return Err(e.into());
        }
        tracing::debug!("async channel {} to rank {} opened", id, peer);
        Ok(ChannelId(key))
    }

    fn start_tasks(&self, link: &mut Link) -> std::io::Result<()> {
        let tag = Tag::async_channel(link.id);
        let peer = link.peer;

        let transport = self.transport.clone();
        let queue = link.outgoing.clone();
        let state = link.send_state.clone();
        link.sender = Some(self.spawner.spawn(
            format!("ppif-send-{}-{}", peer, link.id),
            move || run_sender(transport.as_ref(), peer, tag, &queue, &state),
        )?);

        let transport = self.transport.clone();
        let queue = link.incoming.clone();
        let state = link.recv_state.clone();
        link.receiver = Some(self.spawner.spawn(
            format!("ppif-recv-{}-{}", peer, link.id),
            move || run_receiver(transport.as_ref(), peer, tag, &queue, &state),
        )?);
        Ok(())
    }

    /// Polls connection progress: ready once both tasks have exchanged the
    /// connect announcement with the peer.
    pub fn info_conn(&self, channel: ChannelId) -> Result<Poll<()>> {
        let links = lock(&self.links);
        let link = links.lookup(channel.0)?;
        let states = [link.send_state.get(), link.recv_state.get()];

        if states.contains(&LinkState::Failed) {
            Err(Error::connection(link.peer, format!("channel {} failed", link.id)))
        } else if states.contains(&LinkState::Connecting) {
            Ok(Poll::Pending)
        } else {
            Ok(Poll::Ready(()))
        }
    }

    /// Queues `payload` for sending and returns at once.
    pub fn send(&self, channel: ChannelId, payload: Vec<u8>) -> Result<CarrierId> {
        let size = payload.len();
        self.enqueue(channel, Direction::Send, size, payload)
    }

    /// Queues the receipt of one message of at most `size` bytes and
    /// returns at once.
    pub fn recv(&self, channel: ChannelId, size: usize) -> Result<CarrierId> {
        self.enqueue(channel, Direction::Recv, size, Vec::new())
    }

    fn enqueue(&self, channel: ChannelId, direction: Direction, size: usize, payload: Vec<u8>) -> Result<CarrierId> {
        let links = lock(&self.links);
        let link = links.lookup(channel.0)?;
        if link.disconnecting {
            return Err(Error::violation(format!(
                "channel {} to rank {} is disconnecting",
                link.id, link.peer
            )));
        }
        let carrier = Arc::new(Carrier {
            channel,
            direction,
            size,
            state: Mutex::new(CarrierState::Queued),
        });
        let key = lock(&self.carriers).insert(carrier.clone())?;
        let queue = match direction {
            Direction::Send => &link.outgoing,
            Direction::Recv => &link.incoming,
        };
        queue.put(Command::Transfer(carrier, payload));
        Ok(CarrierId(key))
    }

    /// Polls a queued send. A completed or failed carrier is released when
    /// its outcome is reported, so each carrier reports exactly once.
    pub fn info_send(&self, channel: ChannelId, carrier: CarrierId) -> Result<Poll<()>> {
        Ok(self.poll_carrier(channel, carrier, Direction::Send)?.map(|_| ()))
    }

    /// Polls a queued receive; the message is handed over on completion.
    pub fn info_recv(&self, channel: ChannelId, carrier: CarrierId) -> Result<Poll<Vec<u8>>> {
        self.poll_carrier(channel, carrier, Direction::Recv)
    }

    fn poll_carrier(&self, channel: ChannelId, id: CarrierId, direction: Direction) -> Result<Poll<Vec<u8>>> {
        let links = lock(&self.links);
        let link = links.lookup(channel.0)?;
        let mut carriers = lock(&self.carriers);
        let carrier = carriers.lookup(id.0)?.clone();

        if carrier.channel != channel || carrier.direction != direction {
            return Err(Error::violation(format!(
                "carrier does not belong to this {:?} direction of channel {}",
                direction, link.id
            )));
        }
        let liveness = match direction {
            Direction::Send => &link.send_state,
            Direction::Recv => &link.recv_state,
        };
        match carrier.take_outcome() {
            CarrierState::Complete(data) => {
                carriers.remove(id.0);
                Ok(Poll::Ready(data))
            }
            CarrierState::Failed(reason) => {
                carriers.remove(id.0);
                Err(Error::Transfer(reason))
            }
            CarrierState::Queued if liveness.failed() => {
                carriers.remove(id.0);
                Err(Error::Transfer(format!(
                    "channel {} to rank {} has failed",
                    link.id, link.peer
                )))
            }
            CarrierState::Queued => Ok(Poll::Pending),
        }
    }

    /// Requests teardown. Carriers already queued are still transferred;
    /// the tasks exit once they reach the end of their queues.
    pub fn disconnect(&self, channel: ChannelId) -> Result<()> {
        let mut links = lock(&self.links);
        let link = links.lookup_mut(channel.0)?;
        if link.disconnecting {
            return Err(Error::violation(format!(
                "channel {} to rank {} is already disconnecting",
                link.id, link.peer
            )));
        }
        link.terminate();
        tracing::debug!("async channel {} to rank {} disconnecting", link.id, link.peer);
        Ok(())
    }

    /// Polls teardown progress. Once both tasks have exited the slot is
    /// freed, along with any carriers of the channel that were never
    /// reported, and `channel` becomes invalid.
    pub fn info_disc(&self, channel: ChannelId) -> Result<Poll<()>> {
        let mut links = lock(&self.links);
        let link = links.lookup(channel.0)?;
        if !link.disconnecting {
            return Err(Error::violation(format!(
                "channel {} to rank {} was not disconnected",
                link.id, link.peer
            )));
        }
        if !link.tasks_finished() {
            return Ok(Poll::Pending);
        }
        let mut link = match links.remove(channel.0) {
            Some(link) => link,
            None => return Err(Error::violation("channel vanished while polling")),
        };
        let released = lock(&self.carriers).remove_where(|c| c.channel == channel);
        let stale = self
            .transport
            .discard_before(link.peer, Tag::async_channel(link.id), HELLO);
        tracing::debug!(
            "async channel {} to rank {} closed ({} unreported carriers released, {} unreceived messages dropped)",
            link.id,
            link.peer,
            released,
            stale
        );
        for task in [link.sender.take(), link.receiver.take()].into_iter().flatten() {
            if task.join().is_err() {
                return Err(Error::Transfer(format!("a task of channel {} panicked", link.id)));
            }
        }
        Ok(Poll::Ready(()))
    }

    /// Number of carriers of `channel` whose outcome has not been reported.
    pub fn outstanding(&self, channel: ChannelId) -> Result<usize> {
        lock(&self.links).lookup(channel.0)?;
        Ok(lock(&self.carriers).iter().filter(|(_, c)| c.channel == channel).count())
    }

    /// State of the send and receive directions of `channel`.
    pub fn link_state(&self, channel: ChannelId) -> Result<(LinkState, LinkState)> {
        let links = lock(&self.links);
        let link = links.lookup(channel.0)?;
        Ok((link.send_state.get(), link.recv_state.get()))
    }

    pub fn open_channels(&self) -> usize {
        lock(&self.links).len()
    }

    pub fn live_carriers(&self) -> usize {
        lock(&self.carriers).len()
    }

    /// Requests teardown of every channel not already disconnecting, and
    /// returns how many that were.
    pub(crate) fn terminate_all(&self) -> usize {
        let mut links = lock(&self.links);
        let keys: Vec<_> = links.iter().filter(|(_, l)| !l.disconnecting).map(|(k, _)| k).collect();
        for key in &keys {
            if let Some(link) = links.get_mut(*key) {
                link.terminate();
            }
        }
        keys.len()
    }
}

fn run_sender(transport: &dyn Transport, peer: usize, tag: Tag, queue: &Fifo<Command>, state: &Liveness) {
    match transport.send(peer, tag, HELLO.to_vec()) {
        Ok(()) => state.set(LinkState::Live),
        Err(e) => {
            tracing::error!("async channel to rank {}: connect failed: {}", peer, e);
            state.set(LinkState::Failed)
        }
    }
    while let Command::Transfer(carrier, payload) = queue.take() {
        if state.failed() {
            carrier.finish(CarrierState::Failed("channel has failed".into()));
            continue;
        }
        match transport.send(peer, tag, payload) {
            Ok(()) => carrier.finish(CarrierState::Complete(Vec::new())),
            Err(e) => {
                tracing::error!("async send to rank {} failed: {}", peer, e);
                state.set(LinkState::Failed);
                carrier.finish(CarrierState::Failed(e.to_string()));
            }
        }
    }
    if !state.failed() {
        state.set(LinkState::Closed)
    }
    tracing::trace!("sender task for rank {} exits", peer);
}

fn run_receiver(transport: &dyn Transport, peer: usize, tag: Tag, queue: &Fifo<Command>, state: &Liveness) {
    // Anything ahead of the announcement was left unreceived by an earlier
    // channel with the same id.
    loop {
        match transport.recv(Source::Rank(peer), tag) {
            Ok(envelope) if envelope.payload == HELLO => {
                state.set(LinkState::Live);
                break;
            }
            Ok(envelope) => {
                tracing::warn!(
                    "async channel to rank {}: discarding {} stale bytes from a previous connection",
                    peer,
                    envelope.payload.len()
                );
            }
            Err(e) => {
                tracing::error!("async channel to rank {}: connect failed: {}", peer, e);
                state.set(LinkState::Failed);
                break;
            }
        }
    }
    while let Command::Transfer(carrier, _) = queue.take() {
        if state.failed() {
            carrier.finish(CarrierState::Failed("channel has failed".into()));
            continue;
        }
        match transport.recv(Source::Rank(peer), tag) {
            Ok(envelope) if envelope.payload.len() > carrier.size => {
                carrier.finish(CarrierState::Failed(format!(
                    "message of {} bytes exceeds a {} byte receive",
                    envelope.payload.len(),
                    carrier.size
                )));
            }
            Ok(envelope) => carrier.finish(CarrierState::Complete(envelope.payload)),
            Err(e) => {
                tracing::error!("async receive from rank {} failed: {}", peer, e);
                state.set(LinkState::Failed);
                carrier.finish(CarrierState::Failed(e.to_string()));
            }
        }
    }
    if !state.failed() {
        state.set(LinkState::Closed)
    }
    tracing::trace!("receiver task for rank {} exits", peer);
}

/// Calls `poll` until it is ready, backing off between attempts, and gives
/// up with [`Error::Timeout`] after `timeout`. The substrate itself never
/// waits on a timer; this is a convenience for callers that want a bounded
/// blocking wait over one of the `info_*` polls.
pub fn wait_for<T, F>(timeout: Duration, mut poll: F) -> Result<T>
where
    F: FnMut() -> Result<Poll<T>>,
{
    let start = Instant::now();
    let mut pause = Duration::from_micros(10);
    loop {
        if let Poll::Ready(value) = poll()? {
            return Ok(value);
        }
        if start.elapsed() >= timeout {
            return Err(Error::Timeout(timeout));
        }
        thread::sleep(pause);
        pause = (pause * 2).min(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MemoryTransport;

    const WAIT: Duration = Duration::from_secs(10);

    fn pair(max_channels: usize, max_carriers: usize) -> (AsyncChannels, AsyncChannels) {
        let spawner = Arc::new(TaskSpawner::new(false));
        let mut group = MemoryTransport::group(2).into_iter();
        let mut next = || -> Arc<dyn Transport> { Arc::new(group.next().unwrap()) };
        let a = AsyncChannels::new(next(), spawner.clone(), max_channels, max_carriers);
        let b = AsyncChannels::new(next(), spawner, max_channels, max_carriers);
        (a, b)
    }

    fn close(channels: &AsyncChannels, channel: ChannelId) {
        channels.disconnect(channel).unwrap();
        wait_for(WAIT, || channels.info_disc(channel)).unwrap();
    }

    #[test]
    fn messages_arrive_in_order() {
        let (a, b) = pair(4, 64);
        let ca = a.connect(1, 0).unwrap();
        let cb = b.connect(0, 0).unwrap();
        wait_for(WAIT, || a.info_conn(ca)).unwrap();
        wait_for(WAIT, || b.info_conn(cb)).unwrap();

        let receives: Vec<_> = (0..20).map(|_| b.recv(cb, 8).unwrap()).collect();
        let sends: Vec<_> = (0..20u8).map(|i| a.send(ca, vec![i; 8]).unwrap()).collect();

        for carrier in sends {
            wait_for(WAIT, || a.info_send(ca, carrier)).unwrap();
        }
        for (i, carrier) in receives.into_iter().enumerate() {
            let data = wait_for(WAIT, || b.info_recv(cb, carrier)).unwrap();
            assert_eq!(data, vec![i as u8; 8]);
        }
        assert_eq!(a.outstanding(ca).unwrap(), 0);
        close(&a, ca);
        close(&b, cb);
        assert_eq!(a.open_channels(), 0);
    }

    #[test]
    fn completed_carriers_report_once() {
        let (a, b) = pair(4, 64);
        let ca = a.connect(1, 5).unwrap();
        let cb = b.connect(0, 5).unwrap();
        let carrier = a.send(ca, vec![1, 2, 3]).unwrap();
        wait_for(WAIT, || a.info_send(ca, carrier)).unwrap();
        assert!(matches!(a.info_send(ca, carrier), Err(Error::ProtocolViolation(_))));

        let incoming = b.recv(cb, 3).unwrap();
        assert!(matches!(b.info_send(cb, incoming), Err(Error::ProtocolViolation(_))));
        assert_eq!(wait_for(WAIT, || b.info_recv(cb, incoming)).unwrap(), vec![1, 2, 3]);
        close(&a, ca);
        close(&b, cb);
    }

    #[test]
    fn slot_pool_is_bounded() {
        let (a, b) = pair(2, 64);
        let first = a.connect(1, 0).unwrap();
        let _second = a.connect(1, 1).unwrap();
        assert!(matches!(
            a.connect(1, 2),
            Err(Error::ResourceExhausted { capacity: 2, .. })
        ));
        assert!(matches!(a.connect(1, 0), Err(Error::ProtocolViolation(_))));

        let peer = b.connect(0, 0).unwrap();
        let carrier = a.send(first, b"still fine".to_vec()).unwrap();
        wait_for(WAIT, || a.info_send(first, carrier)).unwrap();
        let incoming = b.recv(peer, 64).unwrap();
        assert_eq!(wait_for(WAIT, || b.info_recv(peer, incoming)).unwrap(), b"still fine");
    }

    #[test]
    fn carrier_pool_is_bounded() {
        let (a, _b) = pair(1, 2);
        let channel = a.connect(1, 0).unwrap();
        a.recv(channel, 1).unwrap();
        a.recv(channel, 1).unwrap();
        assert!(matches!(
            a.send(channel, vec![0]),
            Err(Error::ResourceExhausted { capacity: 2, .. })
        ));
    }

    #[test]
    fn protocol_violations_are_reported() {
        let (a, b) = pair(2, 8);
        let ca = a.connect(1, 0).unwrap();
        let cb = b.connect(0, 0).unwrap();
        assert!(matches!(a.info_disc(ca), Err(Error::ProtocolViolation(_))));
        a.disconnect(ca).unwrap();
        assert!(matches!(a.disconnect(ca), Err(Error::ProtocolViolation(_))));
        assert!(matches!(a.send(ca, vec![1]), Err(Error::ProtocolViolation(_))));
        wait_for(WAIT, || a.info_disc(ca)).unwrap();
        assert!(matches!(a.info_conn(ca), Err(Error::ProtocolViolation(_))));
        assert!(matches!(a.disconnect(ca), Err(Error::ProtocolViolation(_))));
        assert!(matches!(a.connect(0, 1), Err(Error::Connection { .. })));
        close(&b, cb);
    }

    #[test]
    fn oversized_receives_fail_the_carrier() {
        let (a, b) = pair(2, 8);
        let ca = a.connect(1, 0).unwrap();
        let cb = b.connect(0, 0).unwrap();
        a.send(ca, vec![0; 32]).unwrap();
        let small = b.recv(cb, 16).unwrap();
        assert!(matches!(wait_for(WAIT, || b.info_recv(cb, small)), Err(Error::Transfer(_))));
        close(&a, ca);
        close(&b, cb);
    }

    #[test]
    fn transport_failure_marks_the_link() {
        let spawner = Arc::new(TaskSpawner::new(false));
        let group = MemoryTransport::group(2);
        let peer = group[1].clone();
        let a = AsyncChannels::new(Arc::new(group[0].clone()), spawner, 2, 8);

        let channel = a.connect(1, 0).unwrap();
        wait_for(WAIT, || match a.link_state(channel)?.0 {
            LinkState::Connecting => Ok(Poll::Pending),
            _ => Ok(Poll::Ready(())),
        })
        .unwrap();
        peer.shutdown();

        let carrier = a.send(channel, vec![9]).unwrap();
        assert!(matches!(wait_for(WAIT, || a.info_send(channel, carrier)), Err(Error::Transfer(_))));
        assert_eq!(a.link_state(channel).unwrap().0, LinkState::Failed);
        let later = a.send(channel, vec![9]).unwrap();
        assert!(matches!(wait_for(WAIT, || a.info_send(channel, later)), Err(Error::Transfer(_))));
    }

    #[test]
    fn receive_failure_marks_the_link() {
        let spawner = Arc::new(TaskSpawner::new(false));
        let group = MemoryTransport::group(2);
        let own = group[0].clone();
        let a = AsyncChannels::new(Arc::new(group[0].clone()), spawner.clone(), 2, 8);
        let b = AsyncChannels::new(Arc::new(group[1].clone()), spawner, 2, 8);

        let channel = a.connect(1, 0).unwrap();
        let _peer = b.connect(0, 0).unwrap();
        wait_for(WAIT, || a.info_conn(channel)).unwrap();

        let pending = a.recv(channel, 8).unwrap();
        own.shutdown();
        assert!(matches!(wait_for(WAIT, || a.info_recv(channel, pending)), Err(Error::Transfer(_))));
        assert_eq!(a.link_state(channel).unwrap().1, LinkState::Failed);

        let later = a.recv(channel, 8).unwrap();
        assert!(matches!(
            wait_for(Duration::from_secs(1), || a.info_recv(channel, later)),
            Err(Error::Transfer(_))
        ));
    }

    #[test]
    fn freeing_a_slot_drops_its_unreceived_messages() {
        let (a, b) = pair(2, 8);
        let ca = a.connect(1, 0).unwrap();
        let cb = b.connect(0, 0).unwrap();
        let first = a.send(ca, Vec::new()).unwrap();
        let second = a.send(ca, vec![1, 2]).unwrap();
        let incoming = b.recv(cb, 8).unwrap();
        wait_for(WAIT, || a.info_send(ca, first)).unwrap();
        wait_for(WAIT, || a.info_send(ca, second)).unwrap();
        assert!(wait_for(WAIT, || b.info_recv(cb, incoming)).unwrap().is_empty());
        close(&a, ca);

        // Reconnect on the sending side first, so the new announcement is
        // already queued behind the leftover message when `b` frees its slot.
        let ca = a.connect(1, 0).unwrap();
        let fresh = a.send(ca, vec![7]).unwrap();
        wait_for(WAIT, || a.info_send(ca, fresh)).unwrap();
        close(&b, cb);

        let cb = b.connect(0, 0).unwrap();
        wait_for(WAIT, || b.info_conn(cb)).unwrap();
        wait_for(WAIT, || a.info_conn(ca)).unwrap();
        let incoming = b.recv(cb, 8).unwrap();
        assert_eq!(wait_for(WAIT, || b.info_recv(cb, incoming)).unwrap(), vec![7]);
        close(&a, ca);
        close(&b, cb);
    }

    #[test]
    fn reconnect_after_unbalanced_transfers() {
        let (a, b) = pair(2, 8);
        let ca = a.connect(1, 0).unwrap();
        let cb = b.connect(0, 0).unwrap();
        let first = a.send(ca, Vec::new()).unwrap();
        let incoming = b.recv(cb, 8).unwrap();
        wait_for(WAIT, || a.info_send(ca, first)).unwrap();
        assert!(wait_for(WAIT, || b.info_recv(cb, incoming)).unwrap().is_empty());
        close(&b, cb);

        // Nobody is left to receive this one.
        let second = a.send(ca, vec![1, 2]).unwrap();
        wait_for(WAIT, || a.info_send(ca, second)).unwrap();
        close(&a, ca);

        let ca = a.connect(1, 0).unwrap();
        let cb = b.connect(0, 0).unwrap();
        wait_for(WAIT, || a.info_conn(ca)).unwrap();
        wait_for(WAIT, || b.info_conn(cb)).unwrap();
        let carrier = a.send(ca, vec![3]).unwrap();
        let incoming = b.recv(cb, 8).unwrap();
        wait_for(WAIT, || a.info_send(ca, carrier)).unwrap();
        assert_eq!(wait_for(WAIT, || b.info_recv(cb, incoming)).unwrap(), vec![3]);
        close(&a, ca);
        close(&b, cb);
    }

    #[test]
    fn wait_for_times_out() {
        let result: Result<()> = wait_for(Duration::from_millis(5), || Ok(Poll::Pending));
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
