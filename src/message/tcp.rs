//! Provides a message-passing transport based on TCP sockets.
//!
//! TCP is a connection-oriented protocol, which means that a connection must
//! be established between the sending and receiving ends of the socket in
//! order to read from or write to a stream. Each rank listens on its own
//! address; the first message to a peer opens an outgoing stream which is
//! cached for later messages, so everything sent from one rank to another
//! travels over a single ordered stream.

use super::inbox::Inbox;
use super::transport::{Envelope, Source, Tag, Transport};
use super::util;
use crate::error::{Error, Result};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(1);

/// Accepts incoming connections and spawns one reader thread per stream.
/// Readers push every frame they decode into the shared inbox.
struct Acceptor {
    alive: Arc<AtomicBool>,
    accepted: Arc<Mutex<Vec<TcpStream>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Acceptor {
    /// The listener is placed in a non-blocking accept mode, so the
    /// pre-existing blocking mode is overwritten.
    fn spawn(listener: TcpListener, inbox: Arc<Inbox>) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let alive = Arc::new(AtomicBool::new(true));
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let keep_accepting = alive.clone();
        let streams = accepted.clone();

        let thread = thread::Builder::new()
            .name("ppif-accept".into())
            .spawn(move || {
                while keep_accepting.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, address)) => {
                            if let Err(e) = Self::start_reader(stream, inbox.clone(), &streams) {
                                tracing::error!("could not read from {}: {}", address, e);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                        Err(e) => tracing::warn!("accept failed: {}", e),
                    }
                }
            })?;

        Ok(Self {
            alive,
            accepted,
            thread: Some(thread),
        })
    }

    fn start_reader(stream: TcpStream, inbox: Arc<Inbox>, streams: &Mutex<Vec<TcpStream>>) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let mut reader = stream.try_clone()?;
        if let Ok(mut streams) = streams.lock() {
            streams.push(stream);
        }
        thread::Builder::new()
            .name("ppif-reader".into())
            .spawn(move || {
                while let Ok(envelope) = util::read_frame(&mut reader) {
                    if inbox.deliver(envelope).is_err() {
                        break;
                    }
                }
            })?;
        Ok(())
    }

    fn stop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Ok(mut streams) = self.accepted.lock() {
            for stream in streams.drain(..) {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

/// A [`Transport`] over TCP sockets, one listening address per rank.
pub struct TcpTransport {
    rank: usize,
    peers: Vec<SocketAddr>,
    inbox: Arc<Inbox>,
    outgoing: Vec<Mutex<Option<TcpStream>>>,
    acceptor: Mutex<Acceptor>,
    connect_retries: usize,
    retry_delay: Duration,
}

impl TcpTransport {
    /// Binds the listening socket of `rank` at `peers[rank]` and starts
    /// accepting connections. Outgoing connections are made lazily and
    /// retried `connect_retries` times, `retry_delay` apart, to give peers
    /// that start later a chance to bind.
    pub fn bind(rank: usize, peers: Vec<SocketAddr>, connect_retries: usize, retry_delay: Duration) -> Result<Self> {
        let address = *peers
            .get(rank)
            .ok_or_else(|| Error::Config(format!("rank {} is outside a group of {}", rank, peers.len())))?;
        let listener = TcpListener::bind(address)?;
        let inbox = Arc::new(Inbox::new());
        let acceptor = Acceptor::spawn(listener, inbox.clone())?;
        tracing::debug!("rank {} listening on {}", rank, address);

        Ok(Self {
            rank,
            outgoing: peers.iter().map(|_| Mutex::new(None)).collect(),
            peers,
            inbox,
            acceptor: Mutex::new(acceptor),
            connect_retries,
            retry_delay,
        })
    }

    fn connect(&self, dest: usize) -> Result<TcpStream> {
        let address = self.peers[dest];
        let mut attempt = 0;
        loop {
            match TcpStream::connect(address) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!("rank {} connected to rank {} at {}", self.rank, dest, address);
                    return Ok(stream);
                }
                Err(e) if attempt < self.connect_retries => {
                    tracing::trace!("connect to {} failed ({}), retrying", address, e);
                    attempt += 1;
                    thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(Error::connection(dest, e)),
            }
        }
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()> {
        if self.inbox.is_closed() {
            return Err(Error::Closed);
        }
        if payload.len() as u64 > util::MAX_FRAME_LEN {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: util::MAX_FRAME_LEN as usize,
            });
        }
        let slot = self
            .outgoing
            .get(dest)
            .ok_or_else(|| Error::connection(dest, "no such rank"))?;
        let mut slot = slot
            .lock()
            .map_err(|_| Error::Transfer(format!("stream to rank {} is poisoned", dest)))?;

        // A stream that failed a write is dropped; the next send reconnects.
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect(dest)?,
        };
        util::write_frame(&mut stream, self.rank, tag, &payload)
            .map_err(|e| Error::Transfer(format!("write to rank {} failed: {}", dest, e)))?;
        *slot = Some(stream);
        Ok(())
    }

    fn recv(&self, source: Source, tag: Tag) -> Result<Envelope> {
        self.inbox.take(source, tag)
    }

    fn discard_before(&self, source: usize, tag: Tag, marker: &[u8]) -> usize {
        self.inbox.discard_before(source, tag, marker)
    }

    fn shutdown(&self) {
        self.inbox.close();
        if let Ok(mut acceptor) = self.acceptor.lock() {
            acceptor.stop();
        }
        for slot in &self.outgoing {
            if let Ok(mut slot) = slot.lock() {
                if let Some(stream) = slot.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown()
    }
}
