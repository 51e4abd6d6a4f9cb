//! Bring-up and teardown of one process's view of the group.

use crate::async_channel::{AsyncChannels, CarrierId, ChannelId, LinkState};
use crate::config::{Config, HostArgs};
use crate::error::{Error, Result};
use crate::mailbox::{Mail, Mailbox};
use crate::message::{TcpTransport, Transport};
use crate::sync_channel::{SyncChannel, TREE_CHANNEL};
use crate::task::TaskSpawner;
use crate::topology::{Axis, Coord, Dims, Topology, Tree};
use std::sync::Arc;
use std::task::Poll;

/// Resource usage of one process, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub open_channels: usize,
    pub live_carriers: usize,
    pub buffered_mail: usize,
    pub dropped_mail: u64,
}

/// The processor interface of one member of a fixed group.
///
/// Created once per process by [`Ppif::init`], which computes the topology
/// and connects the tree edges; every process of the group must initialize
/// before any of them can return from `init`. Collective operations are
/// provided in [`crate::collective`].
pub struct Ppif {
    transport: Arc<dyn Transport>,
    topology: Topology,
    pub(crate) uptree: Option<SyncChannel>,
    pub(crate) downtree: Vec<SyncChannel>,
    channels: AsyncChannels,
    mailbox: Mailbox,
    exited: bool,
}

impl Ppif {
    /// Joins the group reachable through `transport`. Fails if the
    /// configuration does not fit the group, and with
    /// [`Error::Connection`] if a tree edge cannot be connected; a process
    /// cannot repair a broken tree on its own, so callers should treat that
    /// as fatal.
    pub fn init(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        let me = transport.rank();
        let procs = transport.size();
        let dims = config.validate(procs)?;
        let mut topology = Topology::new(dims, me);

        let (uptree, downtree) = connect_tree(&transport, topology.tree()).map_err(|e| {
            tracing::error!("rank {}: tree construction failed: {}", me, e);
            e
        })?;
        topology.slvcnt = reduce_subtree_sizes(uptree.as_ref(), &downtree)?;

        let spawner = Arc::new(TaskSpawner::new(config.pin_tasks));
        let mailbox = Mailbox::start(
            transport.clone(),
            &spawner,
            config.mailbox_capacity,
            config.max_mail_size,
        )?;
        let channels = AsyncChannels::new(
            transport.clone(),
            spawner,
            config.max_channels,
            config.max_carriers,
        );

        tracing::info!(
            "rank {}/{} up at {:?} in {}x{}x{}, uptree {:?}, downtree {:?}",
            me,
            procs,
            topology.coord(),
            dims.x,
            dims.y,
            dims.z,
            topology.tree().uptree,
            topology.tree().downtree
        );

        Ok(Self {
            transport,
            topology,
            uptree,
            downtree,
            channels,
            mailbox,
            exited: false,
        })
    }

    /// Joins a TCP group described by host launch arguments (see
    /// [`HostArgs::parse`]). `size_hint`, if given, must match the number
    /// of peers. Returns the interface and the arguments that were not
    /// meant for it.
    pub fn init_from_args<I>(size_hint: Option<usize>, args: I, mut config: Config) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = String>,
    {
        let (host, rest) = HostArgs::parse(args)?;
        if let Some(hint) = size_hint {
            if hint != host.peers.len() {
                return Err(Error::Config(format!(
                    "expected a group of {}, launched with {} peers",
                    hint,
                    host.peers.len()
                )));
            }
        }
        config.dims = host.dims.or(config.dims);
        let transport = TcpTransport::bind(
            host.rank,
            host.peers,
            config.connect_retries,
            config.connect_retry_delay,
        )?;
        Ok((Self::init(Arc::new(transport), config)?, rest))
    }

    /// Leaves the group: stops the mailbox and shuts the transport down.
    /// Every asynchronous channel should have been disconnected first;
    /// channels still open are torn down and reported as a protocol
    /// violation.
    pub fn exit(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        self.exited = true;
        let open = self.channels.open_channels();
        if open > 0 {
            tracing::warn!("rank {} exits with {} channel(s) still open", self.me(), open);
            self.channels.terminate_all();
        }
        self.transport.shutdown();
        self.mailbox.join();
        tracing::debug!("rank {} left the group", self.me());

        if open > 0 {
            Err(Error::violation(format!("{} channel(s) still open at exit", open)))
        } else {
            Ok(())
        }
    }
}

impl Drop for Ppif {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

fn connect_tree(transport: &Arc<dyn Transport>, tree: &Tree) -> Result<(Option<SyncChannel>, Vec<SyncChannel>)> {
    let uptree = tree
        .uptree
        .map(|parent| SyncChannel::connect(transport.clone(), parent, TREE_CHANNEL))
        .transpose()?;
    let downtree: Vec<SyncChannel> = tree
        .downtree
        .iter()
        .map(|&child| SyncChannel::connect(transport.clone(), child, TREE_CHANNEL))
        .collect::<Result<_>>()?;
    Ok((uptree, downtree))
}

/// Collects the subtree size of every child and forwards this rank's own
/// subtree size to its parent.
fn reduce_subtree_sizes(uptree: Option<&SyncChannel>, downtree: &[SyncChannel]) -> Result<Vec<usize>> {
    let slvcnt = downtree
        .iter()
        .map(|child| -> Result<usize> {
            let mut count = [0; 8];
            child.recv(&mut count)?;
            Ok(u64::from_le_bytes(count) as usize)
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(parent) = uptree {
        let own = 1 + slvcnt.iter().sum::<usize>();
        parent.send(&(own as u64).to_le_bytes())?;
    }
    Ok(slvcnt)
}

/// Topology queries.
impl Ppif {
    /// Rank of this process.
    pub fn me(&self) -> usize {
        self.topology.rank()
    }

    /// Rank of the tree root.
    pub fn master(&self) -> usize {
        0
    }

    /// Number of processes in the group.
    pub fn procs(&self) -> usize {
        self.transport.size()
    }

    pub fn dims(&self) -> Dims {
        self.topology.dims()
    }

    pub fn coord(&self) -> Coord {
        self.topology.coord()
    }

    /// Number of tree children.
    pub fn degree(&self) -> usize {
        self.topology.degree()
    }

    pub fn uptree(&self) -> Option<usize> {
        self.topology.tree().uptree
    }

    pub fn downtree(&self) -> &[usize] {
        &self.topology.tree().downtree
    }

    /// Number of processes below each tree child, in `downtree` order.
    pub fn slvcnt(&self) -> &[usize] {
        self.topology.slvcnt()
    }

    pub fn neighbor(&self, axis: Axis, offset: isize) -> Option<usize> {
        self.topology.neighbor(axis, offset)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn usage(&self) -> Usage {
        let (buffered_mail, dropped_mail) = self.mailbox.occupancy();
        Usage {
            open_channels: self.channels.open_channels(),
            live_carriers: self.channels.live_carriers(),
            buffered_mail,
            dropped_mail,
        }
    }
}

/// Synchronous channels.
impl Ppif {
    /// Connects a blocking channel to `peer`; the peer must connect back
    /// with the same `id`. The id `u32::MAX` is reserved.
    pub fn connect_sync(&self, peer: usize, id: u32) -> Result<SyncChannel> {
        if id == TREE_CHANNEL {
            return Err(Error::violation("channel id u32::MAX is reserved for the tree"));
        }
        SyncChannel::connect(self.transport.clone(), peer, id)
    }

    pub fn disconnect_sync(&self, channel: SyncChannel) -> Result<()> {
        channel.disconnect()
    }
}

/// Asynchronous channels. See [`crate::async_channel`].
impl Ppif {
    pub fn connect_async(&self, peer: usize, id: u32) -> Result<ChannelId> {
        self.channels.connect(peer, id)
    }

    pub fn info_conn(&self, channel: ChannelId) -> Result<Poll<()>> {
        self.channels.info_conn(channel)
    }

    pub fn send_async(&self, channel: ChannelId, payload: Vec<u8>) -> Result<CarrierId> {
        self.channels.send(channel, payload)
    }

    pub fn recv_async(&self, channel: ChannelId, size: usize) -> Result<CarrierId> {
        self.channels.recv(channel, size)
    }

    pub fn info_send(&self, channel: ChannelId, carrier: CarrierId) -> Result<Poll<()>> {
        self.channels.info_send(channel, carrier)
    }

    pub fn info_recv(&self, channel: ChannelId, carrier: CarrierId) -> Result<Poll<Vec<u8>>> {
        self.channels.info_recv(channel, carrier)
    }

    pub fn disconnect_async(&self, channel: ChannelId) -> Result<()> {
        self.channels.disconnect(channel)
    }

    pub fn info_disc(&self, channel: ChannelId) -> Result<Poll<()>> {
        self.channels.info_disc(channel)
    }

    /// Carriers of `channel` whose outcome has not been reported yet.
    pub fn outstanding(&self, channel: ChannelId) -> Result<usize> {
        self.channels.outstanding(channel)
    }

    pub fn link_state(&self, channel: ChannelId) -> Result<(LinkState, LinkState)> {
        self.channels.link_state(channel)
    }
}

/// Mailbox.
impl Ppif {
    pub fn send_mail(&self, dest: usize, request_id: u32, payload: &[u8]) -> Result<()> {
        self.mailbox.send(dest, request_id, payload)
    }

    /// See [`Mailbox::get`].
    pub fn get_mail(&self) -> Result<Option<Mail>> {
        self.mailbox.get()
    }
}
