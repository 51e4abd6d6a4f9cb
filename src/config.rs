//! Group configuration and host launch arguments.

use crate::error::{Error, Result};
use crate::topology::Dims;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Capacities and policies of one process's interface. The defaults suit
/// small groups; every capacity is fixed for the lifetime of the group.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Config {
    /// Shape of the process array. Factored from the group size when
    /// `None`.
    pub dims: Option<Dims>,
    /// Maximum number of simultaneously open asynchronous channels.
    pub max_channels: usize,
    /// Maximum number of outstanding asynchronous sends and receives.
    pub max_carriers: usize,
    /// Number of unsolicited messages buffered before new ones are dropped.
    pub mailbox_capacity: usize,
    /// Largest payload accepted by `send_mail`, in bytes.
    pub max_mail_size: usize,
    /// Pin background tasks to CPU cores (requires the `core_affinity`
    /// feature).
    pub pin_tasks: bool,
    /// Connection attempts made by the TCP transport before giving up.
    pub connect_retries: usize,
    /// Pause between two connection attempts.
    pub connect_retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dims: None,
            max_channels: 64,
            max_carriers: 1024,
            mailbox_capacity: 64,
            max_mail_size: 1024,
            pin_tasks: false,
            connect_retries: 50,
            connect_retry_delay: Duration::from_millis(20),
        }
    }
}

impl Config {
    /// Checks the configuration against a group of `procs` processes and
    /// returns the array shape to use.
    pub fn validate(&self, procs: usize) -> Result<Dims> {
        if procs == 0 {
            return Err(Error::Config("the group is empty".into()));
        }
        for (name, value) in [
            ("max_channels", self.max_channels),
            ("max_carriers", self.max_carriers),
            ("mailbox_capacity", self.mailbox_capacity),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        let dims = self.dims.unwrap_or_else(|| Dims::factor(procs));
        if dims.product() != procs {
            return Err(Error::Config(format!(
                "dims {}x{}x{} do not cover {} processes",
                dims.x, dims.y, dims.z, procs
            )));
        }
        Ok(dims)
    }

    /// Overrides capacities from `PPIF_MAX_CHANNELS`, `PPIF_MAX_CARRIERS`,
    /// `PPIF_MAILBOX_CAPACITY` and `PPIF_MAX_MAIL_SIZE` where set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        self.apply_overrides(lookup)?;
        Ok(self)
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        for (key, field) in [
            ("PPIF_MAX_CHANNELS", &mut self.max_channels),
            ("PPIF_MAX_CARRIERS", &mut self.max_carriers),
            ("PPIF_MAILBOX_CAPACITY", &mut self.mailbox_capacity),
            ("PPIF_MAX_MAIL_SIZE", &mut self.max_mail_size),
        ] {
            if let Some(value) = lookup(key) {
                *field = parse(key, &value)?;
            }
        }
        Ok(())
    }
}

fn parse<T: FromStr>(what: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("bad value for {}: {:?}", what, value)))
}

/// Launch parameters handed to every process of a group by whatever
/// started it.
#[derive(Clone, Debug, PartialEq)]
pub struct HostArgs {
    pub rank: usize,
    pub peers: Vec<SocketAddr>,
    pub dims: Option<Dims>,
}

impl HostArgs {
    /// Extracts `--ppif-rank N`, `--ppif-peers addr,addr,...` and
    /// `--ppif-dims x,y,z` (also accepted as `--flag=value`) from `args`,
    /// falling back to the `PPIF_RANK`, `PPIF_PEERS` and `PPIF_DIMS`
    /// environment variables. Returns the parsed arguments together with the
    /// arguments it did not recognize, in their original order.
    pub fn parse<I>(args: I) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = String>,
    {
        Self::parse_with(args, |key| std::env::var(key).ok())
    }

    fn parse_with<I, F>(args: I, env: F) -> Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut rank = None;
        let mut peers = None;
        let mut dims = None;
        let mut rest = Vec::new();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg.clone(), None),
            };
            let target = match flag.as_str() {
                "--ppif-rank" => &mut rank,
                "--ppif-peers" => &mut peers,
                "--ppif-dims" => &mut dims,
                _ => {
                    rest.push(arg);
                    continue;
                }
            };
            let value = inline
                .or_else(|| args.next())
                .ok_or_else(|| Error::Config(format!("{} needs a value", flag)))?;
            *target = Some(value);
        }

        let rank = rank
            .or_else(|| env("PPIF_RANK"))
            .ok_or_else(|| Error::Config("no rank given (--ppif-rank or PPIF_RANK)".into()))?;
        let peers = peers
            .or_else(|| env("PPIF_PEERS"))
            .ok_or_else(|| Error::Config("no peers given (--ppif-peers or PPIF_PEERS)".into()))?;
        let dims = dims.or_else(|| env("PPIF_DIMS"));

        let args = Self {
            rank: parse("rank", &rank)?,
            peers: peers
                .split(',')
                .map(|p| parse("peer address", p))
                .collect::<Result<_>>()?,
            dims: dims.map(|d| parse_dims(&d)).transpose()?,
        };
        if args.rank >= args.peers.len() {
            return Err(Error::Config(format!(
                "rank {} is outside a group of {}",
                args.rank,
                args.peers.len()
            )));
        }
        Ok((args, rest))
    }
}

fn parse_dims(value: &str) -> Result<Dims> {
    let extents = value
        .split(',')
        .map(|v| parse("dims", v))
        .collect::<Result<Vec<usize>>>()?;
    match extents[..] {
        [x, y, z] => Ok(Dims::new(x, y, z)),
        _ => Err(Error::Config(format!("dims need three extents, got {:?}", value))),
    }
}
