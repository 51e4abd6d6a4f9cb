//! Collective operations along the spanning tree.
//!
//! Every process of the group must make the same sequence of collective
//! calls. Data moves only over the tree edges connected at init, so a
//! broadcast reaches a parent before its children and a concentration
//! reaches the children before the parent. Nothing is rolled back if a call
//! fails part way.

use crate::error::{Error, Result};
use crate::group::Ppif;
use crate::sync_channel::SyncChannel;

impl Ppif {
    fn child(&self, index: usize) -> Result<&SyncChannel> {
        self.downtree.get(index).ok_or_else(|| {
            Error::violation(format!(
                "rank {} has {} tree children, not {}",
                self.me(),
                self.downtree.len(),
                index + 1
            ))
        })
    }

    fn parent(&self) -> Result<&SyncChannel> {
        self.uptree
            .as_ref()
            .ok_or_else(|| Error::violation("the master has no uptree"))
    }

    /// Distributes the master's `buf` to every process. On the master `buf`
    /// is the input; elsewhere it is overwritten, and must be exactly as
    /// long as the master's.
    pub fn broadcast(&self, buf: &mut [u8]) -> Result<()> {
        if let Some(parent) = &self.uptree {
            let received = parent.recv(buf)?;
            if received != buf.len() {
                return Err(Error::Transfer(format!(
                    "broadcast delivered {} bytes into a {} byte buffer",
                    received,
                    buf.len()
                )));
            }
        }
        for child in &self.downtree {
            child.send(buf)?;
        }
        Ok(())
    }

    /// Sends `buf` to the parent. Combining the contributions of the
    /// children with this rank's own is up to the caller.
    pub fn concentrate(&self, buf: &[u8]) -> Result<()> {
        self.parent()?.send(buf)?;
        Ok(())
    }

    /// Receives the contribution of tree child `child` (an index into
    /// [`Ppif::downtree`]) and returns its length.
    pub fn get_concentrate(&self, child: usize, buf: &mut [u8]) -> Result<usize> {
        self.child(child)?.recv(buf)
    }

    /// Sends `buf` to tree child `child` only.
    pub fn spread(&self, child: usize, buf: &[u8]) -> Result<()> {
        self.child(child)?.send(buf)?;
        Ok(())
    }

    /// Receives what the parent spread to this rank and returns its length.
    pub fn get_spread(&self, buf: &mut [u8]) -> Result<usize> {
        self.parent()?.recv(buf)
    }

    /// Barrier: returns only after every process has entered it.
    pub fn synchronize(&self) -> Result<()> {
        let mut token = [0; 1];
        for child in &self.downtree {
            child.recv(&mut token)?;
        }
        if let Some(parent) = &self.uptree {
            parent.send(&token)?;
            parent.recv(&mut token)?;
        }
        for child in &self.downtree {
            child.send(&token)?;
        }
        Ok(())
    }
}
