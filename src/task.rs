//! Spawning of background tasks (channel senders and receivers, the mailbox
//! receiver) as named OS threads.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Spawns background tasks, optionally pinning each one to a CPU core. No
/// effort is made to place tasks intelligently: when pinning is enabled the
/// cores are handed out round-robin.
pub struct TaskSpawner {
    #[cfg(feature = "core_affinity")]
    cores: Vec<core_affinity::CoreId>,
    next_core: AtomicUsize,
}

impl TaskSpawner {
    /// Creates a spawner. Pinning is only honored with the `core_affinity`
    /// feature enabled and when the core list can be queried.
    pub fn new(pin: bool) -> Self {
        #[cfg(feature = "core_affinity")]
        {
            let cores = if pin {
                core_affinity::get_core_ids().unwrap_or_default()
            } else {
                Vec::new()
            };
            Self {
                cores,
                next_core: AtomicUsize::new(0),
            }
        }
        #[cfg(not(feature = "core_affinity"))]
        {
            if pin {
                tracing::warn!("task pinning requested but the core_affinity feature is disabled");
            }
            Self {
                next_core: AtomicUsize::new(0),
            }
        }
    }

    /// Number of cores tasks are pinned to; zero when pinning is off.
    pub fn num_cores(&self) -> usize {
        #[cfg(feature = "core_affinity")]
        {
            self.cores.len()
        }
        #[cfg(not(feature = "core_affinity"))]
        {
            0
        }
    }

    #[cfg(feature = "core_affinity")]
    fn core_for(&self, slot: usize) -> Option<core_affinity::CoreId> {
        (!self.cores.is_empty()).then(|| self.cores[slot % self.cores.len()])
    }

    /// Spawns `job` on a new thread called `name`. Task submissions go
    /// cyclically to the cores: if core `n` gets this task, then core
    /// `(n + 1) % num_cores` gets the next one.
    pub fn spawn<F>(&self, name: String, job: F) -> io::Result<thread::JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = self.next_core.fetch_add(1, Ordering::Relaxed);
        let builder = thread::Builder::new().name(name);

        #[cfg(feature = "core_affinity")]
        {
            let core = self.core_for(slot);
            builder.spawn(move || {
                if let Some(core) = core {
                    core_affinity::set_for_current(core);
                }
                job()
            })
        }
        #[cfg(not(feature = "core_affinity"))]
        {
            let _ = slot;
            builder.spawn(job)
        }
    }
}
