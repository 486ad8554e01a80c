//! CPU and memory budget shared by all running nodes.

use crate::graph::ResourceHints;
use crate::nodes::NodeError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting budget of CPUs and, optionally, memory in MiB.
///
/// Requests larger than the budget are clamped to it, so a node can always
/// run once the pool is idle. CPUs are always reserved before memory.
#[derive(Debug)]
pub struct ResourcePool {
    cpus: Arc<Semaphore>,
    cpu_capacity: usize,
    memory: Option<(Arc<Semaphore>, usize)>,
}

/// Resources held by a running node, returned to the pool on drop.
#[derive(Debug)]
pub struct Reservation {
    /// CPUs granted.
    pub n_procs: usize,
    _cpus: OwnedSemaphorePermit,
    _memory: Option<OwnedSemaphorePermit>,
}

impl ResourcePool {
    /// A pool of `n_procs` CPUs and `memory_gb` GiB.
    #[must_use]
    pub fn new(n_procs: usize, memory_gb: Option<f64>) -> Self {
        let cpu_capacity = n_procs.max(1);
        let memory = memory_gb.map(|gb| {
            let mib = mib(gb).max(1);
            (Arc::new(Semaphore::new(mib)), mib)
        });
        Self {
            cpus: Arc::new(Semaphore::new(cpu_capacity)),
            cpu_capacity,
            memory,
        }
    }

    /// A pool running one node at a time.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(1, None)
    }

    /// CPU budget.
    #[must_use]
    pub const fn cpu_capacity(&self) -> usize {
        self.cpu_capacity
    }

    /// CPUs not currently reserved.
    #[must_use]
    pub fn available_cpus(&self) -> usize {
        self.cpus.available_permits()
    }

    /// The CPUs and MiB a node with `hints` reserves.
    #[must_use]
    pub fn clamp(&self, hints: ResourceHints) -> (usize, usize) {
        let cpus = hints.n_procs.clamp(1, self.cpu_capacity);
        let memory = self
            .memory
            .as_ref()
            .map_or(0, |(_, capacity)| mib(hints.mem_gb).min(*capacity));
        (cpus, memory)
    }

    /// Waits until the resources for `hints` are free and reserves them.
    pub async fn reserve(&self, hints: ResourceHints) -> Result<Reservation, NodeError> {
        let (cpus, memory) = self.clamp(hints);
        let cpu_permit = Arc::clone(&self.cpus)
            .acquire_many_owned(permits(cpus))
            .await
            .map_err(closed)?;
        let memory_permit = match &self.memory {
            Some((semaphore, _)) if memory > 0 => Some(
                Arc::clone(semaphore)
                    .acquire_many_owned(permits(memory))
                    .await
                    .map_err(closed)?,
            ),
            _ => None,
        };
        Ok(Reservation {
            n_procs: cpus,
            _cpus: cpu_permit,
            _memory: memory_permit,
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mib(gb: f64) -> usize {
    if gb.is_finite() && gb > 0.0 {
        (gb * 1024.0).ceil() as usize
    } else {
        0
    }
}

fn permits(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn closed(e: tokio::sync::AcquireError) -> NodeError {
    NodeError::Io(std::io::Error::other(format!("resource pool closed: {e}")))
}
