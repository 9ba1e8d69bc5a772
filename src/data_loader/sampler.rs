//! src/data_loader/sampler.rs
//! Distributed sampling of shard indices.
//!
//! Every data-loading worker of every rank runs its own copy of the stage
//! chain, so the source stage has to decide which shard entries belong to
//! the current (rank, worker) pair. The decision depends on:
//!  * `DistributionContext` – rank/world_size/worker_id/num_workers, queried
//!    fresh from a [`RuntimeProbe`] at the start of every pass.
//!  * `DistributedSampler`  – the partition/shuffle policy plus the epoch
//!    used as the shuffle seed.

use std::cell::Cell;
use std::sync::Arc;

use log::debug;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;

/// Identity of the current process and worker among distributed peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DistributionContext {
    pub rank: usize,
    pub world_size: usize,
    pub worker_id: usize,
    pub num_workers: usize,
}

impl Default for DistributionContext {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            worker_id: 0,
            num_workers: 1,
        }
    }
}

/// Rank information of an initialised distributed-training runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistInfo {
    pub rank: usize,
    pub world_size: usize,
}

/// Identity of a data-loading worker within one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: usize,
    pub num_workers: usize,
}

/// Snapshot of the ambient runtimes, as seen by one stage chain.
///
/// `None` means the corresponding runtime is not active: no distributed
/// process group, or no multi-worker data loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeContext {
    pub distributed: Option<DistInfo>,
    pub worker: Option<WorkerInfo>,
}

impl RuntimeContext {
    /// Single process, single worker.
    pub fn single_process() -> Self {
        Self::default()
    }

    /// Builder-style helper: set distributed rank/world size.
    pub fn distributed(mut self, rank: usize, world_size: usize) -> Self {
        self.distributed = Some(DistInfo { rank, world_size });
        self
    }

    /// Builder-style helper: set data-loading worker id/count.
    pub fn worker(mut self, id: usize, num_workers: usize) -> Self {
        self.worker = Some(WorkerInfo { id, num_workers });
        self
    }

    /// Resolve the snapshot into a full [`DistributionContext`], falling
    /// back to rank 0 of 1 and worker 0 of 1.
    pub fn distribution(&self) -> DistributionContext {
        let (rank, world_size) = match self.distributed {
            Some(d) => (d.rank, d.world_size.max(1)),
            None => (0, 1),
        };
        let (worker_id, num_workers) = match self.worker {
            Some(w) => (w.id, w.num_workers.max(1)),
            None => (0, 1),
        };
        DistributionContext {
            rank,
            world_size,
            worker_id,
            num_workers,
        }
    }
}

/// Source of [`RuntimeContext`] snapshots.
pub trait RuntimeProbe: Send + Sync {
    fn probe(&self) -> RuntimeContext;
}

/// A fixed context reports itself. When it names no worker, the identity of
/// the loader worker running the calling thread (if any) fills the gap, so
/// workers of one rank still get disjoint slices.
impl RuntimeProbe for RuntimeContext {
    fn probe(&self) -> RuntimeContext {
        RuntimeContext {
            distributed: self.distributed,
            worker: self.worker.or_else(current_worker),
        }
    }
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerInfo>> = const { Cell::new(None) };
}

/// Mark the calling thread as data-loading worker `info` (or clear it).
pub(crate) fn set_current_worker(info: Option<WorkerInfo>) {
    CURRENT_WORKER.with(|w| w.set(info));
}

/// Worker identity of the calling thread, if it runs a loader worker.
pub fn current_worker() -> Option<WorkerInfo> {
    CURRENT_WORKER.with(|w| w.get())
}

/// Probe reading the process environment.
///
/// Rank and world size come from the `RANK`/`WORLD_SIZE` variables set by
/// distributed launchers; the worker identity comes from the thread-local
/// installed by [`crate::data_loader::DataLoader`] on its worker threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientRuntime;

impl AmbientRuntime {
    fn env_usize(name: &str) -> Option<usize> {
        std::env::var(name).ok()?.trim().parse().ok()
    }
}

impl RuntimeProbe for AmbientRuntime {
    fn probe(&self) -> RuntimeContext {
        let distributed = match (Self::env_usize("RANK"), Self::env_usize("WORLD_SIZE")) {
            (Some(rank), Some(world_size)) if world_size > 0 && rank < world_size => {
                Some(DistInfo { rank, world_size })
            }
            _ => None,
        };
        RuntimeContext {
            distributed,
            worker: current_worker(),
        }
    }
}

/// Assigns shard indices to the current (rank, worker) pair.
#[derive(Clone)]
pub struct DistributedSampler {
    epoch: u64,
    shuffle: bool,
    partition: bool,
    runtime: Arc<dyn RuntimeProbe>,
}

impl std::fmt::Debug for DistributedSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedSampler")
            .field("epoch", &self.epoch)
            .field("shuffle", &self.shuffle)
            .field("partition", &self.partition)
            .finish()
    }
}

impl DistributedSampler {
    pub fn new(shuffle: bool, partition: bool, runtime: Arc<dyn RuntimeProbe>) -> Self {
        Self {
            epoch: 0,
            shuffle,
            partition,
            runtime,
        }
    }

    /// Query the runtime for the current distribution context.
    ///
    /// Never cached: worker pools may be re-created between epochs.
    pub fn update(&self) -> DistributionContext {
        self.runtime.probe().distribution()
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Indices of `data` assigned to `ctx`.
    ///
    /// With `partition` on, the (optionally epoch-shuffled) index list is
    /// strided by rank first; the result is always strided by worker.
    pub fn sample<T>(&self, data: &[T], ctx: &DistributionContext) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..data.len()).collect();
        if self.partition {
            if self.shuffle {
                // Same seed on every rank, so the strided slices stay disjoint.
                let mut rng = ChaCha20Rng::seed_from_u64(self.epoch);
                indices.shuffle(&mut rng);
            }
            indices = stride(indices, ctx.rank, ctx.world_size);
        }
        let indices = stride(indices, ctx.worker_id, ctx.num_workers);
        debug!(
            "sampler epoch={} rank={}/{} worker={}/{} -> {} of {} entries",
            self.epoch,
            ctx.rank,
            ctx.world_size,
            ctx.worker_id,
            ctx.num_workers,
            indices.len(),
            data.len()
        );
        indices
    }
}

/// Every `step`-th element starting at `start`.
fn stride(indices: Vec<usize>, start: usize, step: usize) -> Vec<usize> {
    indices.into_iter().skip(start).step_by(step.max(1)).collect()
}
