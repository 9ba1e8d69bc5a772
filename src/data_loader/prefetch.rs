//! Prefetch helper for the data loader.
//!
//! Runs one stage chain on a dedicated worker thread and returns a
//! `Receiver` that yields up to `cap` items ahead of consumption.

use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::data_loader::dataset::{Dataset, DatasetError};
use crate::data_loader::sampler::{set_current_worker, WorkerInfo};

/// Spawn a prefetching worker for `dataset`.
///
/// The worker thread is marked as `worker` before the first pass starts, so
/// the source stage samples its slice of the shard list. It stops when the
/// chain is exhausted or the receiver is dropped.
pub fn spawn_prefetch<D>(
    cap: usize,
    worker: WorkerInfo,
    dataset: D,
) -> Result<(Receiver<D::Item>, JoinHandle<()>), DatasetError>
where
    D: Dataset,
{
    let (tx, rx) = sync_channel(cap.max(1));
    let handle = thread::Builder::new()
        .name(format!("datapipe-worker-{}", worker.id))
        .spawn(move || {
            set_current_worker(Some(worker));
            let mut sent = 0usize;
            for item in dataset.iter() {
                if tx.send(item).is_err() {
                    debug!("worker {}: consumer went away after {sent} items", worker.id);
                    return;
                }
                sent += 1;
            }
            debug!("worker {}: exhausted after {sent} items", worker.id);
        })
        .map_err(|e| DatasetError::Worker {
            id: worker.id,
            reason: e.to_string(),
        })?;
    Ok((rx, handle))
}
