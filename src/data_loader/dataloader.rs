//! Multi-worker `DataLoader`.
//!
//! * Builds one stage chain per worker for every pass, so each worker gets a
//!   fresh distribution context and its own slice of the shard list.
//! * With `num_workers == 0` the chain runs on the calling thread.
//! * Items are yielded round-robin across workers; a worker that runs dry
//!   drops out of the rotation.

use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::data_loader::dataset::{BoxDataset, Dataset, DatasetError, DynIter};
use crate::data_loader::options::LoaderOptions;
use crate::data_loader::prefetch::spawn_prefetch;
use crate::data_loader::sampler::WorkerInfo;

type ChainFactory<T> = Box<dyn Fn() -> Result<BoxDataset<T>, DatasetError> + Send + Sync>;

/// Drives stage chains across worker threads and hands out their items.
pub struct DataLoader<T: Send + 'static> {
    factory: ChainFactory<T>,
    opts: LoaderOptions,
    epoch: u64,
}

impl<T: Send + 'static> DataLoader<T> {
    /// Create a new loader. `factory` builds one complete stage chain.
    pub fn new<F>(factory: F, opts: LoaderOptions) -> Self
    where
        F: Fn() -> Result<BoxDataset<T>, DatasetError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            opts,
            epoch: 0,
        }
    }

    /// Epoch forwarded to every chain before the next pass.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.opts
    }

    /// Start a pass over the data.
    ///
    /// ```ignore
    /// let mut loader = DataLoader::new(move || build_dataset(..), LoaderOptions::default().num_workers(4));
    /// for epoch in 0..epochs {
    ///     loader.set_epoch(epoch);
    ///     for batch in loader.iter()? {
    ///         // training step ...
    ///     }
    /// }
    /// ```
    pub fn iter(&self) -> Result<DataLoaderIter<T>, DatasetError> {
        if self.opts.num_workers == 0 {
            let mut chain = (self.factory)()?;
            chain.set_epoch(self.epoch);
            return Ok(DataLoaderIter::Inline(chain.iter()));
        }

        let num_workers = self.opts.num_workers;
        let mut receivers = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let mut chain = (self.factory)()?;
            chain.set_epoch(self.epoch);
            let (rx, handle) =
                spawn_prefetch(self.opts.prefetch, WorkerInfo { id, num_workers }, chain)?;
            receivers.push(rx);
            handles.push(handle);
        }
        debug!("epoch {}: started {num_workers} loader workers", self.epoch);
        Ok(DataLoaderIter::Workers(WorkerPool {
            receivers: receivers.into_iter().map(Some).collect(),
            handles,
            cursor: 0,
        }))
    }
}

impl<T: Send + 'static> std::fmt::Debug for DataLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("num_workers", &self.opts.num_workers)
            .field("prefetch", &self.opts.prefetch)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// One pass of a [`DataLoader`].
pub enum DataLoaderIter<T: Send + 'static> {
    Inline(DynIter<T>),
    Workers(WorkerPool<T>),
}

impl<T: Send + 'static> Iterator for DataLoaderIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self {
            DataLoaderIter::Inline(it) => it.next(),
            DataLoaderIter::Workers(pool) => pool.next_item(),
        }
    }
}

/// Worker threads of one pass; the slot of a finished worker is `None`.
pub struct WorkerPool<T> {
    receivers: Vec<Option<Receiver<T>>>,
    handles: Vec<JoinHandle<()>>,
    cursor: usize,
}

impl<T> WorkerPool<T> {
    fn next_item(&mut self) -> Option<T> {
        let n = self.receivers.len();
        for _ in 0..n {
            let slot = self.cursor;
            self.cursor = (self.cursor + 1) % n;
            let Some(rx) = self.receivers[slot].as_ref() else {
                continue;
            };
            match rx.recv() {
                Ok(item) => return Some(item),
                Err(_) => {
                    debug!("loader worker {slot} finished");
                    self.receivers[slot] = None;
                }
            }
        }
        None
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        // Closing the channels unblocks workers waiting to send.
        self.receivers.clear();
        for (id, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                warn!("loader worker {id} panicked");
            }
        }
    }
}
