// src/data_loader/options.rs
//!
//! Options for the multi-worker [`crate::data_loader::DataLoader`].
//!
//! Builder helpers are provided so callers can write a fluent style:
//!
//! let opts = LoaderOptions::default()
//!     .num_workers(4)
//!     .prefetch(8);
//!

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Number of worker threads, each running its own stage chain.
    /// `0` iterates a single chain on the calling thread.
    pub num_workers: usize,
    /// Items buffered ahead of the consumer, per worker (>=1).
    pub prefetch: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            num_workers: 0,
            prefetch: 2,
        }
    }
}

impl LoaderOptions {
    /// Set the number of workers. `0` disables worker threads.
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Set the number of items each worker may produce ahead of consumption.
    pub fn prefetch(mut self, n: usize) -> Self {
        self.prefetch = n.max(1);
        self
    }
}
