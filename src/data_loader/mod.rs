// src/data_loader/mod.rs

//! Public API surface for the data_loader layer.
/// expose the `dataloader` module (file dataloader.rs)
pub mod dataloader;

/// expose the `dataset` module (file dataset.rs)
pub mod dataset;

/// source stage over the shard manifest
pub mod data_list;

/// expose the `options` module (file options.rs)
pub mod options;

pub mod prefetch;
pub mod sampler;
pub mod transform;

// Re‐export the key types at this level:
pub use data_list::{read_lists, DataList};
pub use dataloader::{DataLoader, DataLoaderIter};
pub use dataset::{boxed_iter, BoxDataset, Dataset, DatasetError, DynIter};
pub use options::LoaderOptions;
pub use sampler::{
    AmbientRuntime, DistributedSampler, DistributionContext, RuntimeContext, RuntimeProbe,
};
pub use transform::{DatasetExt, Processor};
