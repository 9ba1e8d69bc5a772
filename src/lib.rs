// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root, public re-exports.

//! Lazy, sharded data ingestion and preprocessing for ASR training.
//!
//! A manifest of shards is split across ranks and loader workers by a
//! [`DistributedSampler`](data_loader::DistributedSampler), expanded into
//! utterance [`Record`]s, and pushed through a chain of stages ending in
//! zero-padded [`PaddedBatch`]es. See [`pipeline::build_dataset`].

// ===== Core Public API =====
pub mod config;
pub mod data_loader;
pub mod pipeline;
pub mod processor;
pub mod text2token;
pub mod tokenizer;

pub use config::{override_config, try_override_config, ConfigError, ConfigOverride, DatasetConf};
pub use data_loader::{
    BoxDataset, DataLoader, DataLoaderIter, DataList, Dataset, DatasetError, DatasetExt, DistributedSampler,
    DistributionContext, LoaderOptions, RuntimeContext, RuntimeProbe,
};
pub use pipeline::{build_dataset, build_from_lists, Collaborators, DataType};
pub use processor::{FeatureBackend, PaddedBatch, Record, WaveformOps};
pub use tokenizer::{CharTokenizer, Tokenizer};
