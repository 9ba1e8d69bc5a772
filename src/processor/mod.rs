// src/processor/mod.rs

//! Stage library: every function here takes a lazy sequence and returns one.
//!
//! Stages are plain iterator adapters; [`crate::pipeline`] binds them to a
//! configuration and wraps them around a [`crate::data_loader::DataList`].

/// decoding and waveform transforms
pub mod audio;

pub mod augment;
pub mod batch;
pub mod features;

/// record and batch value types
pub mod record;

pub mod reorder;
pub mod shard;
pub mod text;

// Re‐export the key types at this level:
pub use audio::{LinearWaveformOps, WaveformOps};
pub use features::{FeatureBackend, FeatureKind};
pub use record::{PaddedBatch, Record};
pub use reorder::{Shuffle, Sort};
