//! Values flowing between stages.

use std::collections::BTreeMap;

use bytes::Bytes;
use ndarray::{Array2, Array3};

use crate::data_loader::sampler::DistributionContext;

/// One utterance (or, before shard materialization, one shard entry).
///
/// Stages take a record by value and hand on a record derived from it, so
/// no two stages ever observe the same value. Fields only get added on the
/// way down, except `feat` which augmentation stages replace.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Shard entry this record came from.
    pub src: String,
    pub dist: DistributionContext,
    pub key: Option<String>,
    /// Waveform, `[channels, samples]`.
    pub wav: Option<Array2<f32>>,
    pub sample_rate: Option<u32>,
    pub txt: Option<String>,
    pub tokens: Option<Vec<String>>,
    pub label: Option<Vec<i64>>,
    /// Features, `[frames, dim]`.
    pub feat: Option<Array2<f32>>,
    /// Shard members with no dedicated field, keyed by suffix.
    pub extra: BTreeMap<String, Bytes>,
}

impl Record {
    pub fn new(src: impl Into<String>, dist: DistributionContext) -> Self {
        Self {
            src: src.into(),
            dist,
            key: None,
            wav: None,
            sample_rate: None,
            txt: None,
            tokens: None,
            label: None,
            feat: None,
            extra: BTreeMap::new(),
        }
    }

    /// Number of waveform samples per channel, 0 without audio.
    pub fn num_samples(&self) -> usize {
        self.wav.as_ref().map(|w| w.ncols()).unwrap_or(0)
    }

    /// Number of feature frames, 0 before feature extraction.
    pub fn feat_len(&self) -> usize {
        self.feat.as_ref().map(|f| f.nrows()).unwrap_or(0)
    }

    pub fn label_len(&self) -> usize {
        self.label.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Key for log messages: the utterance key when known, else the source.
    pub fn display_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.src)
    }
}

/// Collated batch, ready for training.
///
/// Row `i` of every field belongs to `keys[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    pub keys: Vec<String>,
    /// `[batch, max_frames, dim]`, zero past each record's length.
    pub feats: Array3<f32>,
    pub feats_lengths: Vec<usize>,
    /// `[batch, max_labels]`, padded with the configured fill value.
    pub labels: Array2<i64>,
    pub label_lengths: Vec<usize>,
}

impl PaddedBatch {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
