// src/processor/batch.rs
//
// Grouping records into batches and collating batches into padded arrays.

use log::warn;
use ndarray::{s, Array2, Array3};

use crate::config::{BatchConf, BatchType, PaddingConf};
use crate::data_loader::dataset::{boxed_iter, DynIter};
use crate::processor::{PaddedBatch, Record};

/// Fixed-size batches; the last one may be short.
pub struct StaticBatch<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator<Item = Record>> Iterator for StaticBatch<I> {
    type Item = Vec<Record>;

    fn next(&mut self) -> Option<Vec<Record>> {
        let batch: Vec<Record> = self.inner.by_ref().take(self.size).collect();
        (!batch.is_empty()).then_some(batch)
    }
}

/// Batches bounded by `longest_frames * batch_len <= max_frames`.
///
/// A record whose frame count alone exceeds the budget becomes a batch of
/// its own; an empty batch is never produced.
pub struct DynamicBatch<I> {
    inner: I,
    max_frames: usize,
    buf: Vec<Record>,
    longest: usize,
}

impl<I: Iterator<Item = Record>> Iterator for DynamicBatch<I> {
    type Item = Vec<Record>;

    fn next(&mut self) -> Option<Vec<Record>> {
        for rec in self.inner.by_ref() {
            let len = rec.feat_len();
            let longest = self.longest.max(len);
            if !self.buf.is_empty() && longest * (self.buf.len() + 1) > self.max_frames {
                let full = std::mem::replace(&mut self.buf, vec![rec]);
                self.longest = len;
                return Some(full);
            }
            self.buf.push(rec);
            self.longest = longest;
        }
        self.longest = 0;
        let rest = std::mem::take(&mut self.buf);
        (!rest.is_empty()).then_some(rest)
    }
}

/// Group records according to `conf.batch_type`.
pub fn batch<I>(data: I, conf: BatchConf) -> DynIter<Vec<Record>>
where
    I: Iterator<Item = Record> + Send + 'static,
{
    match conf.batch_type {
        BatchType::Static => boxed_iter(StaticBatch {
            inner: data,
            size: conf.batch_size.max(1),
        }),
        BatchType::Dynamic => boxed_iter(DynamicBatch {
            inner: data,
            max_frames: conf.max_frames_in_batch,
            buf: Vec::new(),
            longest: 0,
        }),
    }
}

/// Collate one batch into zero-padded arrays.
///
/// Records without features, or whose feature dimension differs from the
/// first usable record, are dropped. Returns `None` if nothing is left.
pub fn collate(batch: Vec<Record>, conf: &PaddingConf) -> Option<PaddedBatch> {
    let dim = batch.iter().find_map(|r| r.feat.as_ref().map(|f| f.ncols()))?;
    let mut recs: Vec<Record> = batch
        .into_iter()
        .filter(|r| match r.feat.as_ref() {
            Some(f) if f.ncols() == dim => true,
            Some(f) => {
                warn!("{} has feature dim {}, expected {dim}, dropping", r.display_key(), f.ncols());
                false
            }
            None => {
                warn!("{} has no features, dropping", r.display_key());
                false
            }
        })
        .collect();
    if conf.sort_by_length {
        recs.sort_by_key(|r| std::cmp::Reverse(r.feat_len()));
    }

    let n = recs.len();
    let feats_lengths: Vec<usize> = recs.iter().map(Record::feat_len).collect();
    let label_lengths: Vec<usize> = recs.iter().map(Record::label_len).collect();
    let max_frames = feats_lengths.iter().copied().max().unwrap_or(0);
    let max_labels = label_lengths.iter().copied().max().unwrap_or(0);

    let mut feats = Array3::<f32>::zeros((n, max_frames, dim));
    let mut labels = Array2::<i64>::from_elem((n, max_labels), conf.label_pad_value);
    let mut keys = Vec::with_capacity(n);
    for (i, rec) in recs.into_iter().enumerate() {
        if let Some(feat) = rec.feat.as_ref() {
            feats.slice_mut(s![i, ..feat.nrows(), ..]).assign(feat);
        }
        if let Some(label) = rec.label.as_ref() {
            for (j, &v) in label.iter().enumerate() {
                labels[[i, j]] = v;
            }
        }
        keys.push(rec.key.unwrap_or(rec.src));
    }

    Some(PaddedBatch {
        keys,
        feats,
        feats_lengths,
        labels,
        label_lengths,
    })
}

/// Collate every batch; batches with no usable record are skipped.
pub fn padding<I>(data: I, conf: PaddingConf) -> impl Iterator<Item = PaddedBatch> + Send + 'static
where
    I: Iterator<Item = Vec<Record>> + Send + 'static,
{
    data.filter_map(move |batch| {
        let padded = collate(batch, &conf);
        if padded.is_none() {
            warn!("batch has no records with features, skipping");
        }
        padded
    })
}
