// src/pipeline.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Wiring of the full training chain.
//!
//! ```text
//! DataList -> shard/raw -> tokenize -> filter -> resample -> [speed_perturb]
//!          -> features -> [spec_aug] -> [spec_sub] -> [spec_trim]
//!          -> [shuffle] -> [sort] -> batch -> padding
//! ```
//!
//! Every stage is bound to its configuration when the chain is built and
//! re-run from the source on every pass. Random stages draw a fresh OS seed
//! per pass; only the shard order is tied to the epoch.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::DatasetConf;
use crate::data_loader::dataset::{boxed_iter, BoxDataset, DatasetError};
use crate::data_loader::sampler::{AmbientRuntime, RuntimeProbe};
use crate::data_loader::transform::DatasetExt;
use crate::data_loader::{read_lists, DataList};
use crate::processor::audio::{resample, speed_perturb, LinearWaveformOps, WaveformOps};
use crate::processor::augment::{spec_aug, spec_sub, spec_trim};
use crate::processor::batch::{batch, padding};
use crate::processor::features::{compute_features, FeatureBackend, FeatureKind};
use crate::processor::reorder::{Shuffle, Sort};
use crate::processor::shard::{parse_raw, tar_file_and_group, url_opener};
use crate::processor::text::{filter, tokenize};
use crate::processor::{PaddedBatch, Record};
use crate::tokenizer::Tokenizer;

/// Layout of the entries in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// One JSON line per utterance.
    Raw,
    /// One tar archive (path or URL) per line.
    Shard,
}

impl FromStr for DataType {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(DataType::Raw),
            "shard" => Ok(DataType::Shard),
            other => Err(format!("unknown data type `{other}`, expected raw or shard").into()),
        }
    }
}

/// External capabilities the chain calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub tokenizer: Arc<dyn Tokenizer>,
    pub features: Arc<dyn FeatureBackend>,
    pub waveform: Arc<dyn WaveformOps>,
    pub runtime: Arc<dyn RuntimeProbe>,
}

impl Collaborators {
    /// Linear waveform ops and the process environment as runtime.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, features: Arc<dyn FeatureBackend>) -> Self {
        Self {
            tokenizer,
            features,
            waveform: Arc::new(LinearWaveformOps),
            runtime: Arc::new(AmbientRuntime),
        }
    }

    pub fn waveform(mut self, ops: Arc<dyn WaveformOps>) -> Self {
        self.waveform = ops;
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn RuntimeProbe>) -> Self {
        self.runtime = runtime;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Build the training chain over the manifest at `data_list_file`.
///
/// `partition` splits shards across ranks; turn it off for evaluation so
/// every rank sees all data.
pub fn build_dataset(
    data_type: DataType,
    data_list_file: impl AsRef<Path>,
    collaborators: &Collaborators,
    conf: &DatasetConf,
    partition: bool,
) -> Result<BoxDataset<PaddedBatch>, DatasetError> {
    conf.validate()?;
    let lists = read_lists(data_list_file)?;
    Ok(build_from_lists(data_type, lists, collaborators, conf, partition))
}

/// Same as [`build_dataset`] over an in-memory manifest.
pub fn build_from_lists(
    data_type: DataType,
    lists: Vec<String>,
    collaborators: &Collaborators,
    conf: &DatasetConf,
    partition: bool,
) -> BoxDataset<PaddedBatch> {
    let source = DataList::new(lists, conf.shuffle, partition, Arc::clone(&collaborators.runtime));
    let mut ds: BoxDataset<Record> = match data_type {
        DataType::Shard => source
            .apply(|it| boxed_iter(tar_file_and_group(url_opener(it))))
            .boxed(),
        DataType::Raw => source.apply(|it| boxed_iter(parse_raw(it))).boxed(),
    };
    let mut stages = vec![format!("{data_type:?}").to_lowercase()];

    let tokenizer = Arc::clone(&collaborators.tokenizer);
    ds = ds
        .apply(move |it| boxed_iter(tokenize(it, Arc::clone(&tokenizer))))
        .boxed();
    stages.push("tokenize".into());

    let filter_conf = conf.filter_conf.clone();
    ds = ds.apply(move |it| boxed_iter(filter(it, filter_conf.clone()))).boxed();
    stages.push("filter".into());

    let resample_conf = conf.resample_conf.clone();
    let ops = Arc::clone(&collaborators.waveform);
    ds = ds
        .apply(move |it| boxed_iter(resample(it, resample_conf.clone(), Arc::clone(&ops))))
        .boxed();
    stages.push("resample".into());

    if conf.speed_perturb {
        let speeds = conf.speed_perturb_conf.speeds.clone();
        let ops = Arc::clone(&collaborators.waveform);
        ds = ds
            .apply(move |it| {
                boxed_iter(speed_perturb(it, speeds.clone(), Arc::clone(&ops), StdRng::from_os_rng()))
            })
            .boxed();
        stages.push("speed_perturb".into());
    }

    let kind = FeatureKind::from_conf(conf);
    let backend = Arc::clone(&collaborators.features);
    ds = ds
        .apply(move |it| boxed_iter(compute_features(it, Arc::clone(&backend), kind.clone())))
        .boxed();
    stages.push(format!("{:?}", conf.feats_type).to_lowercase());

    if conf.spec_aug {
        let c = conf.spec_aug_conf.clone();
        ds = ds
            .apply(move |it| boxed_iter(spec_aug(it, c.clone(), StdRng::from_os_rng())))
            .boxed();
        stages.push("spec_aug".into());
    }
    if conf.spec_sub {
        let c = conf.spec_sub_conf.clone();
        ds = ds
            .apply(move |it| boxed_iter(spec_sub(it, c.clone(), StdRng::from_os_rng())))
            .boxed();
        stages.push("spec_sub".into());
    }
    if conf.spec_trim {
        let c = conf.spec_trim_conf.clone();
        ds = ds
            .apply(move |it| boxed_iter(spec_trim(it, c.clone(), StdRng::from_os_rng())))
            .boxed();
        stages.push("spec_trim".into());
    }

    if conf.shuffle {
        let size = conf.shuffle_conf.shuffle_size;
        ds = ds
            .apply(move |it| boxed_iter(Shuffle::new(it, size, StdRng::from_os_rng())))
            .boxed();
        stages.push("shuffle".into());
    }
    if conf.sort {
        let size = conf.sort_conf.sort_size;
        ds = ds
            .apply(move |it| boxed_iter(Sort::new(it, size, Record::feat_len)))
            .boxed();
        stages.push("sort".into());
    }

    let batch_conf = conf.batch_conf.clone();
    let padding_conf = conf.padding_conf.clone();
    stages.push(format!("{:?}_batch", batch_conf.batch_type).to_lowercase());
    stages.push("padding".into());
    info!("dataset stages: {}", stages.join(" -> "));

    ds.apply(move |it| boxed_iter(padding(batch(it, batch_conf.clone()), padding_conf.clone())))
        .boxed()
}
