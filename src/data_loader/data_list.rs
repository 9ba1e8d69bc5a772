//! Source stage: the manifest of shard entries.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use crate::data_loader::dataset::{Dataset, DatasetError, DynIter};
use crate::data_loader::sampler::{DistributedSampler, RuntimeProbe};
use crate::processor::Record;

/// Read a manifest: one shard entry (path or URL) per line.
///
/// Surrounding whitespace is stripped and blank lines are ignored.
pub fn read_lists(path: impl AsRef<Path>) -> Result<Vec<String>, DatasetError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| DatasetError::io(path.display().to_string(), e))?;
    let mut lists = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| DatasetError::io(path.display().to_string(), e))?;
        let entry = line.trim();
        if !entry.is_empty() {
            lists.push(entry.to_string());
        }
    }
    info!("read {} shard entries from {}", lists.len(), path.display());
    Ok(lists)
}

/// Iterates the shard entries assigned to this (rank, worker) pair.
///
/// Each pass re-queries the runtime and re-samples, so a new epoch (or a
/// re-spawned worker pool) takes effect on the next call to `iter`.
#[derive(Debug, Clone)]
pub struct DataList {
    lists: Arc<Vec<String>>,
    sampler: DistributedSampler,
}

impl DataList {
    pub fn new(
        lists: Vec<String>,
        shuffle: bool,
        partition: bool,
        runtime: Arc<dyn RuntimeProbe>,
    ) -> Self {
        Self {
            lists: Arc::new(lists),
            sampler: DistributedSampler::new(shuffle, partition, runtime),
        }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn sampler(&self) -> &DistributedSampler {
        &self.sampler
    }
}

impl Dataset for DataList {
    type Item = Record;

    fn iter(&self) -> DynIter<Record> {
        let ctx = self.sampler.update();
        let indexes = self.sampler.sample(&self.lists, &ctx);
        debug!("data list pass: {} entries for {:?}", indexes.len(), ctx);
        let lists = Arc::clone(&self.lists);
        Box::new(
            indexes
                .into_iter()
                .map(move |index| Record::new(lists[index].clone(), ctx)),
        )
    }

    fn set_epoch(&mut self, epoch: u64) {
        self.sampler.set_epoch(epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::sampler::RuntimeContext;
    use std::io::Write;

    #[test]
    fn read_lists_skips_blank_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "a.tar\n\n  b.tar  \nhttp://host/c.tar").unwrap();
        let lists = read_lists(f.path()).unwrap();
        assert_eq!(lists, vec!["a.tar", "b.tar", "http://host/c.tar"]);
    }

    #[test]
    fn read_lists_missing_file() {
        let err = read_lists("/definitely/not/here.list").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn records_carry_distribution_context() {
        let rt = RuntimeContext::single_process().distributed(1, 2);
        let dl = DataList::new(
            (0..4).map(|i| format!("shard{i}")).collect(),
            false,
            true,
            Arc::new(rt),
        );
        let got: Vec<Record> = dl.iter().collect();
        let srcs: Vec<&str> = got.iter().map(|r| r.src.as_str()).collect();
        assert_eq!(srcs, vec!["shard1", "shard3"]);
        assert!(got.iter().all(|r| r.dist.rank == 1 && r.dist.world_size == 2));
    }

    #[test]
    fn restartable_and_epoch_sensitive() {
        let mut dl = DataList::new(
            (0..64).map(|i| i.to_string()).collect(),
            true,
            true,
            Arc::new(RuntimeContext::single_process()),
        );
        dl.set_epoch(1);
        let a: Vec<String> = dl.iter().map(|r| r.src).collect();
        let again: Vec<String> = dl.iter().map(|r| r.src).collect();
        assert_eq!(a, again);
        dl.set_epoch(2);
        let b: Vec<String> = dl.iter().map(|r| r.src).collect();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
