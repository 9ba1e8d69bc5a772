//! Core dataset abstractions for the preprocessing pipeline.
//!
//! A [`Dataset`] is a restartable, lazy source of items. Every call to
//! [`Dataset::iter`] starts a fresh pass over the data; nothing is pulled
//! until the returned iterator is advanced. Stages are composed by wrapping
//! one dataset in another (see [`crate::data_loader::transform`]) and the
//! epoch signal travels down that chain through [`Dataset::set_epoch`] until
//! it reaches the sampler at the root.

use anyhow::Error as AnyError;
use thiserror::Error;

/// A boxed, sendable, lazily evaluated sequence of items.
pub type DynIter<T> = Box<dyn Iterator<Item = T> + Send + 'static>;

/// A type-erased dataset, used where the stage chain is assembled at runtime.
pub type BoxDataset<T> = Box<dyn Dataset<Item = T>>;

/// Error type for dataset construction and loader operations.
///
/// Per-record data problems never surface here: stages log and drop the
/// offending record so the stream keeps going.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open shard {src}: {reason}")]
    Shard { src: String, reason: String },

    #[error("audio decode error: {0}")]
    Audio(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("data loader worker {id} failed: {reason}")]
    Worker { id: usize, reason: String },

    #[error(transparent)]
    Backend(#[from] AnyError),
}

impl DatasetError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}

// Mapping from string to error
impl From<String> for DatasetError {
    fn from(s: String) -> Self {
        DatasetError::Backend(AnyError::msg(s))
    }
}

impl From<&str> for DatasetError {
    fn from(s: &str) -> Self {
        DatasetError::Backend(AnyError::msg(s.to_string()))
    }
}

impl From<hound::Error> for DatasetError {
    fn from(e: hound::Error) -> Self {
        DatasetError::Audio(e.to_string())
    }
}

/// A restartable, lazy collection of items (records, batches, ...).
///
/// Implementors fall into two categories:
///
/// * **Sources** – produce the first items of a chain (see
///   [`crate::data_loader::data_list::DataList`]) and own the epoch state.
/// * **Stages** – wrap another dataset and transform its sequence; they
///   forward [`Dataset::set_epoch`] to the dataset they wrap.
pub trait Dataset: Send + Sync + 'static {
    /// Concrete type produced for each element of the sequence.
    type Item: Send + 'static;

    /// Start a new pass over the data.
    ///
    /// The returned iterator must be lazy: it may not materialize the whole
    /// upstream sequence before yielding its first element.
    fn iter(&self) -> DynIter<Self::Item>;

    /// Record the epoch used to seed deterministic shuffling.
    fn set_epoch(&mut self, epoch: u64);
}

impl<T: Send + 'static> Dataset for Box<dyn Dataset<Item = T>> {
    type Item = T;

    fn iter(&self) -> DynIter<T> {
        (**self).iter()
    }

    fn set_epoch(&mut self, epoch: u64) {
        (**self).set_epoch(epoch)
    }
}

/// Box any iterator into a [`DynIter`].
pub fn boxed_iter<I>(iter: I) -> DynIter<I::Item>
where
    I: Iterator + Send + 'static,
{
    Box::new(iter)
}
