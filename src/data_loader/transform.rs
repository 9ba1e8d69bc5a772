//! Stage composition.
//!
//! [`Processor`] wraps an upstream dataset together with a transform over its
//! lazy sequence. Bound configuration travels inside the transform closure.
//! Chains are built by repeated wrapping, usually through
//! [`DatasetExt::apply`].

use std::marker::PhantomData;

use crate::data_loader::dataset::{BoxDataset, Dataset, DynIter};

/// Processor – applies a sequence transform `F` to the items of `S`.
pub struct Processor<S, F, O>
where
    S: Dataset,
    F: Fn(DynIter<S::Item>) -> DynIter<O> + Send + Sync + 'static,
    O: Send + 'static,
{
    source: S,
    func: F,
    _out: PhantomData<fn() -> O>,
}

impl<S, F, O> Processor<S, F, O>
where
    S: Dataset,
    F: Fn(DynIter<S::Item>) -> DynIter<O> + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(source: S, func: F) -> Self {
        Self {
            source,
            func,
            _out: PhantomData,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S, F, O> Dataset for Processor<S, F, O>
where
    S: Dataset,
    F: Fn(DynIter<S::Item>) -> DynIter<O> + Send + Sync + 'static,
    O: Send + 'static,
{
    type Item = O;

    fn iter(&self) -> DynIter<O> {
        (self.func)(self.source.iter())
    }

    fn set_epoch(&mut self, epoch: u64) {
        self.source.set_epoch(epoch);
    }
}

impl<S, F, O> std::fmt::Debug for Processor<S, F, O>
where
    S: Dataset + std::fmt::Debug,
    F: Fn(DynIter<S::Item>) -> DynIter<O> + Send + Sync + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Combinators available on every dataset.
pub trait DatasetExt: Dataset + Sized {
    /// Wrap `self` in a new stage running `func` over its sequence.
    fn apply<F, O>(self, func: F) -> Processor<Self, F, O>
    where
        F: Fn(DynIter<Self::Item>) -> DynIter<O> + Send + Sync + 'static,
        O: Send + 'static,
    {
        Processor::new(self, func)
    }

    /// Erase the concrete chain type.
    fn boxed(self) -> BoxDataset<Self::Item> {
        Box::new(self)
    }
}

impl<D: Dataset> DatasetExt for D {}
