//! Buffered reordering stages: reservoir shuffle and length sort.
//!
//! Both adapt any iterator and hold at most their configured number of
//! items; neither drops or duplicates anything.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

/// Bounded-buffer shuffle.
///
/// The first `size` items fill the buffer; after that every incoming item
/// evicts a uniformly chosen buffered one. At end of stream the remainder is
/// shuffled and drained.
pub struct Shuffle<I: Iterator, R> {
    inner: I,
    buf: Vec<I::Item>,
    size: usize,
    rng: R,
    exhausted: bool,
}

impl<I: Iterator, R: Rng> Shuffle<I, R> {
    pub fn new(inner: I, size: usize, rng: R) -> Self {
        let size = size.max(1);
        Self {
            inner,
            buf: Vec::with_capacity(size.min(4096)),
            size,
            rng,
            exhausted: false,
        }
    }
}

impl<I: Iterator, R: Rng> Iterator for Shuffle<I, R> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        while !self.exhausted {
            match self.inner.next() {
                Some(item) if self.buf.len() < self.size => self.buf.push(item),
                Some(item) => {
                    let j = self.rng.random_range(0..self.buf.len());
                    return Some(std::mem::replace(&mut self.buf[j], item));
                }
                None => {
                    self.exhausted = true;
                    self.buf.shuffle(&mut self.rng);
                }
            }
        }
        self.buf.pop()
    }
}

/// Buffer `size` items, then release them in ascending key order.
///
/// The sort is stable, so equal keys keep their arrival order.
pub struct Sort<I: Iterator, F> {
    inner: I,
    buf: Vec<I::Item>,
    ready: VecDeque<I::Item>,
    size: usize,
    key: F,
}

impl<I, F, K> Sort<I, F>
where
    I: Iterator,
    F: FnMut(&I::Item) -> K,
    K: Ord,
{
    pub fn new(inner: I, size: usize, key: F) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            ready: VecDeque::new(),
            size: size.max(1),
            key,
        }
    }

    fn flush(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.sort_by_key(|item| (self.key)(item));
        self.ready.extend(buf);
    }
}

impl<I, F, K> Iterator for Sort<I, F>
where
    I: Iterator,
    F: FnMut(&I::Item) -> K,
    K: Ord,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            match self.inner.next() {
                Some(item) => {
                    self.buf.push(item);
                    if self.buf.len() >= self.size {
                        self.flush();
                    }
                }
                None if self.buf.is_empty() => return None,
                None => self.flush(),
            }
        }
    }
}
