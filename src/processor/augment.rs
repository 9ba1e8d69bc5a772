// src/processor/augment.rs
//
// Spectral augmentation on computed features: masking, substitution and
// tail trimming. Every function takes `[frames, dim]` and returns a new array.

use ndarray::{s, Array2};
use rand::Rng;

use crate::config::{SpecAugConf, SpecSubConf, SpecTrimConf};
use crate::processor::Record;

/// Zero `conf.num_t_mask` time bands and `conf.num_f_mask` frequency bands.
pub fn spec_aug_features<R: Rng + ?Sized>(feat: &Array2<f32>, conf: &SpecAugConf, rng: &mut R) -> Array2<f32> {
    let mut y = feat.clone();
    let (frames, dim) = y.dim();
    if frames > 0 && conf.max_t > 0 {
        for _ in 0..conf.num_t_mask {
            let start = rng.random_range(0..frames);
            let end = (start + rng.random_range(1..=conf.max_t)).min(frames);
            y.slice_mut(s![start..end, ..]).fill(0.0);
        }
    }
    if dim > 0 && conf.max_f > 0 {
        for _ in 0..conf.num_f_mask {
            let start = rng.random_range(0..dim);
            let end = (start + rng.random_range(1..=conf.max_f)).min(dim);
            y.slice_mut(s![.., start..end]).fill(0.0);
        }
    }
    y
}

/// Replace `conf.num_t_sub` random segments with earlier frames of the input.
pub fn spec_sub_features<R: Rng + ?Sized>(feat: &Array2<f32>, conf: &SpecSubConf, rng: &mut R) -> Array2<f32> {
    let mut y = feat.clone();
    let frames = y.nrows();
    if frames == 0 || conf.max_t == 0 {
        return y;
    }
    for _ in 0..conf.num_t_sub {
        let start = rng.random_range(0..frames);
        let end = (start + rng.random_range(1..=conf.max_t)).min(frames);
        let pos = rng.random_range(0..=start);
        y.slice_mut(s![start..end, ..])
            .assign(&feat.slice(s![start - pos..end - pos, ..]));
    }
    y
}

/// Cut up to `conf.max_t` frames off the end, never more than half the input.
pub fn spec_trim_features<R: Rng + ?Sized>(feat: &Array2<f32>, conf: &SpecTrimConf, rng: &mut R) -> Array2<f32> {
    let frames = feat.nrows();
    if frames == 0 || conf.max_t == 0 {
        return feat.clone();
    }
    let len = rng.random_range(1..=conf.max_t);
    if 2 * len < frames {
        feat.slice(s![..frames - len, ..]).to_owned()
    } else {
        feat.clone()
    }
}

fn map_feat<I, R, F>(data: I, mut rng: R, f: F) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
    R: Rng + Send + 'static,
    F: Fn(&Array2<f32>, &mut R) -> Array2<f32> + Send + 'static,
{
    data.map(move |rec| match rec.feat.as_ref() {
        Some(feat) => {
            let feat = f(feat, &mut rng);
            Record { feat: Some(feat), ..rec }
        }
        None => rec,
    })
}

pub fn spec_aug<I, R>(data: I, conf: SpecAugConf, rng: R) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
    R: Rng + Send + 'static,
{
    map_feat(data, rng, move |feat, rng| spec_aug_features(feat, &conf, rng))
}

pub fn spec_sub<I, R>(data: I, conf: SpecSubConf, rng: R) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
    R: Rng + Send + 'static,
{
    map_feat(data, rng, move |feat, rng| spec_sub_features(feat, &conf, rng))
}

pub fn spec_trim<I, R>(data: I, conf: SpecTrimConf, rng: R) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
    R: Rng + Send + 'static,
{
    map_feat(data, rng, move |feat, rng| spec_trim_features(feat, &conf, rng))
}
