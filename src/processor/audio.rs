// src/processor/audio.rs
//
// Waveform decoding and waveform-level stages (resample, speed perturb).

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Result};
use log::warn;
use ndarray::{s, Array2};
use rand::Rng;

use crate::config::ResampleConf;
use crate::data_loader::dataset::DatasetError;
use crate::processor::Record;

/// Suffixes treated as audio members of a shard.
pub const AUDIO_FORMATS: &[&str] = &["flac", "mp3", "m4a", "ogg", "opus", "wav", "wma"];

/// Decode a WAV stream into `[channels, samples]` floats in `[-1, 1]`.
pub fn decode_wav<R: Read>(reader: R) -> Result<(Array2<f32>, u32), DatasetError> {
    let mut reader = hound::WavReader::new(reader)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    let frames = interleaved.len() / channels;
    let wav = Array2::from_shape_fn((channels, frames), |(c, t)| interleaved[t * channels + c]);
    Ok((wav, spec.sample_rate))
}

/// Load a WAV file, optionally cutting `[start, end)` seconds out of it.
pub fn load_wav(
    path: impl AsRef<Path>,
    start: Option<f64>,
    end: Option<f64>,
) -> Result<(Array2<f32>, u32), DatasetError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| DatasetError::io(path.display().to_string(), e))?;
    let (wav, sample_rate) = decode_wav(std::io::BufReader::new(file))?;
    if start.is_none() && end.is_none() {
        return Ok((wav, sample_rate));
    }
    let total = wav.ncols();
    let to_frame = |sec: f64| ((sec.max(0.0) * f64::from(sample_rate)) as usize).min(total);
    let begin = start.map(to_frame).unwrap_or(0);
    let finish = end.map(to_frame).unwrap_or(total);
    if begin >= finish {
        return Err(DatasetError::Audio(format!(
            "empty segment [{begin}, {finish}) in {}",
            path.display()
        )));
    }
    Ok((wav.slice(s![.., begin..finish]).to_owned(), sample_rate))
}

/// Waveform transforms used by the resample and speed-perturb stages.
pub trait WaveformOps: Send + Sync {
    /// Convert `wav` from `from` Hz to `to` Hz.
    fn resample(&self, wav: &Array2<f32>, from: u32, to: u32) -> Result<Array2<f32>>;

    /// Play `wav` `factor` times faster (tempo and pitch), keeping the rate.
    fn speed(&self, wav: &Array2<f32>, sample_rate: u32, factor: f32) -> Result<Array2<f32>>;
}

/// Linear-interpolation implementation of [`WaveformOps`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearWaveformOps;

impl LinearWaveformOps {
    /// Read `wav` at positions `0, step, 2*step, ...` producing `out_len` samples.
    fn interpolate(wav: &Array2<f32>, step: f64, out_len: usize) -> Array2<f32> {
        let n = wav.ncols();
        let mut out = Array2::<f32>::zeros((wav.nrows(), out_len));
        if n == 0 {
            return out;
        }
        for i in 0..out_len {
            let pos = i as f64 * step;
            let i0 = (pos.floor() as usize).min(n - 1);
            let i1 = (i0 + 1).min(n - 1);
            let frac = (pos - i0 as f64) as f32;
            for c in 0..wav.nrows() {
                let a = wav[[c, i0]];
                let b = wav[[c, i1]];
                out[[c, i]] = a + (b - a) * frac;
            }
        }
        out
    }
}

impl WaveformOps for LinearWaveformOps {
    fn resample(&self, wav: &Array2<f32>, from: u32, to: u32) -> Result<Array2<f32>> {
        ensure!(from > 0 && to > 0, "invalid sample rates {from} -> {to}");
        if from == to {
            return Ok(wav.clone());
        }
        let out_len = (wav.ncols() as f64 * f64::from(to) / f64::from(from)).round() as usize;
        Ok(Self::interpolate(wav, f64::from(from) / f64::from(to), out_len))
    }

    fn speed(&self, wav: &Array2<f32>, _sample_rate: u32, factor: f32) -> Result<Array2<f32>> {
        ensure!(factor > 0.0, "speed factor must be positive, got {factor}");
        let out_len = (wav.ncols() as f64 / f64::from(factor)).round() as usize;
        Ok(Self::interpolate(wav, f64::from(factor), out_len))
    }
}

/// Bring every record to `conf.resample_rate`.
pub fn resample<I>(
    data: I,
    conf: ResampleConf,
    ops: Arc<dyn WaveformOps>,
) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
{
    let target = conf.resample_rate;
    data.filter_map(move |rec| {
        let (Some(wav), Some(sr)) = (rec.wav.as_ref(), rec.sample_rate) else {
            return Some(rec);
        };
        if sr == target {
            return Some(rec);
        }
        match ops.resample(wav, sr, target) {
            Ok(wav) => Some(Record {
                wav: Some(wav),
                sample_rate: Some(target),
                ..rec
            }),
            Err(e) => {
                warn!("failed to resample {}: {e}", rec.display_key());
                None
            }
        }
    })
}

/// Apply a tempo change picked uniformly from `speeds`.
pub fn speed_perturb<I, R>(
    data: I,
    speeds: Vec<f32>,
    ops: Arc<dyn WaveformOps>,
    mut rng: R,
) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
    R: Rng + Send + 'static,
{
    data.filter_map(move |rec| {
        if speeds.is_empty() {
            return Some(rec);
        }
        let speed = speeds[rng.random_range(0..speeds.len())];
        if speed == 1.0 {
            return Some(rec);
        }
        let (Some(wav), Some(sr)) = (rec.wav.as_ref(), rec.sample_rate) else {
            return Some(rec);
        };
        match ops.speed(wav, sr, speed) {
            Ok(wav) => Some(Record { wav: Some(wav), ..rec }),
            Err(e) => {
                warn!("failed to perturb {}: {e}", rec.display_key());
                None
            }
        }
    })
}
