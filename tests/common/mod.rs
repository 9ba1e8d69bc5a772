// tests/common/mod.rs
//
// Common fixtures for the integration tests: wav/tar builders and mock
// collaborators, so no test needs network access or a real front end.

#![allow(dead_code)]

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use ndarray::Array2;

use asr_datapipe::config::{FbankConf, LogMelSpectrogramConf, MfccConf};
use asr_datapipe::{Collaborators, FeatureBackend, RuntimeContext, Tokenizer};

pub const SAMPLE_RATE: u32 = 16000;

/// Mono 16-bit WAV file contents with `samples` samples.
pub fn wav_bytes(samples: usize, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            w.write_sample(((i % 64) as i16 - 32) * 100).unwrap();
        }
        w.finalize().unwrap();
    }
    cursor.into_inner()
}

/// One utterance of a tar shard.
pub struct Utt {
    pub key: String,
    pub txt: String,
    pub samples: usize,
}

impl Utt {
    pub fn new(key: &str, txt: &str, seconds: f64) -> Self {
        Self {
            key: key.to_string(),
            txt: txt.to_string(),
            samples: (seconds * f64::from(SAMPLE_RATE)) as usize,
        }
    }
}

/// Write a tar shard holding `<key>.txt` and `<key>.wav` for every utterance.
pub fn write_shard(path: &Path, utts: &[Utt]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    for utt in utts {
        for (suffix, data) in [
            ("txt", utt.txt.as_bytes().to_vec()),
            ("wav", wav_bytes(utt.samples, SAMPLE_RATE)),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}.{suffix}", utt.key), data.as_slice())
                .unwrap();
        }
    }
    builder.finish().unwrap();
}

/// Write a manifest listing `entries`, one per line.
pub fn write_manifest(dir: &Path, entries: &[String]) -> PathBuf {
    let path = dir.join("data.list");
    std::fs::write(&path, entries.join("\n") + "\n").unwrap();
    path
}

/// One frame per 10 ms of audio, every value `1.0`.
#[derive(Debug, Default)]
pub struct FrameCounter;

impl FrameCounter {
    fn frames(wav: &Array2<f32>, sample_rate: u32, dim: usize) -> Array2<f32> {
        let frames = wav.ncols() * 100 / sample_rate as usize;
        Array2::from_elem((frames, dim), 1.0)
    }
}

impl FeatureBackend for FrameCounter {
    fn fbank(&self, wav: &Array2<f32>, sr: u32, conf: &FbankConf) -> Result<Array2<f32>> {
        Ok(Self::frames(wav, sr, conf.num_mel_bins))
    }

    fn mfcc(&self, wav: &Array2<f32>, sr: u32, conf: &MfccConf) -> Result<Array2<f32>> {
        Ok(Self::frames(wav, sr, conf.num_ceps))
    }

    fn log_mel_spectrogram(&self, wav: &Array2<f32>, sr: u32, conf: &LogMelSpectrogramConf) -> Result<Array2<f32>> {
        Ok(Self::frames(wav, sr, conf.num_mel_bins))
    }
}

/// Every non-space character is a token, labelled by its code point.
#[derive(Debug, Default)]
pub struct CodePoints;

impl Tokenizer for CodePoints {
    fn tokenize(&self, text: &str) -> (Vec<String>, Vec<i64>) {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        (
            chars.iter().map(|c| c.to_string()).collect(),
            chars.iter().map(|&c| i64::from(u32::from(c))).collect(),
        )
    }
}

/// Collaborators with mock tokenizer/features and a fixed runtime.
pub fn collaborators(runtime: RuntimeContext) -> Collaborators {
    Collaborators::new(Arc::new(CodePoints), Arc::new(FrameCounter)).runtime(Arc::new(runtime))
}
