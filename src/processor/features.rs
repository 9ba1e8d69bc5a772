//! Feature extraction stage.
//!
//! The acoustic front end itself is a collaborator: anything implementing
//! [`FeatureBackend`] (a Kaldi-compatible fbank, an MFCC implementation, a
//! Whisper-style log-mel) can be plugged in. This stage only routes each
//! record's waveform to the configured representation.

use std::sync::Arc;

use anyhow::Result;
use log::warn;
use ndarray::Array2;

use crate::config::{DatasetConf, FbankConf, FeatsType, LogMelSpectrogramConf, MfccConf};
use crate::processor::Record;

/// Computes `[frames, dim]` features from a `[channels, samples]` waveform.
pub trait FeatureBackend: Send + Sync {
    fn fbank(&self, wav: &Array2<f32>, sample_rate: u32, conf: &FbankConf) -> Result<Array2<f32>>;

    fn mfcc(&self, wav: &Array2<f32>, sample_rate: u32, conf: &MfccConf) -> Result<Array2<f32>>;

    fn log_mel_spectrogram(
        &self,
        wav: &Array2<f32>,
        sample_rate: u32,
        conf: &LogMelSpectrogramConf,
    ) -> Result<Array2<f32>>;
}

/// The selected representation together with its settings.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureKind {
    Fbank(FbankConf),
    Mfcc(MfccConf),
    LogMelSpectrogram(LogMelSpectrogramConf),
}

impl FeatureKind {
    pub fn from_conf(conf: &DatasetConf) -> Self {
        match conf.feats_type {
            FeatsType::Fbank => FeatureKind::Fbank(conf.fbank_conf.clone()),
            FeatsType::Mfcc => FeatureKind::Mfcc(conf.mfcc_conf.clone()),
            FeatsType::LogMelSpectrogram => {
                FeatureKind::LogMelSpectrogram(conf.log_mel_spectrogram_conf.clone())
            }
        }
    }

    fn compute(&self, backend: &dyn FeatureBackend, wav: &Array2<f32>, sr: u32) -> Result<Array2<f32>> {
        match self {
            FeatureKind::Fbank(c) => backend.fbank(wav, sr, c),
            FeatureKind::Mfcc(c) => backend.mfcc(wav, sr, c),
            FeatureKind::LogMelSpectrogram(c) => backend.log_mel_spectrogram(wav, sr, c),
        }
    }
}

/// Attach `feat` to every record; records that fail are dropped.
pub fn compute_features<I>(
    data: I,
    backend: Arc<dyn FeatureBackend>,
    kind: FeatureKind,
) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
{
    data.filter_map(move |rec| {
        let (Some(wav), Some(sr)) = (rec.wav.as_ref(), rec.sample_rate) else {
            warn!("no audio for {}, dropping", rec.display_key());
            return None;
        };
        match kind.compute(backend.as_ref(), wav, sr) {
            Ok(feat) => Some(Record { feat: Some(feat), ..rec }),
            Err(e) => {
                warn!("feature extraction failed for {}: {e}", rec.display_key());
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::sampler::DistributionContext;
    use anyhow::bail;

    /// One frame per 160 samples, feature value = chosen representation.
    struct Tagged;

    impl Tagged {
        fn frames(wav: &Array2<f32>, dim: usize, tag: f32) -> Array2<f32> {
            Array2::from_elem((wav.ncols() / 160, dim), tag)
        }
    }

    impl FeatureBackend for Tagged {
        fn fbank(&self, wav: &Array2<f32>, _: u32, c: &FbankConf) -> Result<Array2<f32>> {
            if wav.ncols() == 0 {
                bail!("empty waveform");
            }
            Ok(Self::frames(wav, c.num_mel_bins, 1.0))
        }

        fn mfcc(&self, wav: &Array2<f32>, _: u32, c: &MfccConf) -> Result<Array2<f32>> {
            Ok(Self::frames(wav, c.num_ceps, 2.0))
        }

        fn log_mel_spectrogram(
            &self,
            wav: &Array2<f32>,
            _: u32,
            c: &LogMelSpectrogramConf,
        ) -> Result<Array2<f32>> {
            Ok(Self::frames(wav, c.num_mel_bins, 3.0))
        }
    }

    fn rec(samples: usize) -> Record {
        let mut r = Record::new("s", DistributionContext::default());
        r.wav = Some(Array2::zeros((1, samples)));
        r.sample_rate = Some(16000);
        r
    }

    #[test]
    fn routes_to_configured_representation() {
        let mut conf = DatasetConf::default();
        for (ft, dim, tag) in [
            (FeatsType::Fbank, 23, 1.0),
            (FeatsType::Mfcc, 40, 2.0),
            (FeatsType::LogMelSpectrogram, 80, 3.0),
        ] {
            conf.feats_type = ft;
            let out: Vec<Record> =
                compute_features(vec![rec(1600)].into_iter(), Arc::new(Tagged), FeatureKind::from_conf(&conf))
                    .collect();
            let feat = out[0].feat.as_ref().unwrap();
            assert_eq!(feat.dim(), (10, dim));
            assert!(feat.iter().all(|&v| v == tag));
        }
    }

    #[test]
    fn failures_are_dropped() {
        let mut no_audio = rec(0);
        no_audio.wav = None;
        let out: Vec<Record> = compute_features(
            vec![rec(0), no_audio, rec(320)].into_iter(),
            Arc::new(Tagged),
            FeatureKind::Fbank(FbankConf::default()),
        )
        .collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].feat_len(), 2);
    }
}
