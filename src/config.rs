// src/config.rs
//
// Typed dataset configuration plus dotted-path overrides.

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod overrides;

pub use overrides::{apply_override, override_config, try_override_config, ConfigOverride};

/// Configuration errors, from loading, validation, or overrides.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("override `{0}` must have the form \"dotted.key.path value\"")]
    Malformed(String),

    #[error("override path `{path}`: unknown key `{key}`")]
    UnknownKey { path: String, key: String },

    #[error("override path `{path}`: cannot use `{value}`: {reason}")]
    InvalidValue {
        path: String,
        value: String,
        reason: String,
    },

    #[error("failed to load config {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Acoustic feature representation computed by the feature stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatsType {
    Fbank,
    Mfcc,
    LogMelSpectrogram,
}

/// Batching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    /// Fixed number of records per batch.
    Static,
    /// Bounded by the padded frame count of the batch.
    Dynamic,
}

/// Duration/length bounds applied by the filter stage.
///
/// Lengths are in 10 ms frames; token bounds count labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConf {
    pub max_length: f64,
    pub min_length: f64,
    pub token_max_length: usize,
    pub token_min_length: usize,
    pub min_output_input_ratio: f64,
    pub max_output_input_ratio: f64,
}

impl Default for FilterConf {
    fn default() -> Self {
        Self {
            max_length: 10240.0,
            min_length: 10.0,
            token_max_length: 200,
            token_min_length: 1,
            min_output_input_ratio: 0.0005,
            max_output_input_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResampleConf {
    pub resample_rate: u32,
}

impl Default for ResampleConf {
    fn default() -> Self {
        Self { resample_rate: 16000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeedPerturbConf {
    /// Candidate tempo factors, one picked uniformly per record.
    pub speeds: Vec<f32>,
}

impl Default for SpeedPerturbConf {
    fn default() -> Self {
        Self {
            speeds: vec![0.9, 1.0, 1.1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FbankConf {
    pub num_mel_bins: usize,
    /// Frame length in milliseconds.
    pub frame_length: f32,
    /// Frame shift in milliseconds.
    pub frame_shift: f32,
    pub dither: f32,
}

impl Default for FbankConf {
    fn default() -> Self {
        Self {
            num_mel_bins: 23,
            frame_length: 25.0,
            frame_shift: 10.0,
            dither: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MfccConf {
    pub num_mel_bins: usize,
    pub frame_length: f32,
    pub frame_shift: f32,
    pub dither: f32,
    pub num_ceps: usize,
    pub high_freq: f32,
    pub low_freq: f32,
}

impl Default for MfccConf {
    fn default() -> Self {
        Self {
            num_mel_bins: 23,
            frame_length: 25.0,
            frame_shift: 10.0,
            dither: 0.0,
            num_ceps: 40,
            high_freq: 0.0,
            low_freq: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogMelSpectrogramConf {
    pub n_fft: usize,
    pub hop_length: usize,
    pub num_mel_bins: usize,
    pub padding: usize,
}

impl Default for LogMelSpectrogramConf {
    fn default() -> Self {
        Self {
            n_fft: 400,
            hop_length: 160,
            num_mel_bins: 80,
            padding: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecAugConf {
    pub num_t_mask: usize,
    pub num_f_mask: usize,
    pub max_t: usize,
    pub max_f: usize,
    /// Time-warp width; accepted for config compatibility, warping is not applied.
    pub max_w: usize,
}

impl Default for SpecAugConf {
    fn default() -> Self {
        Self {
            num_t_mask: 2,
            num_f_mask: 2,
            max_t: 50,
            max_f: 10,
            max_w: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecSubConf {
    pub max_t: usize,
    pub num_t_sub: usize,
}

impl Default for SpecSubConf {
    fn default() -> Self {
        Self { max_t: 20, num_t_sub: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecTrimConf {
    pub max_t: usize,
}

impl Default for SpecTrimConf {
    fn default() -> Self {
        Self { max_t: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShuffleConf {
    pub shuffle_size: usize,
}

impl Default for ShuffleConf {
    fn default() -> Self {
        Self { shuffle_size: 10000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortConf {
    pub sort_size: usize,
}

impl Default for SortConf {
    fn default() -> Self {
        Self { sort_size: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConf {
    pub batch_type: BatchType,
    pub batch_size: usize,
    pub max_frames_in_batch: usize,
}

impl Default for BatchConf {
    fn default() -> Self {
        Self {
            batch_type: BatchType::Static,
            batch_size: 16,
            max_frames_in_batch: 12000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaddingConf {
    /// Reorder each batch by descending frame count before collation.
    pub sort_by_length: bool,
    /// Fill value for label positions past a record's label length.
    pub label_pad_value: i64,
}

impl Default for PaddingConf {
    fn default() -> Self {
        Self {
            sort_by_length: false,
            label_pad_value: 0,
        }
    }
}

/// Everything the stage chain needs to know, one field per recognised key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConf {
    pub shuffle: bool,
    pub filter_conf: FilterConf,
    pub resample_conf: ResampleConf,
    pub speed_perturb: bool,
    pub speed_perturb_conf: SpeedPerturbConf,
    pub feats_type: FeatsType,
    pub fbank_conf: FbankConf,
    pub mfcc_conf: MfccConf,
    pub log_mel_spectrogram_conf: LogMelSpectrogramConf,
    pub spec_aug: bool,
    pub spec_aug_conf: SpecAugConf,
    pub spec_sub: bool,
    pub spec_sub_conf: SpecSubConf,
    pub spec_trim: bool,
    pub spec_trim_conf: SpecTrimConf,
    pub shuffle_conf: ShuffleConf,
    pub sort: bool,
    pub sort_conf: SortConf,
    pub batch_conf: BatchConf,
    pub padding_conf: PaddingConf,
}

impl Default for DatasetConf {
    fn default() -> Self {
        Self {
            shuffle: true,
            filter_conf: FilterConf::default(),
            resample_conf: ResampleConf::default(),
            speed_perturb: false,
            speed_perturb_conf: SpeedPerturbConf::default(),
            feats_type: FeatsType::Fbank,
            fbank_conf: FbankConf::default(),
            mfcc_conf: MfccConf::default(),
            log_mel_spectrogram_conf: LogMelSpectrogramConf::default(),
            spec_aug: true,
            spec_aug_conf: SpecAugConf::default(),
            spec_sub: false,
            spec_sub_conf: SpecSubConf::default(),
            spec_trim: false,
            spec_trim_conf: SpecTrimConf::default(),
            shuffle_conf: ShuffleConf::default(),
            sort: true,
            sort_conf: SortConf::default(),
            batch_conf: BatchConf::default(),
            padding_conf: PaddingConf::default(),
        }
    }
}

impl DatasetConf {
    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Load {
            path: "<string>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let load_err = |reason: String| ConfigError::Load {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| load_err(e.to_string()))
    }

    /// Reject settings that would make the chain meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bc = &self.batch_conf;
        match bc.batch_type {
            BatchType::Static if bc.batch_size == 0 => {
                return Err(ConfigError::Invalid("batch_conf.batch_size must be > 0".into()));
            }
            BatchType::Dynamic if bc.max_frames_in_batch == 0 => {
                return Err(ConfigError::Invalid(
                    "dynamic batching requires batch_conf.max_frames_in_batch > 0".into(),
                ));
            }
            _ => {}
        }
        if self.speed_perturb && self.speed_perturb_conf.speeds.is_empty() {
            return Err(ConfigError::Invalid("speed_perturb_conf.speeds is empty".into()));
        }
        if self.resample_conf.resample_rate == 0 {
            return Err(ConfigError::Invalid("resample_conf.resample_rate must be > 0".into()));
        }
        if self.shuffle && self.sort && self.sort_conf.sort_size > self.shuffle_conf.shuffle_size {
            warn!(
                "sort_size ({}) exceeds shuffle_size ({}); sorting will mostly happen at end of stream",
                self.sort_conf.sort_size, self.shuffle_conf.shuffle_size
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let conf = DatasetConf::from_json_str(
            r#"{"feats_type": "mfcc", "batch_conf": {"batch_type": "dynamic", "max_frames_in_batch": 3000}}"#,
        )
        .unwrap();
        assert_eq!(conf.feats_type, FeatsType::Mfcc);
        assert_eq!(conf.batch_conf.batch_type, BatchType::Dynamic);
        assert_eq!(conf.batch_conf.max_frames_in_batch, 3000);
        assert_eq!(conf.batch_conf.batch_size, 16);
        assert!(conf.shuffle && conf.sort && conf.spec_aug);
        assert!(!conf.spec_sub && !conf.spec_trim && !conf.speed_perturb);
    }

    #[test]
    fn unsupported_feats_type_is_rejected() {
        let err = DatasetConf::from_json_str(r#"{"feats_type": "spectrogram"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
        let err = DatasetConf::from_json_str(r#"{"batch_conf": {"batch_type": "bucket"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(DatasetConf::from_json_str(r#"{"shufle": true}"#).is_err());
    }

    #[test]
    fn validate_dynamic_budget() {
        let mut conf = DatasetConf::default();
        conf.batch_conf.batch_type = BatchType::Dynamic;
        conf.batch_conf.max_frames_in_batch = 0;
        assert!(matches!(conf.validate(), Err(ConfigError::Invalid(_))));
        conf.batch_conf.max_frames_in_batch = 100;
        assert!(conf.validate().is_ok());
    }
}
