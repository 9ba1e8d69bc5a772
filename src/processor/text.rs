//! Transcript stages: tokenize and length filtering.

use std::sync::Arc;

use log::{debug, warn};

use crate::config::FilterConf;
use crate::processor::Record;
use crate::tokenizer::Tokenizer;

/// Attach `tokens` and `label` computed from each record's transcript.
pub fn tokenize<I>(data: I, tokenizer: Arc<dyn Tokenizer>) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
{
    data.filter_map(move |rec| {
        let Some(txt) = rec.txt.as_deref() else {
            warn!("no transcript for {}, dropping", rec.display_key());
            return None;
        };
        let (tokens, label) = tokenizer.tokenize(txt);
        Some(Record {
            tokens: Some(tokens),
            label: Some(label),
            ..rec
        })
    })
}

/// Duration of a record in 10 ms frames.
pub fn num_frames(rec: &Record) -> f64 {
    match rec.sample_rate {
        Some(sr) if sr > 0 => rec.num_samples() as f64 / f64::from(sr) * 100.0,
        _ => 0.0,
    }
}

/// Whether `rec` lies within every bound of `conf`.
pub fn keep(rec: &Record, conf: &FilterConf) -> bool {
    let frames = num_frames(rec);
    if frames < conf.min_length || frames > conf.max_length {
        return false;
    }
    let labels = rec.label_len();
    if labels < conf.token_min_length || labels > conf.token_max_length {
        return false;
    }
    if frames > 0.0 {
        let ratio = labels as f64 / frames;
        if ratio < conf.min_output_input_ratio || ratio > conf.max_output_input_ratio {
            return false;
        }
    }
    true
}

/// Drop records outside the configured duration and label bounds.
pub fn filter<I>(data: I, conf: FilterConf) -> impl Iterator<Item = Record> + Send + 'static
where
    I: Iterator<Item = Record> + Send + 'static,
{
    data.filter(move |rec| {
        let ok = keep(rec, &conf);
        if !ok {
            debug!("filtered out {}", rec.display_key());
        }
        ok
    })
}
