// src/config/overrides.rs
//
// Command-line style overrides: "dotted.key.path value".
//
// The path is checked against the serialized schema, the literal is coerced
// to the type of the value it replaces, and the result is deserialized back
// into the typed config so enum keys and numeric ranges stay valid.

use std::str::FromStr;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Number, Value};

use super::ConfigError;

/// One parsed override item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOverride {
    pub path: Vec<String>,
    pub value: String,
}

impl ConfigOverride {
    /// Parse `"dotted.key.path value"`; exactly two whitespace-separated tokens.
    pub fn parse(item: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = item.split_whitespace().collect();
        let [path, value] = parts.as_slice() else {
            return Err(ConfigError::Malformed(item.to_string()));
        };
        if path.split('.').any(str::is_empty) {
            return Err(ConfigError::Malformed(item.to_string()));
        }
        Ok(Self {
            path: path.split('.').map(str::to_string).collect(),
            value: value.to_string(),
        })
    }

    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

impl FromStr for ConfigOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Apply a single override, returning the updated copy.
pub fn apply_override<T>(conf: &T, ov: &ConfigOverride) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    let dotted = ov.dotted_path();
    let invalid = |reason: String| ConfigError::InvalidValue {
        path: dotted.clone(),
        value: ov.value.clone(),
        reason,
    };

    let mut root = serde_json::to_value(conf).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let mut node = &mut root;
    for key in &ov.path {
        let next = match node {
            Value::Object(map) => map.get_mut(key),
            _ => None,
        };
        node = next.ok_or_else(|| ConfigError::UnknownKey {
            path: dotted.clone(),
            key: key.clone(),
        })?;
    }

    *node = coerce(node, &ov.value).map_err(invalid)?;
    serde_json::from_value(root).map_err(|e| invalid(e.to_string()))
}

/// Convert `literal` to the JSON type of `current`.
fn coerce(current: &Value, literal: &str) -> Result<Value, String> {
    match current {
        Value::Bool(_) => Ok(Value::Bool(matches!(literal, "true" | "True"))),
        Value::Number(n) if n.is_f64() => literal
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| "expected a float".to_string()),
        Value::Number(_) => literal
            .parse::<i64>()
            .map(|v| Value::Number(v.into()))
            .or_else(|_| literal.parse::<u64>().map(|v| Value::Number(v.into())))
            .map_err(|e| format!("expected an integer: {e}")),
        Value::String(_) => Ok(Value::String(literal.to_string())),
        Value::Null => Ok(serde_json::from_str(literal).unwrap_or_else(|_| Value::String(literal.to_string()))),
        Value::Array(_) => match serde_json::from_str(literal) {
            Ok(v @ Value::Array(_)) => Ok(v),
            _ => Err("expected a JSON array".to_string()),
        },
        Value::Object(_) => Err("cannot replace a whole section; override one of its keys".to_string()),
    }
}

/// Apply every item in order, stopping at the first failure.
pub fn try_override_config<T, I>(conf: &T, items: I) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned + Clone,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut current = conf.clone();
    for item in items {
        let ov = ConfigOverride::parse(item.as_ref())?;
        current = apply_override(&current, &ov)?;
        info!("override {} with {}", ov.dotted_path(), ov.value);
    }
    Ok(current)
}

/// Apply every item in order; items that fail are logged and skipped.
///
/// The input configuration is never modified.
pub fn override_config<T, I>(conf: &T, items: I) -> T
where
    T: Serialize + DeserializeOwned + Clone,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut current = conf.clone();
    for item in items {
        let item = item.as_ref();
        match ConfigOverride::parse(item).and_then(|ov| {
            let updated = apply_override(&current, &ov)?;
            Ok((ov, updated))
        }) {
            Ok((ov, updated)) => {
                info!("override {} with {}", ov.dotted_path(), ov.value);
                current = updated;
            }
            Err(e) => warn!("the override {item} format not correct, skip it: {e}"),
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchType, DatasetConf, FeatsType};

    #[test]
    fn parse_requires_two_tokens() {
        assert!(matches!(ConfigOverride::parse("spec_aug"), Err(ConfigError::Malformed(_))));
        assert!(matches!(ConfigOverride::parse("a b c"), Err(ConfigError::Malformed(_))));
        assert!(matches!(ConfigOverride::parse("a..b 1"), Err(ConfigError::Malformed(_))));
        let ov: ConfigOverride = "batch_conf.batch_size 8".parse().unwrap();
        assert_eq!(ov.path, vec!["batch_conf", "batch_size"]);
        assert_eq!(ov.value, "8");
    }

    #[test]
    fn string_and_enum_values() {
        let mut base = DatasetConf::default();
        base.feats_type = FeatsType::Mfcc;
        let conf = override_config(&base, ["feats_type fbank"]);
        assert_eq!(conf.feats_type, FeatsType::Fbank);

        let conf = override_config(&base, ["batch_conf.batch_type dynamic"]);
        assert_eq!(conf.batch_conf.batch_type, BatchType::Dynamic);
    }

    #[test]
    fn bool_accepts_only_true_spellings() {
        let mut base = DatasetConf::default();
        base.spec_aug = false;
        assert!(override_config(&base, ["spec_aug true"]).spec_aug);
        assert!(override_config(&base, ["spec_aug True"]).spec_aug);
        base.spec_aug = true;
        assert!(!override_config(&base, ["spec_aug yes"]).spec_aug);
        assert!(!override_config(&base, ["spec_aug TRUE"]).spec_aug);
    }

    #[test]
    fn numbers_keep_their_type() {
        let base = DatasetConf::default();
        let conf = override_config(&base, ["filter_conf.max_length 2000", "batch_conf.batch_size 32"]);
        assert_eq!(conf.filter_conf.max_length, 2000.0);
        assert_eq!(conf.batch_conf.batch_size, 32);

        let err = try_override_config(&base, ["batch_conf.batch_size 1.5"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn unknown_path_leaves_config_unchanged() {
        let base = DatasetConf::default();
        let conf = override_config(&base, ["nonexistent.key 1"]);
        assert_eq!(conf, base);

        let err = try_override_config(&base, ["batch_conf.nope 1"]).unwrap_err();
        match err {
            ConfigError::UnknownKey { path, key } => {
                assert_eq!(path, "batch_conf.nope");
                assert_eq!(key, "nope");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn signed_values() {
        let base = DatasetConf::default();
        let conf = override_config(&base, ["padding_conf.label_pad_value -1"]);
        assert_eq!(conf.padding_conf.label_pad_value, -1);
        // negative into an unsigned field fails at deserialization
        assert!(try_override_config(&base, ["batch_conf.batch_size -4"]).is_err());
    }

    #[test]
    fn bad_items_are_skipped_not_fatal() {
        let base = DatasetConf::default();
        let conf = override_config(
            &base,
            ["sort false", "feats_type wavelet", "too many tokens", "shuffle_conf.shuffle_size 50"],
        );
        assert!(!conf.sort);
        assert_eq!(conf.feats_type, FeatsType::Fbank);
        assert_eq!(conf.shuffle_conf.shuffle_size, 50);
    }

    #[test]
    fn arrays_take_json_literals() {
        let base = DatasetConf::default();
        let conf = override_config(&base, ["speed_perturb_conf.speeds [0.95,1.05]"]);
        assert_eq!(conf.speed_perturb_conf.speeds, vec![0.95, 1.05]);
    }

    #[test]
    fn sections_cannot_be_replaced_wholesale() {
        let base = DatasetConf::default();
        assert!(try_override_config(&base, ["batch_conf 3"]).is_err());
    }
}
