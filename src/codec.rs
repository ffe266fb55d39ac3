//! Decoding of evaluation payloads into typed configs.
//!
//! Two payload shapes are accepted:
//!
//! - flat map: `{key: scalar | {tag: value}}`
//! - evaluation payload: `{evaluations: {key: {value: {tag: value},
//!   configEvaluationMetadata}}, apikeyMetadata}`
//!
//! `digest` never fails. Entries that cannot be decoded keep their raw JSON
//! and a warning is logged.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Key of the envelope that marks an evaluation payload.
pub const EVALUATIONS_KEY: &str = "evaluations";

/// Wire type tag of a config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Bool,
    Int,
    Double,
    String,
    StringList,
    Json,
    Duration,
    Unknown,
}

impl ValueType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "bool" => Some(ValueType::Bool),
            "int" => Some(ValueType::Int),
            "double" => Some(ValueType::Double),
            "string" => Some(ValueType::String),
            "stringList" => Some(ValueType::StringList),
            "json" => Some(ValueType::Json),
            "duration" => Some(ValueType::Duration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::StringList => "stringList",
            ValueType::Json => "json",
            ValueType::Duration => "duration",
            ValueType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationValue {
    pub seconds: f64,
    pub ms: i64,
}

impl DurationValue {
    pub fn from_millis(ms: i64) -> Self {
        Self {
            seconds: ms as f64 / 1000.0,
            ms,
        }
    }

    pub fn as_std(&self) -> Option<std::time::Duration> {
        u64::try_from(self.ms)
            .ok()
            .map(std::time::Duration::from_millis)
    }
}

/// Decoded config value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    StringList(Vec<String>),
    Duration(DurationValue),
    /// Parsed `json` values, and anything that could not be decoded.
    Json(Value),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<DurationValue> {
        match self {
            ConfigValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    /// Plain JSON form, as handed to `extract()` consumers.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Which rule produced an evaluation. Only present for evaluation payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationMetadata {
    pub config_row_index: Option<i64>,
    pub conditional_value_index: Option<i64>,
    pub weighted_value_index: Option<i64>,
    /// CONFIG, FEATURE_FLAG, LOG_LEVEL ...
    pub config_type: Option<String>,
    pub id: Option<String>,
    pub value_type: Option<String>,
}

impl EvaluationMetadata {
    fn from_json(value: &Value) -> Self {
        Self {
            config_row_index: parse_index(value.get("configRowIndex")),
            conditional_value_index: parse_index(value.get("conditionalValueIndex")),
            weighted_value_index: parse_index(value.get("weightedValueIndex")),
            config_type: value.get("type").and_then(as_plain_string),
            id: value.get("id").and_then(as_plain_string),
            value_type: value.get("valueType").and_then(as_plain_string),
        }
    }
}

/// Base-10 index sent either as a number or a numeric string.
fn parse_index(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_plain_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One decoded key.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub key: String,
    pub value: ConfigValue,
    pub value_type: ValueType,
    /// Still-tagged `{tag: value}` from the wire, kept for telemetry.
    pub raw: Option<Value>,
    pub metadata: Option<EvaluationMetadata>,
}

impl Config {
    pub fn new(key: impl Into<String>, value: ConfigValue, value_type: ValueType) -> Self {
        Self {
            key: key.into(),
            value,
            value_type,
            raw: None,
            metadata: None,
        }
    }

    /// `{tag: value}` that `digest` decodes back to the same value and type.
    ///
    /// The wire form is reused when the tag is known; otherwise the tag is
    /// rebuilt from the decoded value. Values of unknown type come back as
    /// `json`.
    pub fn to_tagged(&self) -> Value {
        if let Some(raw) = &self.raw {
            if self.value_type != ValueType::Unknown {
                return raw.clone();
            }
        }

        let (tag, inner) = match &self.value {
            ConfigValue::Bool(b) => (ValueType::Bool, Value::Bool(*b)),
            ConfigValue::Int(i) => (ValueType::Int, Value::from(*i)),
            ConfigValue::Double(d) => (ValueType::Double, Value::from(*d)),
            ConfigValue::String(s) => (ValueType::String, Value::String(s.clone())),
            ConfigValue::StringList(list) => (ValueType::StringList, Value::from(list.clone())),
            ConfigValue::Duration(d) => {
                let mut duration = Map::new();
                duration.insert("millis".to_string(), Value::from(d.ms));
                (ValueType::Duration, Value::Object(duration))
            }
            // Embedded as text so `{"int": 5}` stays a json object.
            ConfigValue::Json(v) => (ValueType::Json, Value::String(v.to_string())),
        };

        let mut tagged = Map::new();
        tagged.insert(tag.as_str().to_string(), inner);
        Value::Object(tagged)
    }
}

/// Decoded configs by key. Replaced wholesale on every load.
pub type ConfigSet = HashMap<String, Config>;

/// Decode either payload shape.
pub fn digest(payload: &Value) -> ConfigSet {
    match payload.as_object() {
        Some(map) if map.contains_key(EVALUATIONS_KEY) => digest_evaluations(payload),
        Some(map) => digest_flat(map),
        None => {
            if !payload.is_null() {
                warn!("Ignoring config payload that is not an object");
            }
            ConfigSet::new()
        }
    }
}

/// Decode `{evaluations: {...}}`.
pub fn digest_evaluations(payload: &Value) -> ConfigSet {
    let Some(evaluations) = payload.get(EVALUATIONS_KEY).and_then(Value::as_object) else {
        warn!("Evaluation payload has no evaluations object");
        return ConfigSet::new();
    };

    evaluations
        .iter()
        .map(|(key, evaluation)| {
            let metadata = evaluation
                .get("configEvaluationMetadata")
                .map(EvaluationMetadata::from_json);

            let mut config = match evaluation.get("value").and_then(single_tag) {
                Some((tag, inner)) => decode_tagged(key, tag, inner),
                None => {
                    warn!("Evaluation for {} has no tagged value", key);
                    let raw = evaluation.get("value").cloned().unwrap_or(Value::Null);
                    Config::new(key.clone(), ConfigValue::Json(raw), ValueType::Unknown)
                }
            };
            config.metadata = metadata;
            (key.clone(), config)
        })
        .collect()
}

fn digest_flat(map: &Map<String, Value>) -> ConfigSet {
    map.iter()
        .map(|(key, value)| {
            let config = match single_tag(value) {
                Some((tag, inner)) if ValueType::from_tag(tag).is_some() => {
                    decode_tagged(key, tag, inner)
                }
                _ => decode_untyped(key, value),
            };
            (key.clone(), config)
        })
        .collect()
}

/// `{tag: value}` with exactly one entry.
fn single_tag(value: &Value) -> Option<(&str, &Value)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn decode_tagged(key: &str, tag: &str, inner: &Value) -> Config {
    let raw = {
        let mut tagged = Map::new();
        tagged.insert(tag.to_string(), inner.clone());
        Value::Object(tagged)
    };

    let (value, value_type) = match ValueType::from_tag(tag) {
        Some(value_type) => match decode_value(key, value_type, inner) {
            Some(value) => (value, value_type),
            None => {
                warn!("Could not decode {} value for {}: {}", tag, key, inner);
                (ConfigValue::Json(inner.clone()), value_type)
            }
        },
        None => {
            warn!("Unknown value type {} for {}", tag, key);
            (ConfigValue::Json(inner.clone()), ValueType::Unknown)
        }
    };

    Config {
        key: key.to_string(),
        value,
        value_type,
        raw: Some(raw),
        metadata: None,
    }
}

fn decode_value(key: &str, value_type: ValueType, inner: &Value) -> Option<ConfigValue> {
    match value_type {
        ValueType::Bool => inner.as_bool().map(ConfigValue::Bool),
        ValueType::Int => as_i64(inner).map(ConfigValue::Int),
        ValueType::Double => match inner {
            Value::String(s) => s.parse().ok().map(ConfigValue::Double),
            other => other.as_f64().map(ConfigValue::Double),
        },
        ValueType::String => inner.as_str().map(|s| ConfigValue::String(s.to_string())),
        ValueType::StringList => {
            let list = inner.get("values").unwrap_or(inner);
            as_string_list(list).map(ConfigValue::StringList)
        }
        ValueType::Duration => inner
            .get("millis")
            .and_then(as_i64)
            .map(|ms| ConfigValue::Duration(DurationValue::from_millis(ms))),
        ValueType::Json => Some(decode_json(key, inner)),
        ValueType::Unknown => None,
    }
}

/// Parse an embedded JSON string. On failure the raw string is kept.
fn decode_json(key: &str, inner: &Value) -> ConfigValue {
    match inner {
        Value::String(text) => match serde_json::from_str(text) {
            Ok(parsed) => ConfigValue::Json(parsed),
            Err(e) => {
                warn!("Failed to parse json value for {}: {}", key, e);
                ConfigValue::Json(inner.clone())
            }
        },
        other => ConfigValue::Json(other.clone()),
    }
}

fn decode_untyped(key: &str, value: &Value) -> Config {
    let (value, value_type) = match value {
        Value::Bool(b) => (ConfigValue::Bool(*b), ValueType::Bool),
        Value::Number(n) => match n.as_i64() {
            Some(i) => (ConfigValue::Int(i), ValueType::Int),
            None => (
                ConfigValue::Double(n.as_f64().unwrap_or_default()),
                ValueType::Double,
            ),
        },
        Value::String(s) => (ConfigValue::String(s.clone()), ValueType::String),
        Value::Array(_) => match as_string_list(value) {
            Some(list) => (ConfigValue::StringList(list), ValueType::StringList),
            None => (ConfigValue::Json(value.clone()), ValueType::Json),
        },
        other => (ConfigValue::Json(other.clone()), ValueType::Json),
    };

    Config::new(key, value, value_type)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}
