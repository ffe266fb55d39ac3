//! Request context sent with every evaluation request.
//!
//! A `Context` maps a context type ("user", "team", "device") to a bag of
//! scalar attributes. Attribute order is kept exactly as supplied, so
//! `encode()` is stable for one instance but two equal contexts built in a
//! different order may encode differently. Compare contexts with `equals`
//! (or `==`), never by comparing encoded strings.

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

const NOT_AN_OBJECT_MSG: &str =
    "Context must be an object where the value of each key is also an object";
const NESTED_VALUE_MSG: &str = "Nested objects are not supported in context values at this time";

/// A single context attribute.
#[derive(Debug, Clone)]
pub enum ContextValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl ContextValue {
    /// Wire type tag used when encoding this value.
    ///
    /// Integer-valued doubles are tagged `int`.
    pub fn wire_type(&self) -> &'static str {
        match self {
            ContextValue::String(_) => "string",
            ContextValue::Int(_) => "int",
            ContextValue::Double(d) if is_integral(*d) => "int",
            ContextValue::Double(_) => "double",
            ContextValue::Bool(_) => "bool",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ContextValue::String(s) => Value::String(s.clone()),
            ContextValue::Int(i) => Value::from(*i),
            ContextValue::Double(d) if is_integral(*d) => Value::from(*d as i64),
            ContextValue::Double(d) => Value::from(*d),
            ContextValue::Bool(b) => Value::Bool(*b),
        }
    }

    /// `{tag: value}` as sent on the wire.
    fn to_tagged_json(&self) -> Value {
        let mut tagged = Map::new();
        tagged.insert(self.wire_type().to_string(), self.to_json());
        Value::Object(tagged)
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ContextValue::String(s.clone())),
            Value::Bool(b) => Some(ContextValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ContextValue::Int(i)),
                None => n.as_f64().map(ContextValue::Double),
            },
            _ => None,
        }
    }
}

fn is_integral(d: f64) -> bool {
    d.is_finite() && d.fract() == 0.0 && d.abs() < i64::MAX as f64
}

/// Strict scalar equality. Numbers compare by value, so `Int(1) == Double(1.0)`.
impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ContextValue::String(a), ContextValue::String(b)) => a == b,
            (ContextValue::Bool(a), ContextValue::Bool(b)) => a == b,
            (ContextValue::Int(a), ContextValue::Int(b)) => a == b,
            (ContextValue::Double(a), ContextValue::Double(b)) => a == b,
            (ContextValue::Int(a), ContextValue::Double(b))
            | (ContextValue::Double(b), ContextValue::Int(a)) => (*a as f64) == *b,
            _ => false,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::String(s) => write!(f, "{}", s),
            ContextValue::Int(i) => write!(f, "{}", i),
            ContextValue::Double(d) => write!(f, "{}", d),
            ContextValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Int(value)
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        ContextValue::Int(i64::from(value))
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Double(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

/// One named attribute bag, e.g. the "user" context.
#[derive(Debug, Clone, Default)]
struct NamedContext {
    name: String,
    values: Vec<(String, ContextValue)>,
}

impl NamedContext {
    fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Validated request context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    contexts: Vec<NamedContext>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object of objects.
    ///
    /// Invalid shapes are logged and skipped; construction never fails.
    pub fn from_json(value: &Value) -> Self {
        let mut context = Context::new();

        let Some(types) = value.as_object() else {
            error!("{}", NOT_AN_OBJECT_MSG);
            return context;
        };

        for (name, attributes) in types {
            let Some(attributes) = attributes.as_object() else {
                error!("{}", NOT_AN_OBJECT_MSG);
                continue;
            };

            let mut named = NamedContext {
                name: name.clone(),
                values: Vec::with_capacity(attributes.len()),
            };
            for (key, raw) in attributes {
                match ContextValue::from_json(raw) {
                    Some(v) => named.values.push((key.clone(), v)),
                    None => error!("{}", NESTED_VALUE_MSG),
                }
            }
            context.contexts.push(named);
        }

        context
    }

    /// Set one attribute, replacing an existing value in place.
    pub fn with_value(
        mut self,
        context_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> Self {
        self.set(context_type, key, value);
        self
    }

    /// Set one attribute, replacing an existing value in place.
    pub fn set(
        &mut self,
        context_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
    ) {
        let context_type = context_type.into();
        let key = key.into();
        let value = value.into();

        let idx = match self.contexts.iter().position(|c| c.name == context_type) {
            Some(idx) => idx,
            None => {
                self.contexts.push(NamedContext {
                    name: context_type,
                    values: Vec::new(),
                });
                self.contexts.len() - 1
            }
        };

        let named = &mut self.contexts[idx];
        match named.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => named.values.push((key, value)),
        }
    }

    /// Look up one attribute.
    pub fn get(&self, context_type: &str, key: &str) -> Option<&ContextValue> {
        self.named(context_type).and_then(|c| c.get(key))
    }

    /// Context type names in insertion order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.contexts.iter().map(|c| c.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn named(&self, context_type: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == context_type)
    }

    /// Order-independent structural equality.
    pub fn equals(&self, other: &Context) -> bool {
        if self.contexts.len() != other.contexts.len() {
            return false;
        }

        self.contexts.iter().all(|mine| {
            let Some(theirs) = other.named(&mine.name) else {
                return false;
            };
            mine.values.len() == theirs.values.len()
                && mine
                    .values
                    .iter()
                    .all(|(k, v)| theirs.get(k).is_some_and(|tv| tv == v))
        })
    }

    /// `{"contexts": [{"type": .., "values": {name: {tag: value}}}]}`
    pub fn to_wire_json(&self) -> Value {
        let formatted: Vec<Value> = self
            .contexts
            .iter()
            .map(|named| {
                let values: Map<String, Value> = named
                    .values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_tagged_json()))
                    .collect();

                let mut entry = Map::new();
                entry.insert("type".to_string(), Value::String(named.name.clone()));
                entry.insert("values".to_string(), Value::Object(values));
                Value::Object(entry)
            })
            .collect();

        let mut root = Map::new();
        root.insert("contexts".to_string(), Value::Array(formatted));
        Value::Object(root)
    }

    /// Percent-encoded standard base64 of the wire JSON.
    pub fn encode(&self) -> String {
        let json = self.to_wire_json().to_string();
        urlencoding::encode(&STANDARD.encode(json)).into_owned()
    }

    /// URL-safe base64 of the wire JSON, used as a request path segment.
    pub fn encode_url_safe(&self) -> String {
        URL_SAFE.encode(self.to_wire_json().to_string())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.contexts.len()))?;
        for named in &self.contexts {
            let values: Map<String, Value> = named
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            map.serialize_entry(&named.name, &values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Context::from_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fred() -> Context {
        Context::from_json(&json!({
            "user": { "firstName": "Fred", "lastName": "Jones", "id": 10001 },
            "team": { "name": "Sales", "isCostCenter": false },
        }))
    }

    #[test]
    fn test_from_json_keeps_attributes() {
        let context = fred();
        assert_eq!(context.types().collect::<Vec<_>>(), vec!["user", "team"]);
        assert_eq!(
            context.get("user", "firstName"),
            Some(&ContextValue::String("Fred".to_string()))
        );
        assert_eq!(context.get("user", "id"), Some(&ContextValue::Int(10001)));
        assert_eq!(
            context.get("team", "isCostCenter"),
            Some(&ContextValue::Bool(false))
        );
    }

    #[test]
    fn test_invalid_shapes_are_skipped_not_fatal() {
        let context = Context::from_json(&json!({ "device": "desktop" }));
        assert!(context.is_empty());

        let context = Context::from_json(&json!({
            "user": { "device": "desktop", "nested": { "name": "jeff" } }
        }));
        assert_eq!(
            context.get("user", "device"),
            Some(&ContextValue::String("desktop".to_string()))
        );
        assert_eq!(context.get("user", "nested"), None);
    }

    #[test]
    fn test_encode_is_percent_encoded_base64_json() {
        let encoded = fred().encode();
        let unescaped = urlencoding::decode(&encoded).unwrap();

        assert_eq!(
            unescaped,
            "eyJjb250ZXh0cyI6W3sidHlwZSI6InVzZXIiLCJ2YWx1ZXMiOnsiZmlyc3ROYW1lIjp7InN0cmluZyI6IkZyZWQifSwibGFzdE5hbWUiOnsic3RyaW5nIjoiSm9uZXMifSwiaWQiOnsiaW50IjoxMDAwMX19fSx7InR5cGUiOiJ0ZWFtIiwidmFsdWVzIjp7Im5hbWUiOnsic3RyaW5nIjoiU2FsZXMifSwiaXNDb3N0Q2VudGVyIjp7ImJvb2wiOmZhbHNlfX19XX0="
        );

        let decoded: Value = serde_json::from_slice(&STANDARD.decode(&*unescaped).unwrap()).unwrap();
        assert_eq!(
            decoded,
            json!({
                "contexts": [
                    {
                        "type": "user",
                        "values": {
                            "firstName": { "string": "Fred" },
                            "lastName": { "string": "Jones" },
                            "id": { "int": 10001 }
                        }
                    },
                    {
                        "type": "team",
                        "values": {
                            "name": { "string": "Sales" },
                            "isCostCenter": { "bool": false }
                        }
                    }
                ]
            })
        );
    }

    #[test]
    fn test_url_safe_encoding_decodes_to_same_json() {
        let context = Context::new()
            .with_value("user", "key", "a?b>c~~~")
            .with_value("user", "score", 2.5);
        let decoded: Value =
            serde_json::from_slice(&URL_SAFE.decode(context.encode_url_safe()).unwrap()).unwrap();
        assert_eq!(decoded, context.to_wire_json());
        assert_eq!(decoded["contexts"][0]["values"]["score"], json!({ "double": 2.5 }));
    }

    #[test]
    fn test_wire_type_tags() {
        assert_eq!(ContextValue::from("x").wire_type(), "string");
        assert_eq!(ContextValue::from(3).wire_type(), "int");
        assert_eq!(ContextValue::from(3.0).wire_type(), "int");
        assert_eq!(ContextValue::from(3.5).wire_type(), "double");
        assert_eq!(ContextValue::from(true).wire_type(), "bool");
    }

    #[test]
    fn test_equals_ignores_order() {
        let reordered = Context::from_json(&json!({
            "team": { "isCostCenter": false, "name": "Sales" },
            "user": { "id": 10001, "firstName": "Fred", "lastName": "Jones" },
        }));
        assert!(fred().equals(&reordered));
        assert!(reordered.equals(&fred()));
        assert!(fred().equals(&fred()));

        // Same semantics, different bytes on the wire.
        assert_ne!(fred().encode(), reordered.encode());
    }

    #[test]
    fn test_equals_detects_differences() {
        let changed = Context::from_json(&json!({
            "user": { "firstName": "Fred", "lastName": "Jones", "id": 10001 },
            "team": { "name": "Sales", "isCostCenter": true },
        }));
        assert!(!fred().equals(&changed));

        let missing_type = Context::from_json(&json!({
            "user": { "firstName": "Fred", "lastName": "Jones", "id": 10001 },
        }));
        assert!(!fred().equals(&missing_type));

        let extra_attr = Context::from_json(&json!({
            "user": { "firstName": "Fred", "lastName": "Jones", "id": 10001 },
            "team": { "name": "Sales", "isCostCenter": false, "extra": "extra" },
        }));
        assert!(!fred().equals(&extra_attr));
        assert!(!extra_attr.equals(&fred()));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut context = Context::new().with_value("user", "id", 1);
        context.set("user", "id", 2);
        assert_eq!(context.get("user", "id"), Some(&ContextValue::Int(2)));
        assert_eq!(context.to_wire_json()["contexts"][0]["values"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_serde_round_trip_keeps_equality() {
        let serialized = serde_json::to_value(fred()).unwrap();
        assert_eq!(serialized["user"]["id"], json!(10001));
        let back: Context = serde_json::from_value(serialized).unwrap();
        assert_eq!(back, fred());
    }
}
