//! Tagged value tree used to carry request data and configuration documents.
//!
//! [`Value`] owns its contents and is what producers build. [`ValueView`] is a
//! `Copy` handle borrowed from a live `Value`, handed to detectors during
//! evaluation so the request data is never cloned on the hot path.
//!
//! Maps keep insertion order and tolerate duplicate keys. Lookups and JSON
//! export both resolve a duplicated key to its last entry.

use std::fmt;

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::error::{AppsecError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn map() -> Self {
        Value::Map(Vec::new())
    }

    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Append a key/value pair. Fails with `InvalidObject` unless `self` is a map.
    pub fn add(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        match self {
            Value::Map(entries) => {
                entries.push((key.into(), value));
                Ok(())
            }
            other => Err(AppsecError::invalid_object(format!(
                "cannot add a key to a {}",
                other.kind()
            ))),
        }
    }

    /// Builder form of [`Value::add`]; a no-op on anything but a map.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Map(entries) = &mut self {
            entries.push((key.into(), value.into()));
        }
        self
    }

    /// Append to an array. Fails with `InvalidObject` unless `self` is an array.
    pub fn push(&mut self, value: Value) -> Result<()> {
        match self {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            other => Err(AppsecError::invalid_object(format!(
                "cannot push onto a {}",
                other.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Number of children for containers, zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Value::Array(items) => items.len(),
            Value::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last entry named `key`, matching what `to_json` keeps.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Map entries in insertion order; empty for non-maps.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        let entries: &[(String, Value)] = match self {
            Value::Map(entries) => entries,
            _ => &[],
        };
        entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries().map(|(k, _)| k)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn view(&self) -> ValueView<'_> {
        ValueView::new(self)
    }

    /// Parse a JSON document. Malformed input fails with `InvalidObject`.
    pub fn from_json_str(s: &str) -> Result<Value> {
        let json: Json = serde_json::from_str(s)
            .map_err(|e| AppsecError::invalid_object(format!("malformed JSON: {e}")))?;
        Ok(Value::from(&json))
    }

    /// Convert to a `serde_json` tree. Non-finite floats become `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Uint(u) => Json::from(*u),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => {
                let mut map = JsonMap::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                Json::Object(map)
            }
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

impl From<&Json> for Value {
    fn from(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from(&json)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Uint(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

// ── Borrowed view ────────────────────────────────────────────────

/// Non-owning handle over a [`Value`]. Cannot outlive the value it borrows.
#[derive(Debug, Clone, Copy)]
pub struct ValueView<'a> {
    inner: &'a Value,
}

impl<'a> ValueView<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { inner: value }
    }

    pub fn value(&self) -> &'a Value {
        self.inner
    }

    pub fn is_map(&self) -> bool {
        self.inner.is_map()
    }

    pub fn get(&self, key: &str) -> Option<ValueView<'a>> {
        self.inner.get(key).map(ValueView::new)
    }

    pub fn at(&self, index: usize) -> Option<ValueView<'a>> {
        self.inner.at(index).map(ValueView::new)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'a str, ValueView<'a>)> {
        self.inner.entries().map(|(k, v)| (k, ValueView::new(v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> {
        self.inner.keys()
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.inner.as_str()
    }
}

impl<'a> From<&'a Value> for ValueView<'a> {
    fn from(value: &'a Value) -> Self {
        ValueView::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_insertion_order_and_duplicates() {
        let mut v = Value::map();
        v.add("b", Value::from(1u64)).unwrap();
        v.add("a", Value::from("x")).unwrap();
        v.add("b", Value::from(2u64)).unwrap();

        let keys: Vec<&str> = v.keys().collect();
        assert_eq!(keys, vec!["b", "a", "b"]);
        assert_eq!(v.len(), 3);
        assert_eq!(v.get("b").and_then(Value::as_u64), Some(2));
    }

    #[test]
    fn duplicate_keys_resolve_the_same_way_in_lookups_and_json() {
        let v = Value::map()
            .with("a", "first")
            .with("b", Value::Null)
            .with("a", "second");
        assert_eq!(v.get("a").and_then(Value::as_str), Some("second"));
        assert_eq!(v.view().get("a").and_then(|a| a.as_str()), Some("second"));
        assert_eq!(v.to_json()["a"], Json::from("second"));
        assert_eq!(v.to_json().as_object().map(|o| o.len()), Some(2));
    }

    #[test]
    fn add_on_non_map_is_invalid_object() {
        let mut v = Value::array();
        let err = v.add("k", Value::Null).unwrap_err();
        assert!(matches!(err, AppsecError::InvalidObject(_)));

        let mut s = Value::string("x");
        assert!(s.push(Value::Null).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Value::from_json_str(r#"{"a": [1, 2"#).unwrap_err();
        assert!(matches!(err, AppsecError::InvalidObject(_)));
    }

    #[test]
    fn json_conversion_preserves_structure() {
        let src = r#"{"rules":[{"id":"1","tags":{"type":"flow"}}],"n":-3,"u":7,"f":1.5,"ok":true,"nil":null}"#;
        let value = Value::from_json_str(src).unwrap();

        assert_eq!(value.get("n"), Some(&Value::Int(-3)));
        assert_eq!(value.get("u"), Some(&Value::Uint(7)));
        assert_eq!(value.get("f").and_then(Value::as_f64), Some(1.5));

        let reparsed: Json = serde_json::from_str(&value.to_json_string()).unwrap();
        let original: Json = serde_json::from_str(src).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn non_finite_float_exports_as_null() {
        assert_eq!(Value::Float(f64::NAN).to_json(), Json::Null);
    }

    #[test]
    fn view_navigates_nested_values() {
        let value = Value::map()
            .with("server.request.query", Value::map().with("q", "needle"))
            .with("list", Value::from(vec![Value::from("a"), Value::from("b")]));
        let view = value.view();

        assert!(view.is_map());
        let query = view.get("server.request.query").unwrap();
        assert_eq!(query.get("q").and_then(|v| v.as_str()), Some("needle"));
        assert_eq!(view.get("list").and_then(|l| l.at(1)).and_then(|v| v.as_str()), Some("b"));
        assert!(view.get("missing").is_none());
    }
}
