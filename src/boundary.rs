//! Cross-boundary value transfer
//!
//! The host and every plugin are separate binaries. Each one links its own copy
//! of the standard library and may install its own global allocator, so heap
//! storage created on one side must never be retained or freed on the other.
//!
//! [`materialize_locally`] rebuilds a value entirely with the *calling*
//! binary's allocator. Services call it on the far side of every crossing:
//! when they keep a value handed in by a plugin, and when they hand stored
//! data back out.

use std::collections::BTreeMap;

/// Dynamically typed value exchanged between the host and plugins
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
    Bytes(Vec<u8>),
    /// Ordered by key
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
}

/// Types that can be re-created with the current binary's allocator
pub trait Materialize {
    /// Deep copy `self` into freshly allocated local storage
    #[must_use]
    fn materialize(&self) -> Self;
}

/// Deep copy `value` so that no storage is shared with the binary it came from
///
/// Idempotent: materializing a materialized value yields an equal value backed
/// by yet another independent allocation.
#[must_use]
pub fn materialize_locally<T: Materialize>(value: &T) -> T {
    value.materialize()
}

impl Materialize for String {
    fn materialize(&self) -> Self {
        if self.is_empty() {
            return String::new();
        }
        let mut out = String::with_capacity(self.len());
        out.push_str(self);
        out
    }
}

impl Materialize for Vec<u8> {
    fn materialize(&self) -> Self {
        if self.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self);
        out
    }
}

impl Materialize for Vec<String> {
    fn materialize(&self) -> Self {
        let mut out = Vec::with_capacity(self.len());
        for s in self {
            out.push(s.materialize());
        }
        out
    }
}

impl Materialize for Vec<Value> {
    fn materialize(&self) -> Self {
        let mut out = Vec::with_capacity(self.len());
        for v in self {
            out.push(v.materialize());
        }
        out
    }
}

impl Materialize for BTreeMap<String, Value> {
    fn materialize(&self) -> Self {
        let mut out = BTreeMap::new();
        for (key, value) in self {
            out.insert(key.materialize(), value.materialize());
        }
        out
    }
}

impl<T: Materialize> Materialize for Option<T> {
    fn materialize(&self) -> Self {
        self.as_ref().map(Materialize::materialize)
    }
}

impl Materialize for Value {
    fn materialize(&self) -> Self {
        // No wildcard arm: a new variant must be classified here before it
        // can cross a binary boundary.
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Float(*f),
            Value::String(s) => Value::String(s.materialize()),
            Value::StringList(list) => Value::StringList(list.materialize()),
            Value::Bytes(bytes) => Value::Bytes(bytes.materialize()),
            Value::Map(map) => Value::Map(map.materialize()),
            Value::List(list) => Value::List(list.materialize()),
        }
    }
}

impl Value {
    /// Returns true for kinds with no indirect storage
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
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

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<String>> for Value {
    fn from(list: Vec<String>) -> Self {
        Value::StringList(list)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::StringList(list) => serde_json::Value::from(list.clone()),
            Value::Bytes(bytes) => serde_json::Value::from(bytes.clone()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
        }
    }
}
