//! Value types for FlexDB
//!
//! This module defines:
//! - Value: closed variant type for every record field
//!
//! ## Value Model
//!
//! Records are untyped maps; strong typing is layered on top by blueprints.
//! The variants are fixed:
//! - Null, Bool, Int, Float, String, Array, Object
//!
//! `Int(1) != Float(1.0)`: different variants are never equal.
//! Objects use `BTreeMap` so that serialized records and index fingerprints
//! are deterministic.
//!
//! Serialization is untagged: a record persists as plain JSON/TOML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Map type used for objects and records
pub type Map = BTreeMap<String, Value>;

/// Field value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Object with string keys
    Object(Map),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

// IEEE-754 semantics for floats: NaN != NaN, -0.0 == 0.0
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this is an object value
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 for Int and Float values
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[Value] if this is an Array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as &Map if this is an Object value
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get as &mut Map if this is an Object value
    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Look up a nested value by dot path (`"a.b.c"`)
    ///
    /// Only objects are traversed; a path through a scalar yields `None`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Scalar rendering used for comparisons and lookups
    ///
    /// Returns `None` for arrays and objects.
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Look up a nested value by dot path in a map
pub fn get_path<'a>(map: &'a Map, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(head)?;
    match rest {
        Some(rest) => value.get_path(rest),
        None => Some(value),
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

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
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Object(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Value {
        let mut inner = Map::new();
        inner.insert("login".to_string(), Value::Bool(true));
        let mut admin = Map::new();
        admin.insert("admin".to_string(), Value::Object(inner));
        Value::Object(admin)
    }

    #[test]
    fn test_different_variants_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("1".into()), Value::Int(1));
        assert_ne!(Value::Null, Value::Bool(false));
    }

    #[test]
    fn test_float_ieee_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_get_path() {
        let v = nested();
        assert_eq!(v.get_path("admin.login"), Some(&Value::Bool(true)));
        assert_eq!(v.get_path("admin.missing"), None);
        assert_eq!(v.get_path("admin.login.deeper"), None);
    }

    #[test]
    fn test_map_get_path() {
        let map = nested().as_object().cloned().unwrap();
        assert!(get_path(&map, "admin").unwrap().is_object());
        assert_eq!(get_path(&map, "admin.login"), Some(&Value::Bool(true)));
        assert_eq!(get_path(&map, "nope"), None);
    }

    #[test]
    fn test_untagged_json_shape() {
        let json = serde_json::to_string(&nested()).unwrap();
        assert_eq!(json, r#"{"admin":{"login":true}}"#);

        let parsed: Value = serde_json::from_str(r#"{"n":1,"f":1.5,"s":"x","z":null,"a":[1]}"#).unwrap();
        let obj = parsed.as_object().unwrap();
        assert_eq!(obj["n"], Value::Int(1));
        assert_eq!(obj["f"], Value::Float(1.5));
        assert_eq!(obj["s"], Value::from("x"));
        assert!(obj["z"].is_null());
        assert_eq!(obj["a"], Value::Array(vec![Value::Int(1)]));
    }

    #[test]
    fn test_scalar_string() {
        assert_eq!(Value::Int(7).to_scalar_string().as_deref(), Some("7"));
        assert_eq!(Value::Bool(true).to_scalar_string().as_deref(), Some("true"));
        assert_eq!(Value::Array(vec![]).to_scalar_string(), None);
    }

    #[test]
    fn test_from_option() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some("a")), Value::from("a"));
    }
}
