//! Tagged scalar values for identity metadata.
//!
//! Identity metadata is an open map with scalar leaves. Values keep their
//! type tag; filter evaluation never coerces across tags (`Int(5)` does not
//! equal `Str("5")`).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata attached to an identity: field name to tagged scalar.
pub type Metadata = BTreeMap<String, Value>;

/// A tagged scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Str(String),
}

impl Value {
    /// Name of the type tag, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    /// String contents if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Strict same-tag ordering. Returns `None` across tags.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Strict same-tag equality. Differing tags are never equal.
    pub fn strict_eq(&self, other: &Value) -> bool {
        matches!(self.compare(other), Some(Ordering::Equal))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cross_tag_equality() {
        assert!(!Value::Int(5).strict_eq(&Value::Str("5".into())));
        assert!(!Value::Int(1).strict_eq(&Value::Bool(true)));
        assert!(!Value::Int(1).strict_eq(&Value::Float(1.0)));
        assert!(Value::Int(5).strict_eq(&Value::Int(5)));
    }

    #[test]
    fn test_same_tag_ordering() {
        assert_eq!(
            Value::Int(3).compare(&Value::Int(7)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Str("abc".into()).compare(&Value::Str("abd".into())),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(3).compare(&Value::Float(7.0)), None);
    }

    #[test]
    fn test_untagged_json_round_trip() {
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Int(42));
        let v: Value = serde_json::from_str("\"online\"").unwrap();
        assert_eq!(v, Value::Str("online".into()));
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
        let v: Value = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, Value::Float(2.5));
    }
}
