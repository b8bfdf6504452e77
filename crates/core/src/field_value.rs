use std::fmt;

use serde::{Deserialize, Serialize};

use crate::order::Unit;

/// A pending change's value as written by the caller and sent over the wire.
///
/// Untagged so `{"changeValue": 5}` and `{"changeValue": "5"}` both decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeValue {
    Integer(i64),
    Text(String),
}

impl ChangeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChangeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ChangeValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl fmt::Display for ChangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeValue::Integer(n) => write!(f, "{n}"),
            ChangeValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ChangeValue {
    fn from(n: i64) -> Self {
        ChangeValue::Integer(n)
    }
}

impl From<&str> for ChangeValue {
    fn from(s: &str) -> Self {
        ChangeValue::Text(s.to_string())
    }
}

impl From<String> for ChangeValue {
    fn from(s: String) -> Self {
        ChangeValue::Text(s)
    }
}

impl From<Unit> for ChangeValue {
    fn from(unit: Unit) -> Self {
        ChangeValue::Text(unit.as_str().to_string())
    }
}

/// A value already coerced to an order field's native type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Unit(Unit),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_unit(&self) -> Option<Unit> {
        match self {
            FieldValue::Unit(u) => Some(*u),
            _ => None,
        }
    }

    /// The wire representation of this value.
    pub fn to_change_value(&self) -> ChangeValue {
        match self {
            FieldValue::Text(s) => ChangeValue::Text(s.clone()),
            FieldValue::Integer(n) => ChangeValue::Integer(*n),
            FieldValue::Unit(u) => ChangeValue::from(*u),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(n) => write!(f, "{n}"),
            FieldValue::Unit(u) => f.write_str(u.as_str()),
        }
    }
}
