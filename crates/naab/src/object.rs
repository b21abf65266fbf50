//! Host-facing plain value tree.
//!
//! [`Object`] is the detached counterpart of the heap-resident runtime value:
//! run results, thrown payloads carried inside errors, and FFI marshalling all
//! use it. Unlike the runtime value it owns its children directly, so it can
//! cross the interpreter boundary without a heap in hand.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A plain NAAb value, detached from the interpreter heap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Object>),
    Dict(IndexMap<String, Object>),
    /// A struct instance: definition name plus fields in declaration order.
    Struct {
        name: String,
        fields: IndexMap<String, Object>,
    },
    /// An enum value: definition name plus variant name.
    Enum { name: String, variant: String },
}

impl Object {
    /// The runtime type tag spelling used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Struct { .. } => "struct",
            Self::Enum { .. } => "enum",
        }
    }

    /// Converts to a JSON value. Structs serialize as mappings keyed by field
    /// name; enums as `"Name.Variant"` strings. Lossless for primitives and
    /// containers, which is what the serialization round-trip law covers.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Dict(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Struct { fields, .. } => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Enum { name, variant } => serde_json::Value::String(format!("{name}.{variant}")),
        }
    }

    /// Builds an `Object` from parsed JSON. Objects become dicts; there is no
    /// way to recover struct identity from JSON.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(entries) => Self::Dict(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Total recursive size estimate in bytes, used by FFI payload caps.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        match self {
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) => 8,
            Self::Str(s) => s.len(),
            Self::List(items) => 8 + items.iter().map(Self::estimate_size).sum::<usize>(),
            Self::Dict(entries) => {
                8 + entries
                    .iter()
                    .map(|(k, v)| k.len() + v.estimate_size())
                    .sum::<usize>()
            }
            Self::Struct { name, fields } => {
                name.len()
                    + fields
                        .iter()
                        .map(|(k, v)| k.len() + v.estimate_size())
                        .sum::<usize>()
            }
            Self::Enum { name, variant } => name.len() + variant.len(),
        }
    }
}

impl fmt::Display for Object {
    /// Human-readable rendering, matching what `print` emits for the
    /// corresponding runtime value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(ryu::Buffer::new().format(*v)),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Struct { name, fields } => {
                write!(f, "{name} {{ ")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str(" }")
            }
            Self::Enum { name, variant } => write!(f, "{name}.{variant}"),
        }
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Error produced by the `TryFrom` accessors when the variant doesn't match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongType {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl fmt::Display for WrongType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.actual)
    }
}

impl std::error::Error for WrongType {}

impl TryFrom<&Object> for i64 {
    type Error = WrongType;

    fn try_from(obj: &Object) -> Result<Self, WrongType> {
        match obj {
            Object::Int(i) => Ok(*i),
            other => Err(WrongType {
                expected: "int",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<&Object> for f64 {
    type Error = WrongType;

    fn try_from(obj: &Object) -> Result<Self, WrongType> {
        match obj {
            Object::Float(v) => Ok(*v),
            Object::Int(i) => Ok(*i as f64),
            other => Err(WrongType {
                expected: "float",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<&Object> for String {
    type Error = WrongType;

    fn try_from(obj: &Object) -> Result<Self, WrongType> {
        match obj {
            Object::Str(s) => Ok(s.clone()),
            other => Err(WrongType {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<&Object> for bool {
    type Error = WrongType;

    fn try_from(obj: &Object) -> Result<Self, WrongType> {
        match obj {
            Object::Bool(b) => Ok(*b),
            other => Err(WrongType {
                expected: "bool",
                actual: other.type_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_containers() {
        let mut dict = IndexMap::new();
        dict.insert("b".to_owned(), Object::Int(2));
        dict.insert("a".to_owned(), Object::List(vec![Object::Bool(true), Object::Null]));
        let value = Object::Dict(dict);

        let json = value.to_json();
        let back = Object::from_json(&json);
        assert_eq!(back, value);
    }

    #[test]
    fn display_matches_print_format() {
        let value = Object::List(vec![Object::Int(1), Object::Str("x".into())]);
        assert_eq!(value.to_string(), "[1, x]");
    }
}
