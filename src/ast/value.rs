//! Typed attribute and context values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use strum_macros::{AsRefStr, Display as StrumDisplay};

use super::{EntityUid, escape_str};
use crate::error::PolicyError;

/// The runtime kind of a [`Value`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Long,
    String,
    Entity,
    Set,
    Record,
}

/// A fully evaluated value. Sets and records are ordered so that equality,
/// hashing and rendering are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    Long(i64),
    String(String),
    Entity(EntityUid),
    Set(BTreeSet<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Long(_) => ValueKind::Long,
            Value::String(_) => ValueKind::String,
            Value::Entity(_) => ValueKind::Entity,
            Value::Set(_) => ValueKind::Set,
            Value::Record(_) => ValueKind::Record,
        }
    }

    pub fn set(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(values.into_iter().collect())
    }

    pub fn record<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityUid> {
        match self {
            Value::Entity(uid) => Some(uid),
            _ => None,
        }
    }

    /// Convert JSON without type information. Objects become records unless
    /// they use the `__entity` escape; `__extn` values are not supported.
    pub fn from_json(json: &JsonValue) -> Result<Self, PolicyError> {
        match json {
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => n.as_i64().map(Value::Long).ok_or_else(|| {
                PolicyError::InvalidFormat(format!("`{n}` is not a 64-bit integer"))
            }),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => Ok(Value::Set(
                items.iter().map(Value::from_json).collect::<Result<_, _>>()?,
            )),
            JsonValue::Object(map) => {
                if map.contains_key("__entity") {
                    let uid: EntityUid = serde_json::from_value(json.clone())
                        .map_err(|e| PolicyError::InvalidFormat(e.to_string()))?;
                    return Ok(Value::Entity(uid));
                }
                if map.contains_key("__extn") {
                    return Err(PolicyError::InvalidFormat(
                        "extension values (`__extn`) are not supported".to_string(),
                    ));
                }
                Ok(Value::Record(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
                        .collect::<Result<_, PolicyError>>()?,
                ))
            }
            JsonValue::Null => Err(PolicyError::InvalidFormat(
                "`null` is not a valid value".to_string(),
            )),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
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

impl From<EntityUid> for Value {
    fn from(uid: EntityUid) -> Self {
        Value::Entity(uid)
    }
}

impl Display for Value {
    /// Renders the value as a policy-text literal.
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "\"{}\"", escape_str(s)),
            Value::Entity(uid) => write!(f, "{uid}"),
            Value::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Record(attrs) => write!(
                f,
                "{{{}}}",
                attrs
                    .iter()
                    .map(|(k, v)| format!("\"{}\": {v}", escape_str(k)))
                    .join(", ")
            ),
        }
    }
}

impl Serialize for Value {
    /// Serializes to the entity JSON format accepted by [`Value::from_json`].
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => ser.serialize_bool(*b),
            Value::Long(n) => ser.serialize_i64(*n),
            Value::String(s) => ser.serialize_str(s),
            Value::Entity(uid) => {
                let mut map = ser.serialize_map(Some(1))?;
                map.serialize_entry("__entity", uid)?;
                map.end()
            }
            Value::Set(items) => {
                let mut seq = ser.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Record(attrs) => {
                let mut map = ser.serialize_map(Some(attrs.len()))?;
                for (k, v) in attrs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> EntityUid {
        r#"User::"alice""#.parse().unwrap()
    }

    #[test]
    fn test_from_json_nested() {
        let value = Value::from_json(&json!({
            "name": "alice",
            "age": 42,
            "admin": false,
            "tags": ["a", "b", "a"],
            "manager": {"__entity": {"type": "User", "id": "bob"}},
        }))
        .unwrap();

        let Value::Record(attrs) = value else {
            panic!("expected a record");
        };
        assert_eq!(attrs["name"], Value::from("alice"));
        assert_eq!(attrs["age"], Value::Long(42));
        assert_eq!(attrs["tags"], Value::set(["a".into(), "b".into()]));
        assert_eq!(
            attrs["manager"],
            Value::Entity(r#"User::"bob""#.parse().unwrap())
        );
    }

    #[test]
    fn test_from_json_rejects() {
        assert!(Value::from_json(&json!(1.5)).is_err());
        assert!(Value::from_json(&json!(null)).is_err());
        assert!(Value::from_json(&json!({"__extn": {"fn": "ip", "arg": "1.2.3.4"}})).is_err());
        assert!(Value::from_json(&json!({"__entity": {"type": "User"}})).is_err());
    }

    #[test]
    fn test_display_as_literal() {
        let value = Value::record([
            ("owner", Value::Entity(alice())),
            ("labels", Value::set(["x".into(), "y".into()])),
            ("n", Value::Long(-3)),
        ]);
        assert_eq!(
            value.to_string(),
            r#"{"labels": ["x", "y"], "n": -3, "owner": User::"alice"}"#
        );
    }

    #[test]
    fn test_serialize_uses_entity_escape() {
        let value = Value::set([Value::Entity(alice()), Value::Bool(true)]);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!([true, {"__entity": {"type": "User", "id": "alice"}}])
        );
    }

    #[test]
    fn test_set_equality_ignores_order_and_duplicates() {
        let a = Value::set([Value::Long(1), Value::Long(2), Value::Long(2)]);
        let b = Value::set([Value::Long(2), Value::Long(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Value::Long(1).kind().to_string(), "long");
        assert_eq!(Value::Entity(alice()).kind().to_string(), "entity");
    }
}
