//! Entity identifiers, e.g. `User::"alice"`.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::{Name, escape_str};
use crate::error::PolicyError;
use crate::parser;

/// A typed entity identifier. Totally ordered so that iteration over
/// collections of uids is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityUid {
    ty: Name,
    eid: String,
}

impl EntityUid {
    pub fn new(ty: Name, eid: impl Into<String>) -> Self {
        Self {
            ty,
            eid: eid.into(),
        }
    }

    /// Build from a type path string and an id. The type is validated.
    pub fn from_type_and_id(ty: &str, eid: impl Into<String>) -> Result<Self, PolicyError> {
        Ok(Self::new(ty.parse()?, eid))
    }

    pub fn entity_type(&self) -> &Name {
        &self.ty
    }

    pub fn id(&self) -> &str {
        &self.eid
    }

    /// The uid used for request slots the caller left out. Its type cannot be
    /// written in policy text, so only unconstrained scopes match it.
    pub fn unspecified() -> Self {
        Self {
            ty: Name::from_segments(vec!["__parc".to_string(), "Unspecified".to_string()]),
            eid: String::new(),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::unspecified()
    }
}

impl Display for EntityUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}::\"{}\"", self.ty, escape_str(&self.eid))
    }
}

impl FromStr for EntityUid {
    type Err = PolicyError;

    /// Parses the policy-text form, e.g. `Photos::Album::"summer 2024"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parser::parse_entity_uid(s).map_err(|diags| {
            PolicyError::InvalidFormat(format!(
                "invalid entity uid `{s}`: {}",
                crate::diagnostics::render(&diags)
            ))
        })
    }
}

#[derive(Serialize, Deserialize)]
struct TypeAndId {
    #[serde(rename = "type")]
    ty: String,
    id: String,
}

#[derive(Deserialize)]
struct EntityEscape {
    #[serde(rename = "__entity")]
    entity: TypeAndId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UidRepr {
    Literal(String),
    Escaped(EntityEscape),
    Plain(TypeAndId),
}

impl TryFrom<TypeAndId> for EntityUid {
    type Error = PolicyError;

    fn try_from(value: TypeAndId) -> Result<Self, Self::Error> {
        EntityUid::from_type_and_id(&value.ty, value.id)
    }
}

impl Serialize for EntityUid {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        TypeAndId {
            ty: self.ty.to_string(),
            id: self.eid.clone(),
        }
        .serialize(ser)
    }
}

impl<'de> Deserialize<'de> for EntityUid {
    /// Accepts `"User::\"alice\""`, `{"type": "User", "id": "alice"}` and
    /// `{"__entity": {"type": "User", "id": "alice"}}`.
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let uid = match UidRepr::deserialize(de)? {
            UidRepr::Literal(s) => s.parse(),
            UidRepr::Escaped(e) => e.entity.try_into(),
            UidRepr::Plain(p) => p.try_into(),
        };
        uid.map_err(serde::de::Error::custom)
    }
}
