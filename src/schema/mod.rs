//! Schemas: declared entity types, actions and their attribute shapes.
//!
//! Two source formats produce the same [`Schema`]:
//! - the human-readable syntax (`entity User in [Group] { age: Long };`)
//! - the JSON format, selected when the text starts with `{`
//!
//! Both are lowered to a common declaration list and then resolved, so
//! semantic checks (undeclared types, duplicate declarations, action cycles)
//! behave the same for either format.

mod human;
mod json;
mod resolve;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::ast::{EntityUid, Name, Value};
use crate::diagnostics::{self, Diagnostic};
use crate::entities::Entity;
use crate::error::{ParseErrors, PolicyError};

/// A resolved attribute or context type. Common type aliases are already
/// expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaType {
    Bool,
    Long,
    String,
    Set(Box<SchemaType>),
    Record(RecordType),
    Entity(Name),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    pub ty: SchemaType,
    pub required: bool,
}

/// A closed record shape: attributes not listed here are not allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordType {
    attrs: BTreeMap<String, AttributeType>,
}

impl RecordType {
    pub fn new(attrs: BTreeMap<String, AttributeType>) -> Self {
        Self { attrs }
    }

    pub fn get(&self, attr: &str) -> Option<&AttributeType> {
        self.attrs.get(attr)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&String, &AttributeType)> {
        self.attrs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Check a record value: required attributes present, no undeclared
    /// attributes, every value of its declared type.
    pub fn check(&self, record: &BTreeMap<String, Value>) -> Result<(), String> {
        if let Some(missing) = self
            .attrs
            .iter()
            .find(|(name, attr)| attr.required && !record.contains_key(*name))
            .map(|(name, _)| name)
        {
            return Err(format!("missing required attribute `{missing}`"));
        }
        for (name, value) in record {
            let Some(attr) = self.attrs.get(name) else {
                return Err(format!("attribute `{name}` is not declared"));
            };
            attr.ty
                .check(value)
                .map_err(|e| format!("attribute `{name}`: {e}"))?;
        }
        Ok(())
    }

    /// Convert a JSON object using the declared attribute types. Undeclared
    /// attributes are converted without type information.
    pub fn value_from_json(&self, json: &JsonValue) -> Result<BTreeMap<String, Value>, String> {
        let JsonValue::Object(map) = json else {
            return Err(format!("expected a record, found `{json}`"));
        };
        map.iter()
            .map(|(name, value)| {
                let converted = match self.attrs.get(name) {
                    Some(attr) => attr.ty.value_from_json(value),
                    None => Value::from_json(value).map_err(|e| e.to_string()),
                };
                converted
                    .map(|v| (name.clone(), v))
                    .map_err(|e| format!("attribute `{name}`: {e}"))
            })
            .collect()
    }
}

impl SchemaType {
    /// Whether `value` inhabits this type.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (SchemaType::Bool, Value::Bool(_))
            | (SchemaType::Long, Value::Long(_))
            | (SchemaType::String, Value::String(_)) => Ok(()),
            (SchemaType::Entity(ty), Value::Entity(uid)) => {
                if uid.entity_type() == ty {
                    Ok(())
                } else {
                    Err(format!("expected an entity of type `{ty}`, found `{uid}`"))
                }
            }
            (SchemaType::Set(elem), Value::Set(items)) => {
                items.iter().try_for_each(|item| elem.check(item))
            }
            (SchemaType::Record(record), Value::Record(attrs)) => record.check(attrs),
            (ty, value) => Err(format!("expected {ty}, found {}", value.kind())),
        }
    }

    /// Convert JSON guided by this type. Entity-typed positions accept the
    /// plain `{"type": .., "id": ..}` form in addition to `__entity`.
    pub fn value_from_json(&self, json: &JsonValue) -> Result<Value, String> {
        match (self, json) {
            (SchemaType::Entity(_), _) => serde_json::from_value::<EntityUid>(json.clone())
                .map(Value::Entity)
                .map_err(|e| format!("expected an entity reference: {e}")),
            (SchemaType::Set(elem), JsonValue::Array(items)) => items
                .iter()
                .map(|item| elem.value_from_json(item))
                .collect::<Result<_, _>>()
                .map(Value::Set),
            (SchemaType::Record(record), JsonValue::Object(_)) => {
                record.value_from_json(json).map(Value::Record)
            }
            _ => Value::from_json(json).map_err(|e| e.to_string()),
        }
    }
}

impl Display for SchemaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SchemaType::Bool => write!(f, "Bool"),
            SchemaType::Long => write!(f, "Long"),
            SchemaType::String => write!(f, "String"),
            SchemaType::Set(elem) => write!(f, "Set<{elem}>"),
            SchemaType::Entity(name) => write!(f, "{name}"),
            SchemaType::Record(record) => write!(
                f,
                "{{{}}}",
                record
                    .attributes()
                    .map(|(name, attr)| {
                        let opt = if attr.required { "" } else { "?" };
                        format!("{name}{opt}: {}", attr.ty)
                    })
                    .join(", ")
            ),
        }
    }
}

/// A declared entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeDef {
    pub name: Name,
    /// Types an entity of this type may have as direct parents.
    pub member_of: BTreeSet<Name>,
    pub attributes: RecordType,
}

/// Principal/resource types and context shape of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliesTo {
    pub principal_types: BTreeSet<Name>,
    pub resource_types: BTreeSet<Name>,
    pub context: RecordType,
}

/// A declared action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDef {
    pub uid: EntityUid,
    pub member_of: BTreeSet<EntityUid>,
    /// Transitive closure of `member_of`.
    pub ancestors: BTreeSet<EntityUid>,
    /// `None` when the declaration has no `appliesTo`; such an action applies
    /// to no principal or resource type.
    pub applies_to: Option<AppliesTo>,
}

impl ActionDef {
    pub fn principal_types(&self) -> impl Iterator<Item = &Name> {
        self.applies_to
            .iter()
            .flat_map(|a| a.principal_types.iter())
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &Name> {
        self.applies_to.iter().flat_map(|a| a.resource_types.iter())
    }

    pub fn context(&self) -> Option<&RecordType> {
        self.applies_to.as_ref().map(|a| &a.context)
    }
}

/// An immutable, resolved schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entity_types: BTreeMap<Name, EntityTypeDef>,
    actions: BTreeMap<EntityUid, ActionDef>,
}

impl Schema {
    /// Parse schema JSON that is already in memory.
    pub fn from_json_value(json: &JsonValue) -> Result<Self, ParseErrors> {
        let decls = json::lower(json).map_err(|d| ParseErrors(vec![d]))?;
        finish(resolve::resolve(decls), "json")
    }

    pub fn entity_type(&self, name: &Name) -> Option<&EntityTypeDef> {
        self.entity_types.get(name)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityTypeDef> {
        self.entity_types.values()
    }

    pub fn action(&self, uid: &EntityUid) -> Option<&ActionDef> {
        self.actions.get(uid)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDef> {
        self.actions.values()
    }

    /// Whether `name` is a declared entity type or the type of a declared
    /// action.
    pub fn is_known_type(&self, name: &Name) -> bool {
        self.entity_types.contains_key(name) || self.actions.keys().any(|a| a.entity_type() == name)
    }

    /// Reflexive membership between declared actions.
    pub fn is_action_in(&self, action: &EntityUid, ancestor: &EntityUid) -> bool {
        action == ancestor
            || self
                .actions
                .get(action)
                .is_some_and(|def| def.ancestors.contains(ancestor))
    }

    /// Whether an entity of type `child` can have an entity of type
    /// `ancestor` among its ancestors, or is of that type itself.
    pub fn may_descend(&self, child: &Name, ancestor: &Name) -> bool {
        let mut seen = BTreeSet::new();
        let mut pending = vec![child];
        while let Some(ty) = pending.pop() {
            if ty == ancestor {
                return true;
            }
            if !seen.insert(ty) {
                continue;
            }
            if let Some(def) = self.entity_types.get(ty) {
                pending.extend(def.member_of.iter());
            }
        }
        false
    }

    /// Entities for every declared action, with their declared parents.
    pub fn action_entities(&self) -> Vec<Entity> {
        self.actions
            .values()
            .map(|def| Entity::new(def.uid.clone(), BTreeMap::new(), def.member_of.clone()))
            .collect()
    }
}

/// Parse a schema in either format, returning every diagnostic found. The
/// schema is `None` when any diagnostic is an error.
pub fn parse_schema(text: &str) -> (Option<Schema>, Vec<Diagnostic>) {
    if text.trim_start().starts_with('{') {
        let json: JsonValue = match serde_json::from_str(text) {
            Ok(json) => json,
            Err(e) => {
                return (
                    None,
                    vec![Diagnostic::from_message(format!("invalid schema JSON: {e}"))
                        .with_code(crate::diagnostics::codes::SCHEMA)],
                );
            }
        };
        return match Schema::from_json_value(&json) {
            Ok(schema) => (Some(schema), Vec::new()),
            Err(errors) => (None, errors.into_diagnostics()),
        };
    }

    let (decls, mut diagnostics) = human::parse(text);
    if diagnostics::has_errors(&diagnostics) {
        return (None, diagnostics);
    }
    match finish(resolve::resolve(decls), "human") {
        Ok(schema) => (Some(schema), diagnostics),
        Err(errors) => {
            diagnostics.extend(errors.into_diagnostics());
            (None, diagnostics)
        }
    }
}

fn finish(
    resolved: Result<Schema, Vec<Diagnostic>>,
    format: &str,
) -> Result<Schema, ParseErrors> {
    match resolved {
        Ok(schema) => {
            debug!(
                event = "Schema",
                phase = "Resolved",
                format = format,
                entity_types = schema.entity_types.len(),
                actions = schema.actions.len()
            );
            Ok(schema)
        }
        Err(diagnostics) => Err(ParseErrors(diagnostics)),
    }
}

impl FromStr for Schema {
    type Err = ParseErrors;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_schema(s) {
            (Some(schema), _) => Ok(schema),
            (None, diagnostics) => Err(ParseErrors(diagnostics)),
        }
    }
}

impl TryFrom<&JsonValue> for Schema {
    type Error = PolicyError;

    fn try_from(json: &JsonValue) -> Result<Self, Self::Error> {
        Schema::from_json_value(json).map_err(|e| PolicyError::SchemaError(e.to_string()))
    }
}
