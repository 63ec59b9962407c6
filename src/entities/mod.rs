//! Entities and the entity store.
//!
//! The parent graph is checked for cycles when the store is built. An
//! entity's ancestor set is computed the first time it is asked for and kept,
//! so later `in` checks on it are a set lookup. Membership is reflexive:
//! every entity is `in` itself, whether or not it is in the store.

mod json;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use itertools::Itertools;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;

use crate::ast::{EntityUid, Value};
use crate::schema::Schema;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntitiesError {
    #[error("duplicate entity `{0}`")]
    Duplicate(String),

    #[error("entity hierarchy contains a cycle through `{0}`")]
    ParentCycle(String),

    #[error("entity `{uid}` does not conform to the schema: {message}")]
    Schema { uid: String, message: String },

    #[error("invalid entity JSON: {0}")]
    Json(String),
}

/// A principal, resource, action or any other node in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    uid: EntityUid,
    attrs: BTreeMap<String, Value>,
    parents: BTreeSet<EntityUid>,
}

impl Entity {
    pub fn new(
        uid: EntityUid,
        attrs: BTreeMap<String, Value>,
        parents: BTreeSet<EntityUid>,
    ) -> Self {
        Self {
            uid,
            attrs,
            parents,
        }
    }

    /// An entity with no attributes and no parents.
    pub fn with_uid(uid: EntityUid) -> Self {
        Self::new(uid, BTreeMap::new(), BTreeSet::new())
    }

    pub fn uid(&self) -> &EntityUid {
        &self.uid
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    /// Direct parents.
    pub fn parents(&self) -> impl Iterator<Item = &EntityUid> {
        self.parents.iter()
    }
}

/// An immutable entity store with an acyclic parent graph.
#[derive(Debug, Clone, Default)]
pub struct Entities {
    entities: HashMap<EntityUid, Entity>,
    ancestors: HashMap<EntityUid, OnceCell<HashSet<EntityUid>>>,
}

enum Mark {
    Visiting,
    Done,
}

impl Entities {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store. With a schema, every entity must conform to it, and
    /// entities for the schema's actions are added.
    pub fn from_entities(
        entities: impl IntoIterator<Item = Entity>,
        schema: Option<&Schema>,
    ) -> Result<Self, EntitiesError> {
        Self::empty().add_entities(entities, schema)
    }

    /// A new store holding the current entities plus `entities`. The parent
    /// graph is checked again over the combined set.
    pub fn add_entities(
        self,
        entities: impl IntoIterator<Item = Entity>,
        schema: Option<&Schema>,
    ) -> Result<Self, EntitiesError> {
        let mut map = self.entities;
        for entity in entities {
            if let Some(schema) = schema {
                if entity.uid.entity_type().is_action_type()
                    && schema.action(&entity.uid).is_some()
                {
                    // Declared actions come from the schema below.
                    continue;
                }
                check_conformance(&entity, schema)?;
            }
            if map.contains_key(&entity.uid) {
                return Err(EntitiesError::Duplicate(entity.uid.to_string()));
            }
            map.insert(entity.uid.clone(), entity);
        }

        if let Some(schema) = schema {
            for action in schema.action_entities() {
                map.entry(action.uid.clone()).or_insert(action);
            }
        }

        check_acyclic(&map)?;
        debug!(event = "Entities", phase = "Hierarchy", entities = map.len());
        let ancestors = map.keys().map(|uid| (uid.clone(), OnceCell::new())).collect();
        Ok(Self {
            entities: map,
            ancestors,
        })
    }

    pub fn get(&self, uid: &EntityUid) -> Option<&Entity> {
        self.entities.get(uid)
    }

    /// Whether `of` is in `candidate`: they are equal, or `candidate` is a
    /// transitive parent of `of`.
    pub fn is_ancestor(&self, candidate: &EntityUid, of: &EntityUid) -> bool {
        candidate == of
            || self
                .closure(of)
                .is_some_and(|ancestors| ancestors.contains(candidate))
    }

    /// Transitive parents of `uid`, excluding `uid` itself, in sorted order.
    pub fn ancestors(&self, uid: &EntityUid) -> Vec<&EntityUid> {
        self.closure(uid)
            .map(|set| set.iter().sorted().collect())
            .unwrap_or_default()
    }

    fn closure(&self, uid: &EntityUid) -> Option<&HashSet<EntityUid>> {
        let cell = self.ancestors.get(uid)?;
        Some(cell.get_or_init(|| self.collect_ancestors(uid)))
    }

    /// Walk up from `uid`. Parents whose set is already known contribute it
    /// whole instead of being walked again.
    fn collect_ancestors(&self, uid: &EntityUid) -> HashSet<EntityUid> {
        let mut found = HashSet::new();
        let mut pending: Vec<&EntityUid> = self.parents_of(uid).collect();
        while let Some(next) = pending.pop() {
            if !found.insert(next.clone()) {
                continue;
            }
            match self.ancestors.get(next).and_then(OnceCell::get) {
                Some(known) => found.extend(known.iter().cloned()),
                None => pending.extend(self.parents_of(next)),
            }
        }
        found
    }

    fn parents_of(&self, uid: &EntityUid) -> impl Iterator<Item = &EntityUid> {
        self.entities.get(uid).into_iter().flat_map(|e| e.parents.iter())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn check_conformance(entity: &Entity, schema: &Schema) -> Result<(), EntitiesError> {
    let fail = |message: String| EntitiesError::Schema {
        uid: entity.uid.to_string(),
        message,
    };
    let ty = entity.uid.entity_type();
    if ty.is_action_type() {
        return Err(fail("action is not declared".to_string()));
    }
    let Some(def) = schema.entity_type(ty) else {
        return Err(fail(format!("entity type `{ty}` is not declared")));
    };
    def.attributes.check(&entity.attrs).map_err(fail)?;
    if let Some(parent) = entity
        .parents
        .iter()
        .find(|p| !def.member_of.contains(p.entity_type()))
    {
        return Err(fail(format!(
            "`{ty}` entities cannot have a parent of type `{}`",
            parent.entity_type()
        )));
    }
    Ok(())
}

/// Reject a parent graph with a cycle, by depth-first traversal with an
/// explicit stack. Parents missing from the store end a path.
fn check_acyclic(entities: &HashMap<EntityUid, Entity>) -> Result<(), EntitiesError> {
    let parents_of = |uid: &EntityUid| {
        entities
            .get(uid)
            .into_iter()
            .flat_map(|e| e.parents.iter())
    };

    let mut marks: HashMap<&EntityUid, Mark> = HashMap::new();
    for root in entities.keys().sorted() {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Visiting);
        let mut stack = vec![(root, parents_of(root))];
        while let Some((uid, parents)) = stack.last_mut() {
            let uid = *uid;
            match parents.next() {
                Some(parent) => match marks.get(parent) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        return Err(EntitiesError::ParentCycle(parent.to_string()));
                    }
                    None => {
                        marks.insert(parent, Mark::Visiting);
                        stack.push((parent, parents_of(parent)));
                    }
                },
                None => {
                    marks.insert(uid, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}
