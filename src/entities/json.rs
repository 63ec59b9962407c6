//! Entity JSON: `[{"uid": .., "attrs": {..}, "parents": [..]}]`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use super::{Entities, EntitiesError, Entity};
use crate::ast::{EntityUid, Value};
use crate::schema::Schema;

#[derive(Debug, Deserialize)]
struct EntityJson {
    uid: EntityUid,
    #[serde(default)]
    attrs: Option<Map<String, JsonValue>>,
    #[serde(default)]
    parents: Option<Vec<EntityUid>>,
}

impl EntityJson {
    fn into_entity(self, schema: Option<&Schema>) -> Result<Entity, EntitiesError> {
        let attrs = self.attrs.unwrap_or_default();
        let declared = schema.and_then(|s| s.entity_type(self.uid.entity_type()));
        let attrs = match declared {
            Some(def) => def
                .attributes
                .value_from_json(&JsonValue::Object(attrs))
                .map_err(|message| EntitiesError::Schema {
                    uid: self.uid.to_string(),
                    message,
                })?,
            None => attrs
                .iter()
                .map(|(name, value)| {
                    Value::from_json(value)
                        .map(|v| (name.clone(), v))
                        .map_err(|e| {
                            EntitiesError::Json(format!(
                                "entity `{}`, attribute `{name}`: {e}",
                                self.uid
                            ))
                        })
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?,
        };
        let parents = self.parents.unwrap_or_default().into_iter().collect();
        Ok(Entity::new(self.uid, attrs, parents))
    }
}

impl Entities {
    /// Parse entity JSON. `null` and `{}` are the empty store. With a
    /// schema, attribute values are read using their declared types and every
    /// entity must conform.
    pub fn from_json_str(json: &str, schema: Option<&Schema>) -> Result<Self, EntitiesError> {
        let value: JsonValue =
            serde_json::from_str(json).map_err(|e| EntitiesError::Json(e.to_string()))?;
        Self::from_json_value(value, schema)
    }

    pub fn from_json_value(json: JsonValue, schema: Option<&Schema>) -> Result<Self, EntitiesError> {
        let raw: Vec<EntityJson> = match json {
            JsonValue::Null => Vec::new(),
            JsonValue::Object(map) if map.is_empty() => Vec::new(),
            json => serde_json::from_value(json).map_err(|e| EntitiesError::Json(e.to_string()))?,
        };
        let entities = raw
            .into_iter()
            .map(|e| e.into_entity(schema))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_entities(entities, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid(s: &str) -> EntityUid {
        s.parse().unwrap()
    }

    #[test]
    fn test_untyped_entities() {
        let store = Entities::from_json_value(
            json!([
                {
                    "uid": {"type": "User", "id": "alice"},
                    "attrs": {
                        "age": 30,
                        "tags": ["a", "b"],
                        "manager": {"__entity": {"type": "User", "id": "bob"}},
                        "address": {"city": "Oslo"}
                    },
                    "parents": [r#"Group::"admins""#]
                },
                {"uid": {"__entity": {"type": "User", "id": "bob"}}, "attrs": null, "parents": null},
                {"uid": r#"Group::"admins""#}
            ]),
            None,
        )
        .unwrap();

        let alice = store.get(&uid(r#"User::"alice""#)).unwrap();
        assert_eq!(alice.attr("age"), Some(&Value::Long(30)));
        assert_eq!(
            alice.attr("manager"),
            Some(&Value::Entity(uid(r#"User::"bob""#)))
        );
        assert!(matches!(alice.attr("address"), Some(Value::Record(_))));
        assert!(store.is_ancestor(&uid(r#"Group::"admins""#), &uid(r#"User::"alice""#)));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_typed_entities() {
        let schema: Schema = r#"
            entity User { manager?: User, level: Long };
            action view;
        "#
        .parse()
        .unwrap();
        let store = Entities::from_json_str(
            r#"[
                {"uid": {"type": "User", "id": "alice"},
                 "attrs": {"manager": {"type": "User", "id": "bob"}, "level": 3}},
                {"uid": {"type": "User", "id": "bob"}, "attrs": {"level": 5}}
            ]"#,
            Some(&schema),
        )
        .unwrap();
        assert_eq!(
            store.get(&uid(r#"User::"alice""#)).unwrap().attr("manager"),
            Some(&Value::Entity(uid(r#"User::"bob""#)))
        );
        assert!(store.get(&uid(r#"Action::"view""#)).is_some());

        let err = Entities::from_json_str(
            r#"[{"uid": {"type": "User", "id": "x"}, "attrs": {"level": "high"}}]"#,
            Some(&schema),
        )
        .unwrap_err();
        assert!(matches!(err, EntitiesError::Schema { .. }));
    }

    #[test]
    fn test_malformed_json() {
        for input in [
            "{",
            r#"{"uid": "User::\"a\""}"#,
            r#"[{"uid": "User::alice"}]"#,
            r#"[{"uid": "User::\"a\"", "attrs": {"n": 1.5}}]"#,
            r#"[{"uid": "User::\"a\"", "attrs": {"n": null}}]"#,
        ] {
            assert!(
                matches!(Entities::from_json_str(input, None), Err(EntitiesError::Json(_))),
                "accepted {input}"
            );
        }
    }

    #[test]
    fn test_null_and_empty_object_mean_empty() {
        assert!(Entities::from_json_value(JsonValue::Null, None).unwrap().is_empty());
        assert!(Entities::from_json_value(json!({}), None).unwrap().is_empty());
    }
}
