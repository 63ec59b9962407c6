//! JSON schema format.
//!
//! ```json
//! { "NS": {
//!     "entityTypes": { "User": { "memberOfTypes": ["Group"], "shape": { "type": "Record", "attributes": {} } } },
//!     "actions": { "view": { "memberOf": [{ "id": "read" }], "appliesTo": { "principalTypes": ["User"], "resourceTypes": ["Photo"] } } },
//!     "commonTypes": { "Tags": { "type": "Set", "element": { "type": "String" } } }
//! } }
//! ```
//!
//! The empty key `""` is the unnamed namespace.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::resolve::{
    ActionDecl, ActionRef, AppliesToDecl, AttrDecl, CommonTypeDecl, Decls, EntityDecl, TypeExpr,
    TypeRef,
};
use crate::ast::{Name, is_valid_ident};
use crate::diagnostics::{Diagnostic, Span, codes};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceJson {
    #[serde(default)]
    entity_types: BTreeMap<String, EntityTypeJson>,
    #[serde(default)]
    actions: BTreeMap<String, ActionJson>,
    #[serde(default)]
    common_types: BTreeMap<String, TypeJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityTypeJson {
    #[serde(default)]
    member_of_types: Vec<String>,
    #[serde(default)]
    shape: Option<TypeJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionJson {
    #[serde(default)]
    member_of: Vec<ActionRefJson>,
    #[serde(default)]
    applies_to: Option<AppliesToJson>,
}

#[derive(Debug, Deserialize)]
struct ActionRefJson {
    id: String,
    #[serde(default, rename = "type")]
    ty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppliesToJson {
    #[serde(default)]
    principal_types: Vec<String>,
    #[serde(default)]
    resource_types: Vec<String>,
    #[serde(default)]
    context: Option<TypeJson>,
}

#[derive(Debug, Deserialize)]
struct TypeJson {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    element: Option<Box<TypeJson>>,
    #[serde(default)]
    attributes: BTreeMap<String, TypeJson>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "required_by_default")]
    required: bool,
}

fn required_by_default() -> bool {
    true
}

fn schema_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::from_message(message).with_code(codes::SCHEMA)
}

fn path(text: &str) -> Result<Vec<String>, Diagnostic> {
    text.parse::<Name>()
        .map(|name| name.segments().to_vec())
        .map_err(|_| schema_error(format!("`{text}` is not a valid type name")))
}

fn type_ref(text: &str) -> Result<TypeRef, Diagnostic> {
    Ok(TypeRef {
        path: path(text)?,
        span: Span::default(),
    })
}

fn ident(text: &str, what: &str) -> Result<String, Diagnostic> {
    if is_valid_ident(text) {
        Ok(text.to_string())
    } else {
        Err(schema_error(format!("`{text}` is not a valid {what} name")))
    }
}

/// Lower schema JSON into declarations.
pub(super) fn lower(json: &JsonValue) -> Result<Decls, Diagnostic> {
    let namespaces: BTreeMap<String, NamespaceJson> = serde_json::from_value(json.clone())
        .map_err(|e| schema_error(format!("invalid schema JSON: {e}")))?;

    let mut decls = Decls::default();
    for (ns_name, ns) in namespaces {
        let namespace = if ns_name.is_empty() {
            Vec::new()
        } else {
            path(&ns_name)?
        };

        for (name, ty) in &ns.common_types {
            decls.common_types.push(CommonTypeDecl {
                namespace: namespace.clone(),
                name: ident(name, "common type")?,
                ty: type_expr(ty)?,
                span: Span::default(),
            });
        }

        for (name, entity) in &ns.entity_types {
            let attrs = match &entity.shape {
                None => Vec::new(),
                Some(shape) if shape.ty == "Record" => attr_decls(&shape.attributes)?,
                Some(shape) => {
                    return Err(schema_error(format!(
                        "shape of entity type `{name}` must be a Record, found `{}`",
                        shape.ty
                    )));
                }
            };
            decls.entities.push(EntityDecl {
                namespace: namespace.clone(),
                name: ident(name, "entity type")?,
                parents: entity
                    .member_of_types
                    .iter()
                    .map(|p| type_ref(p))
                    .collect::<Result<_, _>>()?,
                attrs,
                span: Span::default(),
            });
        }

        for (name, action) in &ns.actions {
            let parents = action
                .member_of
                .iter()
                .map(|parent| -> Result<ActionRef, Diagnostic> {
                    Ok(ActionRef {
                        ty: parent.ty.as_deref().map(path).transpose()?,
                        id: parent.id.clone(),
                        span: Span::default(),
                    })
                })
                .collect::<Result<_, _>>()?;
            let applies_to = match &action.applies_to {
                None => None,
                Some(applies) => Some(AppliesToDecl {
                    principals: applies
                        .principal_types
                        .iter()
                        .map(|t| type_ref(t))
                        .collect::<Result<_, _>>()?,
                    resources: applies
                        .resource_types
                        .iter()
                        .map(|t| type_ref(t))
                        .collect::<Result<_, _>>()?,
                    context: applies.context.as_ref().map(type_expr).transpose()?,
                }),
            };
            decls.actions.push(ActionDecl {
                namespace: namespace.clone(),
                name: name.clone(),
                parents,
                applies_to,
                span: Span::default(),
            });
        }
    }
    Ok(decls)
}

fn attr_decls(attrs: &BTreeMap<String, TypeJson>) -> Result<Vec<AttrDecl>, Diagnostic> {
    attrs
        .iter()
        .map(|(name, ty)| -> Result<AttrDecl, Diagnostic> {
            Ok(AttrDecl {
                name: name.clone(),
                required: ty.required,
                ty: type_expr(ty)?,
                span: Span::default(),
            })
        })
        .collect()
}

fn type_expr(ty: &TypeJson) -> Result<TypeExpr, Diagnostic> {
    let named = |what: &str| {
        ty.name
            .as_deref()
            .ok_or_else(|| schema_error(format!("`{what}` type requires a `name`")))
            .and_then(type_ref)
    };
    match ty.ty.as_str() {
        "Set" => {
            let elem = ty
                .element
                .as_deref()
                .ok_or_else(|| schema_error("`Set` type requires an `element`"))?;
            Ok(TypeExpr::Set(Box::new(type_expr(elem)?)))
        }
        "Record" => Ok(TypeExpr::Record(attr_decls(&ty.attributes)?)),
        "Entity" => Ok(TypeExpr::Entity(named("Entity")?)),
        "EntityOrCommon" => Ok(TypeExpr::Named(named("EntityOrCommon")?)),
        other => Ok(TypeExpr::Named(type_ref(other)?)),
    }
}
