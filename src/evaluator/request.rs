use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::ast::{EntityUid, Name, Value};
use crate::error::PolicyError;
use crate::schema::Schema;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("action `{0}` is not declared in the schema")]
    UndeclaredAction(EntityUid),

    #[error("principal type `{principal_type}` is not valid for action `{action}`")]
    InvalidPrincipalType { principal_type: Name, action: EntityUid },

    #[error("resource type `{resource_type}` is not valid for action `{action}`")]
    InvalidResourceType { resource_type: Name, action: EntityUid },

    #[error("context is not valid for action `{action}`: {message}")]
    InvalidContext { action: EntityUid, message: String },
}

/// A single authorization question. Principal and resource may be left
/// unspecified, in which case only unconstrained scopes match them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub(crate) principal: EntityUid,
    pub(crate) action: EntityUid,
    pub(crate) resource: EntityUid,
    pub(crate) context: BTreeMap<String, Value>,
}

impl Request {
    pub fn new(
        principal: EntityUid,
        action: EntityUid,
        resource: EntityUid,
        context: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            principal,
            action,
            resource,
            context,
        }
    }

    /// Build a request where missing principal or resource become the
    /// unspecified uid.
    pub fn with_optional(
        principal: Option<EntityUid>,
        action: EntityUid,
        resource: Option<EntityUid>,
        context: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(
            principal.unwrap_or_else(EntityUid::unspecified),
            action,
            resource.unwrap_or_else(EntityUid::unspecified),
            context,
        )
    }

    pub fn principal(&self) -> &EntityUid {
        &self.principal
    }

    pub fn action(&self) -> &EntityUid {
        &self.action
    }

    pub fn resource(&self) -> &EntityUid {
        &self.resource
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// Check the request against the schema: the action must be declared,
    /// the principal and resource types must be among the action's
    /// `appliesTo` types and the context must match its declared shape.
    /// An unspecified principal or resource is always accepted.
    pub fn validate(&self, schema: &Schema) -> Result<(), RequestValidationError> {
        let Some(action) = schema.action(&self.action) else {
            return Err(RequestValidationError::UndeclaredAction(self.action.clone()));
        };

        let principal_type = self.principal.entity_type();
        if !self.principal.is_unspecified()
            && !action.principal_types().any(|t| t == principal_type)
        {
            return Err(RequestValidationError::InvalidPrincipalType {
                principal_type: principal_type.clone(),
                action: self.action.clone(),
            });
        }

        let resource_type = self.resource.entity_type();
        if !self.resource.is_unspecified() && !action.resource_types().any(|t| t == resource_type)
        {
            return Err(RequestValidationError::InvalidResourceType {
                resource_type: resource_type.clone(),
                action: self.action.clone(),
            });
        }

        if let Some(shape) = action.context() {
            shape
                .check(&self.context)
                .map_err(|message| RequestValidationError::InvalidContext {
                    action: self.action.clone(),
                    message,
                })?;
        }
        Ok(())
    }
}

/// Read context JSON. When the schema declares the action, values are read
/// using the declared context types; otherwise the untyped JSON value form
/// is used. `null` is the empty context.
pub fn context_from_json(
    json: &JsonValue,
    action: &EntityUid,
    schema: Option<&Schema>,
) -> Result<BTreeMap<String, Value>, PolicyError> {
    if json.is_null() {
        return Ok(BTreeMap::new());
    }
    if !json.is_object() {
        return Err(PolicyError::ContextError(
            "context must be a JSON object".to_string(),
        ));
    }
    let shape = schema
        .and_then(|s| s.action(action))
        .and_then(|def| def.context());
    match shape {
        Some(shape) => shape
            .value_from_json(json)
            .map_err(PolicyError::ContextError),
        None => match Value::from_json(json) {
            Ok(Value::Record(record)) => Ok(record),
            Ok(_) => Err(PolicyError::ContextError(
                "context must be a JSON object".to_string(),
            )),
            Err(e) => Err(PolicyError::ContextError(e.to_string())),
        },
    }
}
