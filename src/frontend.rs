//! Stateless JSON entry point: one authorization call in, one answer out.
//!
//! ```json
//! { "principal": "User::\"alice\"", "action": "Action::\"view\"",
//!   "resource": {"type": "Photo", "id": "p1"}, "context": {},
//!   "schema": "entity User; ...", "policies": "permit(...);", "entities": [] }
//! ```
//!
//! `policies` and `entities` may also be nested under `slice`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::ast::{EntityUid, PolicyId, PolicySet};
use crate::entities::Entities;
use crate::evaluator::{Authorizer, Decision, Request, Response, context_from_json};
use crate::parser::parse_policies;
use crate::schema::{Schema, parse_schema};

#[derive(Debug, Deserialize)]
struct AuthorizationCall {
    #[serde(default)]
    principal: Option<EntityUid>,
    #[serde(default)]
    action: Option<EntityUid>,
    #[serde(default)]
    resource: Option<EntityUid>,
    #[serde(default)]
    context: JsonValue,
    #[serde(default)]
    schema: JsonValue,
    #[serde(default)]
    policies: Option<String>,
    #[serde(default)]
    entities: JsonValue,
    #[serde(default)]
    slice: Option<Slice>,
}

#[derive(Debug, Deserialize)]
struct Slice {
    #[serde(default)]
    policies: Option<String>,
    #[serde(default)]
    entities: JsonValue,
}

/// Why a call produced no decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The call, its policies, schema, entities or request were rejected.
    #[error("{}", .0.join("; "))]
    Input(Vec<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CallError {
    fn input(message: impl ToString) -> Self {
        CallError::Input(vec![message.to_string()])
    }

    pub fn messages(&self) -> Vec<String> {
        match self {
            CallError::Input(messages) => messages.clone(),
            CallError::Internal(message) => vec![message.clone()],
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CallError::Internal(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnswerDiagnostics {
    pub reason: Vec<PolicyId>,
    pub errors: Vec<String>,
}

/// The decision part of an answer, carried JSON-encoded in
/// [`InterfaceResult::result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnswerResponse {
    pub decision: Decision,
    pub diagnostics: AnswerDiagnostics,
}

impl From<&Response> for AnswerResponse {
    fn from(response: &Response) -> Self {
        Self {
            decision: response.decision(),
            diagnostics: AnswerDiagnostics {
                reason: response.reasons().to_vec(),
                errors: response
                    .errors()
                    .iter()
                    .map(|d| d.message().to_string())
                    .collect(),
            },
        }
    }
}

/// The answer to a call: `{"success": "true", "result": ..}` or
/// `{"success": "false", "isInternal": .., "errors": [..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceResult {
    success: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_internal: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl InterfaceResult {
    fn succeeded(result: String) -> Self {
        Self {
            success: "true".to_string(),
            result: Some(result),
            is_internal: None,
            errors: Vec::new(),
        }
    }

    fn failed(error: &CallError) -> Self {
        Self {
            success: "false".to_string(),
            result: None,
            is_internal: Some(error.is_internal()),
            errors: error.messages(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success == "true"
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// The decoded answer, for successful calls.
    pub fn answer(&self) -> Option<AnswerResponse> {
        self.result
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal.unwrap_or(false)
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Answer one JSON-encoded authorization call. Never fails: every failure is
/// reported inside the result.
pub fn json_is_authorized(input: &str) -> InterfaceResult {
    let outcome = authorize_call(input).and_then(|answer| {
        serde_json::to_string(&answer).map_err(|e| CallError::Internal(e.to_string()))
    });
    match outcome {
        Ok(result) => InterfaceResult::succeeded(result),
        Err(error) => {
            warn!(event = "Call", phase = "Failed", error = error.to_string());
            InterfaceResult::failed(&error)
        }
    }
}

fn authorize_call(input: &str) -> Result<AnswerResponse, CallError> {
    let call: AuthorizationCall = serde_json::from_str(input)
        .map_err(|e| CallError::input(format!("failed to parse the call: {e}")))?;

    let (policies, entities) = match call.slice {
        Some(slice) => (
            slice.policies.or(call.policies),
            if slice.entities.is_null() {
                call.entities
            } else {
                slice.entities
            },
        ),
        None => (call.policies, call.entities),
    };
    let action = call
        .action
        .ok_or_else(|| CallError::input("the call has no `action`"))?;

    let schema = load_schema(call.schema)?;
    let policies = load_policies(policies.as_deref().unwrap_or_default())?;
    let entities = Entities::from_json_value(entities, schema.as_ref()).map_err(CallError::input)?;
    let context =
        context_from_json(&call.context, &action, schema.as_ref()).map_err(CallError::input)?;
    debug!(
        event = "Call",
        phase = "Parsed",
        policies = policies.num_of_policies(),
        entities = entities.len(),
        schema = schema.is_some()
    );

    let request = Request::with_optional(call.principal, action, call.resource, context);
    let response = Authorizer::new()
        .is_authorized(&request, &policies, &entities, schema.as_ref())
        .map_err(CallError::input)?;
    Ok(AnswerResponse::from(&response))
}

/// The schema is schema text in either format, or schema JSON inline.
fn load_schema(json: JsonValue) -> Result<Option<Schema>, CallError> {
    match json {
        JsonValue::Null => Ok(None),
        JsonValue::String(text) => match parse_schema(&text) {
            (Some(schema), _) => Ok(Some(schema)),
            (None, diagnostics) => Err(CallError::Input(
                diagnostics.iter().map(ToString::to_string).collect(),
            )),
        },
        json => Schema::from_json_value(&json)
            .map(Some)
            .map_err(|e| CallError::Input(e.diagnostics().iter().map(ToString::to_string).collect())),
    }
}

fn load_policies(text: &str) -> Result<PolicySet, CallError> {
    match parse_policies(text) {
        (Some(set), _) => Ok(set),
        (None, diagnostics) => Err(CallError::Input(
            diagnostics
                .iter()
                .filter(|d| d.is_error())
                .map(ToString::to_string)
                .collect(),
        )),
    }
}
