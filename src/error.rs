use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{self, Diagnostic};
use crate::entities::EntitiesError;
use crate::evaluator::{EvaluationError, RequestValidationError};

#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("failed to parse policy: {0}")]
    ParseError(String),

    #[error("failed to parse schema: {0}")]
    SchemaError(String),

    #[error("policy validation failed: {0}")]
    ValidationError(String),

    #[error("evaluation error: {0}")]
    EvalError(String),

    #[error("request validation error: {0}")]
    RequestValidationError(String),

    #[error("Context creation error: {0}")]
    ContextError(String),

    #[error("Entity error: {0}")]
    EntityError(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Poisoned lock error: {0}")]
    PoisonedLockError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// All syntax diagnostics of a failed parse. Holds at least one error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", diagnostics::render(.0))]
pub struct ParseErrors(pub Vec<Diagnostic>);

impl ParseErrors {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl From<ParseErrors> for PolicyError {
    fn from(err: ParseErrors) -> Self {
        PolicyError::ParseError(err.to_string())
    }
}

impl From<EntitiesError> for PolicyError {
    fn from(err: EntitiesError) -> Self {
        PolicyError::EntityError(err.to_string())
    }
}

impl From<RequestValidationError> for PolicyError {
    fn from(err: RequestValidationError) -> Self {
        PolicyError::RequestValidationError(err.to_string())
    }
}

impl From<EvaluationError> for PolicyError {
    fn from(err: EvaluationError) -> Self {
        PolicyError::EvalError(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for PolicyError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PolicyError::PoisonedLockError(err.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::InvalidFormat(err.to_string())
    }
}
