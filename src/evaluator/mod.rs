//! Request evaluation and the authorization decision.

mod authorizer;
mod eval;
mod request;

pub use authorizer::{Authorizer, Decision, Response};
pub use eval::{EvaluationError, EvaluationErrorKind, Evaluator};
pub use request::{Request, RequestValidationError, context_from_json};
