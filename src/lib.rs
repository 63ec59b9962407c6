//! Policy parser, schema validator and authorizer for
//! Principal-Action-Resource-Context access control.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use parc_core::{Decision, Entities, PolicyEngine, Request};
//!
//! let engine = PolicyEngine::new_from_str(r#"
//!     permit (principal == User::"alice", action == Action::"view", resource);
//! "#).unwrap();
//! let request = Request::new(
//!     r#"User::"alice""#.parse().unwrap(),
//!     r#"Action::"view""#.parse().unwrap(),
//!     r#"Photo::"p1""#.parse().unwrap(),
//!     BTreeMap::new(),
//! );
//! let response = engine.evaluate(&request, &Entities::empty()).unwrap();
//! assert_eq!(response.decision(), Decision::Allow);
//! ```
pub use ast::{EntityUid, Name, Policy, PolicyId, PolicySet, Value};
pub use diagnostics::{Diagnostic, LabeledSpan, Severity, Span};
pub use engine::PolicyEngine;
pub use entities::{Entities, EntitiesError, Entity};
pub use error::{ParseErrors, PolicyError};
pub use evaluator::{Authorizer, Decision, Request, RequestValidationError, Response};
pub use frontend::{InterfaceResult, json_is_authorized};
pub use loader::{compile_policy, compile_schema};
pub use parser::{parse_expression, parse_policies};
pub use schema::{Schema, parse_schema};
pub use validator::{ValidationMode, ValidationResult, Validator};

pub mod ast;
pub mod diagnostics;
mod engine;
pub mod entities;
mod error;
pub mod evaluator;
pub mod frontend;
mod loader;
mod parser;
pub mod schema;
pub mod validator;
