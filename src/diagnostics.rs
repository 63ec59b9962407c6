//! Source-annotated diagnostics shared by the parsers, the validator and the
//! authorizer.
//!
//! The serialized shape is consumed by editors and linters and must stay
//! stable:
//!
//! ```json
//! {
//!   "severity": "Error",
//!   "labels": [{ "text": "expected `;`", "offset": 42, "length": 6 }],
//!   "code": "syntax-error",
//!   "help": "every policy ends with `;`"
//! }
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display as StrumDisplay, EnumString};
use utoipa::ToSchema;

/// A byte range into some source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Span from `start` (inclusive) to `end` (exclusive) byte offsets.
    pub fn between(start: usize, end: usize) -> Self {
        Self {
            offset: start,
            length: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: Span) -> Span {
        Span::between(self.offset.min(other.offset), self.end().max(other.end()))
    }
}

/// How serious a diagnostic is.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    StrumDisplay,
    EnumString,
    AsRefStr,
)]
pub enum Severity {
    Advice,
    Warning,
    Error,
}

/// Stable diagnostic codes.
pub mod codes {
    pub const SYNTAX: &str = "syntax-error";
    pub const DUPLICATE_POLICY_ID: &str = "duplicate-policy-id";
    pub const DUPLICATE_ANNOTATION: &str = "duplicate-annotation";
    pub const REDUNDANT_CONDITION: &str = "redundant-condition";
    pub const NEVER_APPLIES: &str = "policy-never-applies";
    pub const SCHEMA: &str = "schema-error";
    pub const UNDECLARED_ENTITY_TYPE: &str = "undeclared-entity-type";
    pub const UNDECLARED_ACTION: &str = "undeclared-action";
    pub const UNDECLARED_ATTRIBUTE: &str = "undeclared-attribute";
    pub const UNSAFE_OPTIONAL_ATTRIBUTE: &str = "unsafe-optional-attribute";
    pub const TYPE_MISMATCH: &str = "type-mismatch";
    pub const IMPOSSIBLE_POLICY: &str = "impossible-policy";
    pub const EVALUATION: &str = "evaluation-error";
}

/// A message attached to a region of the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct LabeledSpan {
    pub text: String,
    pub offset: usize,
    pub length: usize,
}

impl LabeledSpan {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        Self {
            text: text.into(),
            offset: span.offset,
            length: span.length,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.offset, self.length)
    }
}

/// A structured message about policy, schema or request input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(default)]
    pub labels: Vec<LabeledSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity,
            labels: vec![LabeledSpan::new(message, span)],
            code: None,
            help: None,
            url: None,
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    pub fn advice(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Advice, message, span)
    }

    /// A diagnostic with no meaningful source location.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::error(message, Span::default())
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_label(mut self, text: impl Into<String>, span: Span) -> Self {
        self.labels.push(LabeledSpan::new(text, span));
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// The text of the primary label, or an empty string.
    pub fn message(&self) -> &str {
        self.labels.first().map(|l| l.text.as_str()).unwrap_or("")
    }

    /// The primary span, if any.
    pub fn span(&self) -> Option<Span> {
        self.labels.first().map(LabeledSpan::span)
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {}", self.severity.as_ref().to_lowercase(), self.message())?;
        if let Some(span) = self.span() {
            write!(f, " (at {}..{})", span.offset, span.end())?;
        }
        if let Some(help) = &self.help {
            write!(f, "; help: {help}")?;
        }
        Ok(())
    }
}

/// Returns true if any of the diagnostics is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Render a list of diagnostics as one line each.
pub fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics.iter().map(ToString::to_string).join("\n")
}
