//! Policy and value data model.
//!
//! Canonical string forms:
//! - Entity type: `User` or `NS::User`
//! - Entity uid: `User::"alice"` or `NS::User::"alice"`
//! - Values: policy-text literals, e.g. `[1, 2]` or `{"a": true}`

mod entity_uid;
mod expr;
mod name;
mod policy;
mod policy_set;
mod value;

pub use entity_uid::EntityUid;
pub use expr::{
    BinaryOp, Expr, ExprKind, Literal, Pattern, PatternElem, UnaryOp, Var,
};
pub use name::{Name, is_valid_ident};
pub use policy::{
    ActionConstraint, Annotation, Condition, ConditionKind, Effect, EntityConstraint, Policy,
    PolicyId, Scope,
};
pub use policy_set::PolicySet;
pub use value::{Value, ValueKind};

/// Escape a string for use inside a double-quoted policy literal.
pub(crate) fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
