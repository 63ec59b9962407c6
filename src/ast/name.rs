//! Entity type names, e.g. `User` or `Photos::Album`.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PolicyError;

static IDENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[_a-zA-Z][_a-zA-Z0-9]*$").expect("identifier pattern is valid")
});

/// Words that can never be used as an identifier segment of a name.
pub(crate) const RESERVED: &[&str] = &[
    "true", "false", "if", "then", "else", "in", "is", "like", "has", "__parc",
];

/// Returns true if `s` is a valid, non-reserved identifier.
pub fn is_valid_ident(s: &str) -> bool {
    IDENT_RE.is_match(s) && !RESERVED.contains(&s)
}

/// A `::`-separated entity type path. Always has at least one segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(Vec<String>);

impl Name {
    /// Build a name from already validated segments.
    pub(crate) fn from_segments(segments: Vec<String>) -> Self {
        debug_assert!(!segments.is_empty());
        Name(segments)
    }

    /// A single-segment name. Panics in debug builds on an invalid identifier.
    pub fn unqualified(basename: &str) -> Self {
        debug_assert!(is_valid_ident(basename), "invalid identifier {basename}");
        Name(vec![basename.to_string()])
    }

    /// Last segment, e.g. `Album` for `Photos::Album`.
    pub fn basename(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// Segments before the basename.
    pub fn namespace(&self) -> &[String] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Action entity types are named `Action`, optionally namespaced.
    pub fn is_action_type(&self) -> bool {
        self.basename() == "Action"
    }

    /// Prefix this name with `namespace`, unless it is already qualified.
    pub fn qualify_with(&self, namespace: &[String]) -> Name {
        if self.0.len() > 1 || namespace.is_empty() {
            return self.clone();
        }
        let mut segments = namespace.to_vec();
        segments.extend(self.0.iter().cloned());
        Name(segments)
    }

    /// The `Action` type living in the given namespace.
    pub fn action_in(namespace: &[String]) -> Name {
        let mut segments = namespace.to_vec();
        segments.push("Action".to_string());
        Name(segments)
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0.iter().join("::"))
    }
}

impl FromStr for Name {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split("::").map(|seg| seg.trim().to_string()).collect();
        if let Some(bad) = segments.iter().find(|seg| !is_valid_ident(seg)) {
            return Err(PolicyError::InvalidFormat(format!(
                "invalid entity type name `{s}`: `{bad}` is not a valid identifier"
            )));
        }
        Ok(Name(segments))
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
