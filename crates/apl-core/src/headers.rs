#![forbid(unsafe_code)]

//! Request header normalisation and filtering.
//!
//! Media requests carry free-form `"Name: value"` header lines from the
//! document. Before they reach the host they are normalised (trimmed, one
//! space after the colon) and run through an ordered list of
//! [`HeaderRule`]s:
//!
//! - rules are tried in order and the first whose pattern matches the header
//!   name decides (`allow` keeps the header, otherwise it is dropped);
//! - a header no rule matches is kept;
//! - duplicate header lines are preserved as-is.
//!
//! Patterns are case-insensitive regular expressions that must match the
//! whole header name, so `(X-)(.*)` covers every `X-` header while `A`
//! matches only a header named `A`.

use std::fmt;

use regex::{Regex, RegexBuilder};

/// A header pattern that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRuleError {
    pub pattern: String,
    pub reason: String,
}

impl fmt::Display for HeaderRuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern '{}': {}", self.pattern, self.reason)
    }
}

impl std::error::Error for HeaderRuleError {}

/// One header filtering rule.
#[derive(Debug, Clone)]
pub struct HeaderRule {
    pattern: String,
    allow: bool,
    regex: Regex,
}

impl PartialEq for HeaderRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.allow == other.allow
    }
}

impl Eq for HeaderRule {}

impl HeaderRule {
    /// Compile `pattern` into a rule. Empty patterns are rejected.
    pub fn new(pattern: impl Into<String>, allow: bool) -> Result<Self, HeaderRuleError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(HeaderRuleError {
                pattern,
                reason: "empty pattern".into(),
            });
        }
        let regex = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .case_insensitive(true)
            .build()
            .map_err(|e| HeaderRuleError {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern,
            allow,
            regex,
        })
    }

    pub fn allow(pattern: impl Into<String>) -> Result<Self, HeaderRuleError> {
        Self::new(pattern, true)
    }

    pub fn deny(pattern: impl Into<String>) -> Result<Self, HeaderRuleError> {
        Self::new(pattern, false)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_allow(&self) -> bool {
        self.allow
    }

    /// True if the rule's pattern matches all of `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Normalise a header line to `"Name: value"`.
///
/// Returns `None` for lines without a colon or with an empty name.
pub fn normalize_header(line: &str) -> Option<String> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(format!("{}: {}", name, value.trim()))
}

/// Normalise `headers` and apply `rules`.
pub fn filter_headers(headers: &[String], rules: &[HeaderRule]) -> Vec<String> {
    headers
        .iter()
        .filter_map(|line| normalize_header(line))
        .filter(|line| {
            let name = line.split_once(':').map_or(line.as_str(), |(n, _)| n);
            rules
                .iter()
                .find(|rule| rule.matches(name))
                .is_none_or(HeaderRule::is_allow)
        })
        .collect()
}
