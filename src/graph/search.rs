//! Wildcard name search over the asset index.
//!
//! Patterns use `*` (any run of characters) and `?` (one character) and are
//! matched case-insensitively against the asset name. A pattern with neither
//! wildcard matches as a substring.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{RefgraphError, Result};
use crate::graph::NodeRef;

/// One asset returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMatch {
    pub name: String,
    pub path: NodeRef,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Compiled name pattern plus an optional class filter.
#[derive(Debug, Clone)]
pub struct AssetQuery {
    pattern: String,
    matcher: Regex,
    kind: Option<String>,
}

impl AssetQuery {
    /// Compile `pattern`. An empty `kind` means no class filter.
    pub fn new(pattern: &str, kind: Option<&str>) -> Result<Self> {
        let pattern = normalize_pattern(pattern);
        let matcher = RegexBuilder::new(&wildcard_to_regex(&pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| RefgraphError::InvalidInput(format!("bad pattern '{}': {}", pattern, e)))?;
        let kind = kind
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);
        Ok(Self { pattern, matcher, kind })
    }

    /// The pattern actually matched, after wrapping bare text in `*`
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Class filter: exact or substring, ignoring case. `Blueprint` also
    /// matches `AnimBlueprint`.
    pub fn matches_kind(&self, kind: &str) -> bool {
        match &self.kind {
            None => true,
            Some(wanted) => kind.to_lowercase().contains(wanted.as_str()),
        }
    }

    pub fn matches(&self, name: &str, kind: &str) -> bool {
        self.matches_kind(kind) && self.matcher.is_match(name)
    }
}

/// Bare text becomes `*text*`; an empty pattern matches everything.
fn normalize_pattern(pattern: &str) -> String {
    let pattern = pattern.trim();
    if pattern.contains('*') || pattern.contains('?') {
        pattern.to_string()
    } else {
        format!("*{}*", pattern)
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}
