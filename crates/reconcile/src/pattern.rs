//! Wildcard patterns for inclusion/exclusion lists
//!
//! `*` matches any run of characters and `?` a single character. Matching is
//! anchored and case-insensitive, so `*xbox*` matches `Microsoft.XboxApp`.

use crate::error::DiffError;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(raw: &str) -> Result<Self, DiffError> {
        let body = regex::escape(raw).replace(r"\*", ".*").replace(r"\?", ".");
        let regex = Regex::new(&format!("(?i)^{body}$")).map_err(|source| {
            DiffError::InvalidPattern {
                pattern: raw.to_string(),
                source,
            }
        })?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Ordered list of patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new(raw: &[String]) -> Result<Self, DiffError> {
        let patterns = raw
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First pattern matching any of `candidates`
    pub fn first_match(&self, candidates: &[&str]) -> Option<&Pattern> {
        self.patterns
            .iter()
            .find(|p| candidates.iter().any(|c| p.matches(c)))
    }
}
