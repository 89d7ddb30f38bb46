//! # Path Patterns
//!
//! Segment-based path patterns shared by the route table and the security chain
//! list:
//!
//! - literal segments (`/api/users`) match case-sensitively,
//! - `*` matches exactly one segment,
//! - a trailing `**` matches zero or more segments, so `/api/users/**` matches
//!   `/api/users`, `/api/users/` and `/api/users/42/history`.
//!
//! Empty segments are ignored on both sides, which makes `/api//users` and
//! `/api/users/` equivalent to `/api/users` for matching purposes.

use crate::core::error::{GatewayError, GatewayResult};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

/// A parsed path pattern such as `/api/users/**`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern, rejecting relative patterns and misplaced wildcards
    pub fn parse(pattern: &str) -> GatewayResult<Self> {
        if !pattern.starts_with('/') {
            return Err(GatewayError::config(format!(
                "Path pattern '{}' must start with '/'",
                pattern
            )));
        }

        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" if index == last => Segment::Rest,
                "**" => {
                    return Err(GatewayError::config(format!(
                        "Path pattern '{}' may only use '**' as its last segment",
                        pattern
                    )))
                }
                "*" => Segment::Single,
                literal if literal.contains('*') => {
                    return Err(GatewayError::config(format!(
                        "Path pattern '{}' mixes wildcards with literal text in '{}'",
                        pattern, literal
                    )))
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Test whether `path` (without query string) matches this pattern
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/').filter(|s| !s.is_empty());

        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match parts.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }

    /// The pattern as it was written in configuration
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for PathPattern {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Returns true if any of the patterns matches `path`
pub fn any_matches(patterns: &[PathPattern], path: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(path))
}
