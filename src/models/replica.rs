//! Replica templates
//!
//! An administrator configures templates such as `projects/${Project}/builds`.
//! At upload time the `${...}` tokens are replaced with the values of the
//! matching request headers, producing the path segments of a replica
//! directory.

use crate::error::{AppError, Result};
use crate::utils::path::secure_filename;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

static LITERAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("literal pattern is valid"));
static HEADER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\{([A-Za-z][A-Za-z0-9-]*[A-Za-z0-9])\}$").expect("header pattern is valid")
});

/// One `/`-separated part of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TemplateSegment {
    /// Used verbatim
    Literal(String),
    /// Replaced by the value of this header (name stored uppercase)
    Header(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

/// Outcome of substituting headers into a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateMatch {
    /// Every token resolved; `renamed` lists `(header, original, sanitized)`
    /// for values that had to be cleaned
    Matched {
        segments: Vec<String>,
        renamed: Vec<(String, String, String)>,
    },
    /// These headers were missing or had no usable value
    Partial { missing: Vec<String> },
}

impl ReplicaTemplate {
    /// Parse a template string
    ///
    /// Leading/trailing `/`, `.` and spaces are trimmed. Each segment must be
    /// an alphanumeric literal or a `${Header-Name}` token, and at least one
    /// token is required.
    pub fn parse(template: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            AppError::config_error(format!(
                "Invalid replica template '{}': {}. Expected alphanumeric directory names and '${{Header-Name}}' tokens",
                template, reason
            ))
        };

        let trimmed = template.trim_matches(|c| c == ' ' || c == '/' || c == '.');
        if trimmed.is_empty() {
            return Err(invalid("template is empty"));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('/') {
            if LITERAL_REGEX.is_match(part) {
                segments.push(TemplateSegment::Literal(part.to_string()));
            } else if let Some(captures) = HEADER_REGEX.captures(part) {
                let name = captures
                    .get(1)
                    .map(|m| m.as_str().to_ascii_uppercase())
                    .ok_or_else(|| invalid("malformed header token"))?;
                segments.push(TemplateSegment::Header(name));
            } else {
                return Err(invalid(&format!("segment '{}' is not allowed", part)));
            }
        }

        if !segments.iter().any(|s| matches!(s, TemplateSegment::Header(_))) {
            return Err(invalid("at least one '${Header-Name}' token is required"));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    /// Header names (uppercase) this template needs
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Header(name) => Some(name.as_str()),
            TemplateSegment::Literal(_) => None,
        })
    }

    /// Substitute header values
    ///
    /// `headers` must already be keyed by uppercase name. Values are passed
    /// through [`secure_filename`]; a value that sanitizes to nothing counts
    /// as missing.
    pub fn resolve(&self, headers: &HashMap<String, String>) -> TemplateMatch {
        let mut resolved = Vec::with_capacity(self.segments.len());
        let mut renamed = Vec::new();
        let mut missing = Vec::new();

        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(value) => resolved.push(value.clone()),
                TemplateSegment::Header(name) => {
                    let value = headers.get(name).map(String::as_str).unwrap_or("");
                    let secured = secure_filename(value);
                    if secured.is_empty() {
                        missing.push(name.clone());
                        continue;
                    }
                    if secured != value {
                        renamed.push((name.clone(), value.to_string(), secured.clone()));
                    }
                    resolved.push(secured);
                }
            }
        }

        if missing.is_empty() {
            TemplateMatch::Matched {
                segments: resolved,
                renamed,
            }
        } else {
            TemplateMatch::Partial { missing }
        }
    }
}

impl fmt::Display for ReplicaTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
