//! Resource URI templates.
//!
//! Templates take the form `scheme://segment/{param}/...`. Each `{param}`
//! names a declared endpoint parameter; literal segments match exactly.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://(\{[A-Za-z_][A-Za-z0-9_]*\}|[^/{}]+)(/(\{[A-Za-z_][A-Za-z0-9_]*\}|[^/{}]+))*$")
            .expect("static regex")
    })
}

/// Invalid template error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource URI template '{template}': {message}")]
pub struct UriTemplateError {
    pub template: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed `scheme://seg/{param}` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    scheme: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    /// Parse and validate a template string.
    pub fn parse(raw: &str) -> Result<Self, UriTemplateError> {
        let err = |message: &str| UriTemplateError {
            template: raw.to_string(),
            message: message.to_string(),
        };

        if !template_pattern().is_match(raw) {
            return Err(err("must match scheme://segment/{param}/..."));
        }

        let (scheme, rest) = raw.split_once("://").ok_or_else(|| err("missing scheme"))?;
        let mut segments = Vec::new();
        for part in rest.split('/') {
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        let mut seen = Vec::new();
        for segment in &segments {
            if let Segment::Param(name) = segment {
                if seen.contains(&name.as_str()) {
                    return Err(err(&format!("duplicate template parameter '{}'", name)));
                }
                seen.push(name);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_string(),
            segments,
        })
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Template parameter names, in order of appearance.
    pub fn params(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Match a concrete URI against the template, extracting parameter
    /// values. Returns `None` when the URI does not fit.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let rest = uri.strip_prefix(&format!("{}://", self.scheme))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut extracted = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    extracted.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(extracted)
    }
}

impl std::fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for UriTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for UriTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UriTemplate::parse(&raw).map_err(serde::de::Error::custom)
    }
}
