//! Path pattern table.
//!
//! # Responsibilities
//! - Compile path patterns into segment matchers
//! - Look up the best entry for a method and path
//! - Capture `:param` and trailing `*rest` segments
//!
//! # Design Decisions
//! - Path matching is case-sensitive, trailing slashes are ignored
//! - Static segments beat parameters, parameters beat wildcards
//! - No regex to guarantee O(n) matching per pattern

use std::collections::HashMap;

use axum::http::Method;

use crate::routing::RouteError;

/// Parameters captured from the path, keyed by name.
pub type Params = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

/// A compiled path pattern such as `/users/:id/*rest`.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        if !raw.starts_with('/') {
            return Err(invalid("pattern must start with '/'"));
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("parameter without a name"));
                }
                Segment::Param(name.to_string())
            } else if let Some(name) = part.strip_prefix('*') {
                if i + 1 != parts.len() {
                    return Err(invalid("wildcard must be the last segment"));
                }
                Segment::Wildcard(name.to_string())
            } else {
                Segment::Static(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Two patterns are equivalent if they match exactly the same paths.
    fn equivalent(&self, other: &Pattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Static(a), Segment::Static(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    (Segment::Wildcard(_), Segment::Wildcard(_)) => true,
                    _ => false,
                })
    }

    /// Ordering key: more static segments first, wildcards last.
    fn specificity(&self) -> (bool, usize, usize) {
        let statics = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Static(_)))
            .count();
        let has_wildcard = matches!(self.segments.last(), Some(Segment::Wildcard(_)));
        (!has_wildcard, self.segments.len(), statics)
    }

    fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = Params::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Static(expected) => {
                    if parts.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
                Segment::Wildcard(name) => {
                    if !name.is_empty() {
                        params.insert(name.clone(), parts[i.min(parts.len())..].join("/"));
                    }
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug)]
struct Entry<T> {
    pattern: Pattern,
    value: T,
}

/// Immutable-after-setup table of patterns per method.
#[derive(Debug)]
pub struct RouteTable<T> {
    methods: HashMap<Method, Vec<Entry<T>>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<T> RouteTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under a method and pattern.
    pub fn insert(&mut self, method: Method, pattern: &str, value: T) -> Result<(), RouteError> {
        let pattern = Pattern::parse(pattern)?;
        let entries = self.methods.entry(method.clone()).or_default();

        if entries.iter().any(|e| e.pattern.equivalent(&pattern)) {
            return Err(RouteError::Conflict {
                method,
                pattern: pattern.raw,
            });
        }

        // Stable position: after every entry at least as specific
        let key = pattern.specificity();
        let position = entries
            .iter()
            .position(|e| e.pattern.specificity() < key)
            .unwrap_or(entries.len());
        entries.insert(position, Entry { pattern, value });
        Ok(())
    }

    /// Find the most specific entry matching the method and path.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(&T, &str, Params)> {
        self.methods.get(method)?.iter().find_map(|entry| {
            entry
                .pattern
                .matches(path)
                .map(|params| (&entry.value, entry.pattern.as_str(), params))
        })
    }

    /// Number of registered entries across all methods.
    pub fn len(&self) -> usize {
        self.methods.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
