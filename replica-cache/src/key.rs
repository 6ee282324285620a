//! Cache key derivation.
//!
//! A key is the request path plus the raw query string, with no
//! normalization: case, parameter order, and percent-encoding are all
//! significant. `/w?a=1&b=2` and `/w?b=2&a=1` are cached independently.

use replica_core::HttpRequest;
use std::fmt;

/// Key under which a response snapshot is stored.
///
/// Equality and hashing use the path and query separately, so two requests
/// that differ in either component never share an entry. The rendered form
/// is `path` or `path_query`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    path: String,
    query: Option<String>,
}

impl CacheKey {
    pub fn new(path: impl Into<String>, query: Option<impl Into<String>>) -> Self {
        Self {
            path: path.into(),
            query: query.map(Into::into),
        }
    }

    pub fn from_request(request: &HttpRequest) -> Self {
        Self {
            path: request.path.clone(),
            query: request.query.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// `path`, or `path + "_" + query` when a query string is present.
    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(query) => write!(f, "{}_{}", self.path, query),
            None => f.write_str(&self.path),
        }
    }
}
