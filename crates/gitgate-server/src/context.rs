//! The request facts the git endpoints look at.

use axum::extract::Query;
use axum::http::{header, request::Parts, Method};
use std::collections::HashMap;

/// Method, repository-relative path, query, `Accept` and `Content-Length` of
/// one request, read once up front.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    accept: String,
    content_length: Option<u64>,
}

impl RequestContext {
    /// Captures the request head. `path` is the part after the repository
    /// name, e.g. `info/refs`.
    pub fn from_parts(parts: &Parts, path: impl Into<String>) -> Self {
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        // Several Accept headers are equivalent to one comma separated list.
        let accept = parts
            .headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");

        let content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());

        Self {
            method: parts.method.clone(),
            path: path.into().trim_start_matches('/').to_string(),
            query,
            accept,
            content_length,
        }
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path inside the repository, without a leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// All `Accept` values joined.
    pub fn accept(&self) -> &str {
        &self.accept
    }

    /// Declared body length, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}
