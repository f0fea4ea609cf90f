//! Request restrictions.
//!
//! A restriction is a condition a request must satisfy for a handler to be
//! eligible. Static restrictions declare expected headers, search params,
//! and/or a body; computed restrictions run an arbitrary predicate over the
//! parsed request. However they are declared, restrictions AND together.
//!
//! Static matching is containment by default: every declared pair must be
//! present in the request's corresponding multimap and extra request pairs
//! are ignored. With `exact`, the request's multimap must equal the declared
//! one in cardinality and content.

use crate::http::{HttpHeaders, HttpRequest, SearchParams};
use std::fmt;
use std::sync::Arc;

/// A predicate over the parsed request. Errors are not swallowed: they
/// propagate out of the match operation so bugs in test code stay visible.
pub type ComputedRestriction =
    Arc<dyn Fn(&HttpRequest) -> Result<bool, anyhow::Error> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("computed restriction failed")]
    Predicate(#[source] anyhow::Error),
}

/// Declared header/search-param/body conditions, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct StaticRestriction {
    pub headers: Option<HttpHeaders>,
    pub search_params: Option<SearchParams>,
    pub body: Option<serde_json::Value>,
    /// When set, multimaps must match exactly and bodies must be fully equal.
    pub exact: bool,
}

impl StaticRestriction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HttpHeaders::new)
            .append(name, value);
        self
    }

    pub fn with_search_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params
            .get_or_insert_with(SearchParams::new)
            .append(name, value);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    fn matches_headers(&self, request: &HttpRequest) -> bool {
        match &self.headers {
            None => true,
            Some(declared) if self.exact => request.headers.matches_exactly(declared),
            Some(declared) => request.headers.contains_all(declared),
        }
    }

    fn matches_search_params(&self, request: &HttpRequest) -> bool {
        match &self.search_params {
            None => true,
            Some(declared) => {
                let actual = request.search_params();
                if self.exact {
                    actual.matches_exactly(declared)
                } else {
                    actual.contains_all(declared)
                }
            }
        }
    }

    fn matches_body(&self, request: &HttpRequest) -> bool {
        let Some(declared) = &self.body else {
            return true;
        };

        // Declared text bodies compare against the raw request body.
        if let serde_json::Value::String(expected) = declared {
            return request
                .body_text()
                .is_some_and(|actual| actual == *expected);
        }

        let Some(actual) = request.body_json() else {
            return false;
        };
        match (declared, &actual) {
            // Non-exact object bodies: every declared key deeply equal,
            // extra actual keys allowed.
            (serde_json::Value::Object(declared_map), serde_json::Value::Object(actual_map))
                if !self.exact =>
            {
                declared_map
                    .iter()
                    .all(|(key, value)| actual_map.get(key) == Some(value))
            }
            _ => *declared == actual,
        }
    }
}

/// A condition a request must satisfy for a handler to be eligible.
#[derive(Clone)]
pub enum Restriction {
    Static(StaticRestriction),
    Computed(ComputedRestriction),
}

impl Restriction {
    /// Computed restriction from an infallible predicate.
    pub fn computed<F>(predicate: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        Restriction::Computed(Arc::new(move |request| Ok(predicate(request))))
    }

    /// Computed restriction from a fallible predicate.
    pub fn computed_fallible<F>(predicate: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<bool, anyhow::Error> + Send + Sync + 'static,
    {
        Restriction::Computed(Arc::new(predicate))
    }

    /// Evaluate this restriction against a request. Predicate failures
    /// propagate; they are never treated as a non-match.
    pub fn matches(&self, request: &HttpRequest) -> Result<bool, MatchError> {
        match self {
            Restriction::Static(restriction) => Ok(restriction.matches_headers(request)
                && restriction.matches_search_params(request)
                && restriction.matches_body(request)),
            Restriction::Computed(predicate) => {
                predicate(request).map_err(MatchError::Predicate)
            }
        }
    }
}

impl From<StaticRestriction> for Restriction {
    fn from(restriction: StaticRestriction) -> Self {
        Restriction::Static(restriction)
    }
}

impl fmt::Debug for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Restriction::Static(restriction) => f.debug_tuple("Static").field(restriction).finish(),
            Restriction::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use serde_json::json;

    fn request_with_params(query: &str) -> HttpRequest {
        HttpRequest::new(Method::Post, format!("http://localhost/users?{query}"))
    }

    #[test]
    fn test_non_exact_search_params_allow_extras() {
        let restriction: Restriction = StaticRestriction::new()
            .with_search_param("name", "User")
            .into();

        assert!(restriction
            .matches(&request_with_params("name=User"))
            .unwrap());
        assert!(restriction
            .matches(&request_with_params("name=User&other=param"))
            .unwrap());
        assert!(!restriction
            .matches(&request_with_params("name=User%20other"))
            .unwrap());
        assert!(!restriction.matches(&request_with_params("")).unwrap());
    }

    #[test]
    fn test_exact_search_params_reject_extras() {
        let restriction: Restriction = StaticRestriction::new()
            .with_search_param("a", "1")
            .exact(true)
            .into();

        assert!(restriction.matches(&request_with_params("a=1")).unwrap());
        assert!(!restriction
            .matches(&request_with_params("a=1&b=2"))
            .unwrap());
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let restriction: Restriction = StaticRestriction::new()
            .with_header("Content-Type", "application/json")
            .into();

        let request = HttpRequest::new(Method::Post, "http://localhost/users")
            .with_header("CONTENT-TYPE", "application/json")
            .with_header("accept", "*/*");
        assert!(restriction.matches(&request).unwrap());

        let exact: Restriction = StaticRestriction::new()
            .with_header("content-type", "application/json")
            .exact(true)
            .into();
        assert!(!exact.matches(&request).unwrap());
    }

    #[test]
    fn test_body_subset_match_on_objects() {
        let restriction: Restriction = StaticRestriction::new()
            .with_body(json!({"name": "User"}))
            .into();

        let matching = HttpRequest::new(Method::Post, "http://localhost/users")
            .with_json_body(&json!({"name": "User", "age": 30}));
        assert!(restriction.matches(&matching).unwrap());

        let mismatching = HttpRequest::new(Method::Post, "http://localhost/users")
            .with_json_body(&json!({"name": "Other"}));
        assert!(!restriction.matches(&mismatching).unwrap());
    }

    #[test]
    fn test_exact_body_requires_full_equality() {
        let restriction: Restriction = StaticRestriction::new()
            .with_body(json!({"name": "User"}))
            .exact(true)
            .into();

        let exact = HttpRequest::new(Method::Post, "http://localhost/users")
            .with_json_body(&json!({"name": "User"}));
        assert!(restriction.matches(&exact).unwrap());

        let extra = HttpRequest::new(Method::Post, "http://localhost/users")
            .with_json_body(&json!({"name": "User", "age": 30}));
        assert!(!restriction.matches(&extra).unwrap());
    }

    #[test]
    fn test_text_body_requires_full_equality() {
        let restriction: Restriction = StaticRestriction::new().with_body(json!("exact text")).into();

        let matching =
            HttpRequest::new(Method::Post, "http://localhost/users").with_body("exact text");
        assert!(restriction.matches(&matching).unwrap());

        let partial =
            HttpRequest::new(Method::Post, "http://localhost/users").with_body("exact text plus");
        assert!(!restriction.matches(&partial).unwrap());
    }

    #[test]
    fn test_computed_restriction_runs_predicate() {
        let restriction = Restriction::computed(|request| request.search_params().get("admin").is_some());

        assert!(restriction
            .matches(&request_with_params("admin=true"))
            .unwrap());
        assert!(!restriction.matches(&request_with_params("")).unwrap());
    }

    #[test]
    fn test_computed_restriction_errors_propagate() {
        let restriction =
            Restriction::computed_fallible(|_| Err(anyhow::anyhow!("broken predicate")));

        let error = restriction
            .matches(&request_with_params(""))
            .expect_err("predicate error must propagate");
        assert!(matches!(error, MatchError::Predicate(_)));
    }
}
