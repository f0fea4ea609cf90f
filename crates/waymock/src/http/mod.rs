//! Neutral HTTP message values.
//!
//! Requests and responses are represented once, at the system boundary, as
//! plain values (method, URL, header multimap, body bytes) and used everywhere
//! internally. This keeps the matching engine and the relay independent of any
//! particular runtime's request type.

mod headers;
mod search_params;
pub mod serialized;

pub use headers::HttpHeaders;
pub use search_params::SearchParams;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every method the mocking engine and the relay route on.
pub const HTTP_METHODS: [Method; 7] = [
    Method::Get,
    Method::Post,
    Method::Patch,
    Method::Put,
    Method::Delete,
    Method::Head,
    Method::Options,
];

/// HTTP method, restricted to the set the engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Stable index into per-method tables.
    pub(crate) fn index(self) -> usize {
        HTTP_METHODS
            .iter()
            .position(|method| *method == self)
            .expect("method missing from HTTP_METHODS")
    }

    /// All supported methods, comma-joined (`access-control-allow-methods`).
    pub fn comma_joined() -> &'static str {
        "GET,POST,PATCH,PUT,DELETE,HEAD,OPTIONS"
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method: '{0}'")]
pub struct UnsupportedMethod(pub String);

impl FromStr for Method {
    type Err = UnsupportedMethod;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        HTTP_METHODS
            .iter()
            .copied()
            .find(|method| method.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnsupportedMethod(value.to_string()))
    }
}

/// A request as seen by restrictions, response factories, and the relay.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL, including any query string.
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HttpHeaders::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json_body(mut self, body: &serde_json::Value) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }

    /// Path component of the URL.
    pub fn path(&self) -> String {
        match self.url.parse::<hyper::Uri>() {
            Ok(uri) => uri.path().to_string(),
            Err(_) => self.url.clone(),
        }
    }

    /// Search params parsed from the URL's query string.
    pub fn search_params(&self) -> SearchParams {
        self.url
            .parse::<hyper::Uri>()
            .ok()
            .and_then(|uri| uri.query().map(SearchParams::parse))
            .unwrap_or_default()
    }

    /// Body as UTF-8 text, when it is valid UTF-8.
    pub fn body_text(&self) -> Option<String> {
        std::str::from_utf8(&self.body).ok().map(str::to_string)
    }

    /// Body parsed as JSON, when it parses.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// A concrete response ready to hand back to a caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Bytes,
}

impl HttpResponse {
    /// Canonical reason phrase for the status, e.g. `OK` for 200.
    pub fn status_text(&self) -> &'static str {
        hyper::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("")
    }
}

/// A declared mock response: what a handler answers with once it matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDeclaration {
    pub status: u16,
    #[serde(default)]
    pub headers: HttpHeaders,
    /// String bodies are sent verbatim; any other JSON value is serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl ResponseDeclaration {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HttpHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Materialize the declaration into a concrete response.
    pub fn into_response(self) -> HttpResponse {
        let body = match self.body {
            Some(serde_json::Value::String(text)) => Bytes::from(text),
            Some(value) => Bytes::from(value.to_string()),
            None => Bytes::new(),
        };
        HttpResponse {
            status: self.status,
            headers: self.headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("options".parse::<Method>().unwrap(), Method::Options);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_request_url_accessors() {
        let request = HttpRequest::new(Method::Get, "http://localhost:3000/users/42?page=1");
        assert_eq!(request.path(), "/users/42");
        assert_eq!(request.search_params().get("page"), Some("1"));
    }

    #[test]
    fn test_request_body_views() {
        let request = HttpRequest::new(Method::Post, "http://localhost/users")
            .with_json_body(&json!({"name": "User"}));

        assert_eq!(request.body_json(), Some(json!({"name": "User"})));
        assert!(request.body_text().unwrap().contains("name"));
    }

    #[test]
    fn test_declaration_string_body_is_sent_verbatim() {
        let response = ResponseDeclaration::new(200)
            .with_body(json!("plain text"))
            .into_response();
        assert_eq!(response.body, Bytes::from("plain text"));

        let json_response = ResponseDeclaration::new(200)
            .with_body(json!({"ok": true}))
            .into_response();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&json_response.body).unwrap(),
            json!({"ok": true})
        );
    }

    #[test]
    fn test_status_text() {
        let response = ResponseDeclaration::new(204).into_response();
        assert_eq!(response.status_text(), "No Content");
    }
}
