//! Wire representation of requests and responses.
//!
//! The control channel carries whole HTTP messages between the relay and the
//! worker that owns the matching route. Bodies travel as UTF-8 text when they
//! are valid UTF-8 and base64-encoded bytes otherwise.

use super::{HttpHeaders, HttpRequest, HttpResponse, Method};
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Body payload on the wire: text or base64-encoded binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum SerializedBody {
    Text { text: String },
    Binary { base64: String },
}

impl SerializedBody {
    fn from_bytes(bytes: &Bytes) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Some(SerializedBody::Text {
                text: text.to_string(),
            }),
            Err(_) => Some(SerializedBody::Binary {
                base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        }
    }

    fn into_bytes(self) -> Result<Bytes, WireError> {
        match self {
            SerializedBody::Text { text } => Ok(Bytes::from(text)),
            SerializedBody::Binary { base64 } => base64::engine::general_purpose::STANDARD
                .decode(&base64)
                .map(Bytes::from)
                .map_err(|source| WireError::InvalidBase64 { source }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid base64 body")]
    InvalidBase64 { source: base64::DecodeError },
}

/// A request serialized for a `responses/create` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRequest {
    pub method: Method,
    pub url: String,
    /// Ordered `(name, value)` pairs; names are lowercased.
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<SerializedBody>,
}

impl SerializedRequest {
    pub fn from_request(request: &HttpRequest) -> Self {
        Self {
            method: request.method,
            url: request.url.clone(),
            headers: request
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: SerializedBody::from_bytes(&request.body),
        }
    }

    pub fn into_request(self) -> Result<HttpRequest, WireError> {
        let body = match self.body {
            Some(body) => body.into_bytes()?,
            None => Bytes::new(),
        };
        Ok(HttpRequest {
            method: self.method,
            url: self.url,
            headers: self.headers.into_iter().collect::<HttpHeaders>(),
            body,
        })
    }
}

/// A response serialized for a `responses/create` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<SerializedBody>,
}

impl SerializedResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text().to_string(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: SerializedBody::from_bytes(&response.body),
        }
    }

    pub fn into_response(self) -> Result<HttpResponse, WireError> {
        let body = match self.body {
            Some(body) => body.into_bytes()?,
            None => Bytes::new(),
        };
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers.into_iter().collect::<HttpHeaders>(),
            body,
        })
    }
}
