//! XRPC wire types shared by client and server: request/response payloads,
//! the error body, well-known error names, and the subscription frame codec.
//!
//! # Framing
//!
//! ```text
//! HTTP   GET  /xrpc/<nsid>?<params>           query
//!        POST /xrpc/<nsid>?<params>  <body>   procedure
//!        GET  /xrpc/<nsid>?<params>  (ws)     subscription
//!
//! error  4xx/5xx  {"error": "<Name>", "message": "<text>"}
//! frame  CBOR(header) ++ CBOR(payload)
//! ```

pub mod frame;

use serde::{Deserialize, Serialize};
use xr_domain::Error;

pub use frame::{decode_frame, encode_frame, Frame, FrameError, FrameHeader, OP_ERROR, OP_MESSAGE};

/// Content type of structured bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// URL path prefix every method is served under.
pub const XRPC_PATH: &str = "/xrpc";

// ── Well-known error names ───────────────────────────────────────────

pub const INVALID_REQUEST: &str = "InvalidRequest";
pub const METHOD_NOT_IMPLEMENTED: &str = "MethodNotImplemented";
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const AUTHENTICATION_REQUIRED: &str = "AuthenticationRequired";
pub const EXPIRED_TOKEN: &str = "ExpiredToken";
pub const INVALID_TOKEN: &str = "InvalidToken";

/// Error names that mean "your credentials are no good".
pub const TOKEN_ERRORS: &[&str] = &[
    "AccountNotFound",
    AUTHENTICATION_REQUIRED,
    EXPIRED_TOKEN,
    INVALID_TOKEN,
    "TokenRequired",
];

pub fn is_token_error(name: &str) -> bool {
    TOKEN_ERRORS.contains(&name)
}

/// A request or response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    /// Opaque bytes with the content type they were sent as.
    Binary { content_type: String, bytes: Vec<u8> },
}

impl Payload {
    pub fn binary(content_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Binary {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::Json(_) => JSON_CONTENT_TYPE,
            Self::Binary { content_type, .. } => content_type,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Binary { .. } => None,
        }
    }

    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Binary { .. } => None,
        }
    }

    /// Serialized body bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
            Self::Binary { bytes, .. } => bytes.clone(),
        }
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            Self::Json(_) => "json".into(),
            Self::Binary { content_type, bytes } => format!("{} bytes {content_type}", bytes.len()),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// `{"error": name, "message": text}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
        }
    }

    /// Parses an error response body.  Anything without a string `error`
    /// field is not an error body.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Converts a received error into the shared taxonomy.  Token errors and
    /// HTTP 401 become [`Error::Authentication`].
    pub fn into_error(self, status: Option<u16>) -> Error {
        if is_token_error(&self.error) || status == Some(401) {
            Error::Authentication {
                name: self.error,
                message: self.message,
            }
        } else {
            Error::Protocol {
                name: self.error,
                message: self.message,
                status,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_omits_missing_message() {
        let body = ErrorBody {
            error: "RepoNotFound".into(),
            message: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"RepoNotFound"}"#);
    }

    #[test]
    fn token_errors_become_authentication() {
        let e = ErrorBody::new(EXPIRED_TOKEN, "expired").into_error(Some(400));
        assert!(e.is_authentication());
        let e = ErrorBody::new("Whatever", "no").into_error(Some(401));
        assert!(e.is_authentication());
        let e = ErrorBody::new("RepoNotFound", "gone").into_error(Some(400));
        assert_eq!(e.wire_name(), Some("RepoNotFound"));
        assert!(!e.is_authentication());
    }

    #[test]
    fn parse_rejects_non_error_json() {
        assert!(ErrorBody::parse(br#"{"ok": true}"#).is_none());
        assert!(ErrorBody::parse(b"not json").is_none());
        assert_eq!(
            ErrorBody::parse(br#"{"error":"X","message":"y"}"#),
            Some(ErrorBody::new("X", "y"))
        );
    }

    #[test]
    fn binary_payload_keeps_content_type() {
        let p = Payload::binary("image/png", vec![1, 2, 3]);
        assert_eq!(p.content_type(), "image/png");
        assert_eq!(p.to_bytes(), vec![1, 2, 3]);
        assert_eq!(p.describe(), "3 bytes image/png");
    }
}
