//! Request and Response payloads.
//!
//! REQUEST messages carry a [`RequestPayload`]; the peer answers with a
//! RESPONSE whose envelope `id` equals the request's and whose payload is a
//! [`ResponsePayload`].

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// RequestPayload
// ============================================================================

/// Body of a REQUEST message.
///
/// # Format
///
/// ```json
/// { "kind": "insights.sentiment", "body": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Request type, also the dispatcher topic on the receiving side.
    pub kind: String,

    /// Request-specific data.
    #[serde(default)]
    pub body: Value,
}

impl RequestPayload {
    /// Creates a request payload.
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, body: Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }
}

// ============================================================================
// ResponsePayload
// ============================================================================

/// Body of a RESPONSE message.
///
/// # Format
///
/// Success:
/// ```json
/// { "status": "success", "result": { ... } }
/// ```
///
/// Error:
/// ```json
/// { "status": "error", "error": { "code": "unavailable", "message": "..." } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Outcome discriminator.
    pub status: ResponseStatus,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error details (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponsePayload {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(error: ResponseError) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the peer answered with an error.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            ResponseStatus::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseStatus::Error => {
                let error = self
                    .error
                    .unwrap_or_else(|| ResponseError::new("unknown", "unknown error"));
                Err(Error::remote(error.code, error.message))
            }
        }
    }
}

impl From<std::result::Result<Value, ResponseError>> for ResponsePayload {
    fn from(outcome: std::result::Result<Value, ResponseError>) -> Self {
        match outcome {
            Ok(result) => Self::success(result),
            Err(error) => Self::failure(error),
        }
    }
}

// ============================================================================
// ResponseStatus
// ============================================================================

/// Response status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// ResponseError
// ============================================================================

/// Error body a responder returns instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl ResponseError {
    /// Code sent when no handler is subscribed to a request's kind.
    pub const UNHANDLED_REQUEST: &'static str = "unhandled_request";

    /// Code sent when every handler for a request failed.
    pub const HANDLER_FAILED: &'static str = "handler_failed";

    /// Creates a response error.
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
