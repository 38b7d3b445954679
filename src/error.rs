//! Error types for the frame channel.
//!
//! This module defines the errors surfaced to application code. Protocol
//! filters (origin, malformed, replay) never produce an [`Error`]; they are
//! handled inside the channel as a [`Rejection`](crate::channel::Rejection).
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use frame_channel::{Host, Result};
//!
//! async fn example(host: &Host) -> Result<()> {
//!     let status = host.request("terminal.status", serde_json::json!({})).await?;
//!     println!("{status}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidOrigin`] |
//! | Handshake | [`Error::HandshakeRejected`], [`Error::HandshakeTimeout`] |
//! | Requests | [`Error::RequestTimeout`], [`Error::TooManyPendingRequests`], [`Error::Remote`], [`Error::UnknownRequest`] |
//! | Channel | [`Error::ChannelClosed`], [`Error::NotConnected`], [`Error::Connection`], [`Error::Protocol`] |
//! | Handlers | [`Error::Handler`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::channel::ChannelState;
use crate::identifiers::MessageId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by the config builders when a required value is missing or
    /// out of range.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Origin string cannot be used as an exact target.
    ///
    /// Wildcards (`*`), opaque origins (`null`) and unparsable strings are
    /// refused.
    #[error("Invalid origin '{origin}': {reason}")]
    InvalidOrigin {
        /// The rejected origin string.
        origin: String,
        /// Why it was rejected.
        reason: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// The peer explicitly refused the handshake, or capabilities mismatch.
    #[error("Handshake rejected: {reason}")]
    HandshakeRejected {
        /// Reason reported by the peer or detected locally.
        reason: String,
    },

    /// No handshake completion within the configured bound.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A pending request's deadline passed without a response.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many requests are awaiting responses.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPendingRequests {
        /// Requests currently pending.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    /// The peer answered the request with an error response.
    #[error("Remote error [{code}]: {message}")]
    Remote {
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// `respond` was called for a request that is not awaiting an answer.
    #[error("Unknown inbound request: {request_id}")]
    UnknownRequest {
        /// The request ID passed to `respond`.
        request_id: MessageId,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The channel transitioned to CLOSED while the operation was pending.
    #[error("Channel closed")]
    ChannelClosed,

    /// The channel is not in a state that accepts application traffic.
    #[error("Channel not connected (state: {state})")]
    NotConnected {
        /// State at the time of the call.
        state: ChannelState,
    },

    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Handler Errors
    // ========================================================================
    /// A dispatcher handler reported failure.
    #[error("Handler error: {message}")]
    Handler {
        /// Description reported by the handler.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid origin error.
    #[inline]
    pub fn invalid_origin(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOrigin {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            reason: reason.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: MessageId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(state: ChannelState) -> Self {
        Self::NotConnected { state }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this error ended the handshake attempt.
    #[inline]
    #[must_use]
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            Self::HandshakeRejected { .. } | Self::HandshakeTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ChannelClosed
                | Self::NotConnected { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry; retry itself is caller policy.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::TooManyPendingRequests { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::handshake_rejected("credential format");
        assert_eq!(err.to_string(), "Handshake rejected: credential format");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing credential");
        assert_eq!(err.to_string(), "Configuration error: missing credential");
    }

    #[test]
    fn test_not_connected_display() {
        let err = Error::not_connected(ChannelState::Handshaking);
        assert_eq!(err.to_string(), "Channel not connected (state: HANDSHAKING)");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::handshake_timeout(10_000);
        let request_err = Error::request_timeout(MessageId::from("r1"), 500);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(request_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_handshake_failure() {
        assert!(Error::handshake_rejected("x").is_handshake_failure());
        assert!(Error::handshake_timeout(1).is_handshake_failure());
        assert!(!Error::ChannelClosed.is_handshake_failure());
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let closed_err = Error::ChannelClosed;
        let other_err = Error::config("test");

        assert!(conn_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        let timeout_err = Error::request_timeout(MessageId::from("r1"), 1000);
        let config_err = Error::config("test");

        assert!(timeout_err.is_recoverable());
        assert!(!config_err.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "socket gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
