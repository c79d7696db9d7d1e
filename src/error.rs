//! Error types for the session broker.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use session_broker::{Error, Request, Result};
//!
//! async fn example(broker: &Broker) -> Result<()> {
//!     let response = broker.request(Request::new(7, b"ping".to_vec()))?.await?;
//!     println!("{} bytes", response.payload.len());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Transport`], [`Error::ProtocolViolation`], [`Error::ConnectTimeout`] |
//! | Authentication | [`Error::HandshakeRejected`], [`Error::HandshakeTimeout`], [`Error::Crypto`], [`Error::Storage`] |
//! | Request | [`Error::RequestTimeout`], [`Error::Cancelled`], [`Error::MaxRetriesExceeded`], [`Error::Rpc`], [`Error::Busy`] |
//! | Lifecycle | [`Error::BrokerClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{CorrelationId, EndpointId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Connection-level variants are consumed by the connection supervisor and
/// only reach callers through request-level variants.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when broker configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Socket, DNS or stream failure.
    ///
    /// Retried by the supervisor through the backoff path.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Malformed or unexpected server message.
    ///
    /// Closes the connection like a transport error, but may indicate a
    /// protocol version mismatch.
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    /// Transport connect did not complete in time.
    #[error("Connect to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Endpoint being connected.
        endpoint: EndpointId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Server refused the key exchange.
    #[error("Handshake rejected by {endpoint}: {reason}")]
    HandshakeRejected {
        /// Endpoint that refused.
        endpoint: EndpointId,
        /// Reason reported by the server.
        reason: String,
    },

    /// Key exchange did not complete within the per-attempt budget.
    #[error("Handshake with {endpoint} timed out after {attempts} attempt(s)")]
    HandshakeTimeout {
        /// Endpoint being negotiated with.
        endpoint: EndpointId,
        /// Attempts made.
        attempts: u32,
    },

    /// Crypto provider failure.
    #[error("Crypto error: {message}")]
    Crypto {
        /// Description of the failure.
        message: String,
    },

    /// Key storage failure.
    ///
    /// Fatal to the current handshake, never to the broker.
    #[error("Key storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response within the request's budget.
    ///
    /// The connection itself stays up.
    #[error("Request {id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request that timed out.
        id: CorrelationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Caller withdrew interest, or the broker shut down.
    #[error("Request cancelled")]
    Cancelled,

    /// Request was lost to connection failures too many times.
    #[error("Request {id} failed after {attempts} attempt(s)")]
    MaxRetriesExceeded {
        /// The request that gave up.
        id: CorrelationId,
        /// Transmissions made.
        attempts: u32,
    },

    /// Server reported an application-level error for a request.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code from the server.
        code: i32,
        /// Error message from the server.
        message: String,
    },

    /// Too many outstanding requests.
    #[error("Too many pending requests: {pending}/{max}")]
    Busy {
        /// Requests currently outstanding.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Broker has been shut down.
    #[error("Broker closed")]
    BrokerClosed,

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

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
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

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol violation error.
    #[inline]
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(endpoint: EndpointId, timeout_ms: u64) -> Self {
        Self::ConnectTimeout {
            endpoint,
            timeout_ms,
        }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(endpoint: EndpointId, reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            endpoint,
            reason: reason.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(endpoint: EndpointId, attempts: u32) -> Self {
        Self::HandshakeTimeout { endpoint, attempts }
    }

    /// Creates a crypto error.
    #[inline]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Creates a key storage error.
    #[inline]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(id: CorrelationId, timeout_ms: u64) -> Self {
        Self::RequestTimeout { id, timeout_ms }
    }

    /// Creates a max retries exceeded error.
    #[inline]
    pub fn max_retries_exceeded(id: CorrelationId, attempts: u32) -> Self {
        Self::MaxRetriesExceeded { id, attempts }
    }

    /// Creates an RPC error.
    #[inline]
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
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
            Self::ConnectTimeout { .. } | Self::HandshakeTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection-level error.
    ///
    /// Connection-level errors are recovered by reconnecting.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ProtocolViolation { .. }
                | Self::ConnectTimeout { .. }
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error ends a single request for good.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. }
                | Self::Cancelled
                | Self::MaxRetriesExceeded { .. }
                | Self::Rpc { .. }
                | Self::Busy { .. }
                | Self::BrokerClosed
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
        let err = Error::transport("connection refused");
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("no endpoints");
        assert_eq!(err.to_string(), "Configuration error: no endpoints");
    }

    #[test]
    fn test_request_timeout_display() {
        let err = Error::request_timeout(CorrelationId::new(9), 5000);
        assert_eq!(err.to_string(), "Request #9 timed out after 5000ms");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(CorrelationId::new(1), 1000);
        let other_err = Error::transport("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::transport("x").is_connection_error());
        assert!(Error::protocol_violation("x").is_connection_error());
        assert!(Error::connect_timeout(EndpointId::new("ws://a.example/"), 10).is_connection_error());
        assert!(!Error::Cancelled.is_connection_error());
        assert!(!Error::config("x").is_connection_error());
    }

    #[test]
    fn test_is_terminal() {
        assert!(Error::Cancelled.is_terminal());
        assert!(Error::max_retries_exceeded(CorrelationId::new(1), 3).is_terminal());
        assert!(Error::rpc(400, "bad").is_terminal());
        assert!(!Error::transport("x").is_terminal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
