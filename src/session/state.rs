//! Connection and network state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::time::Instant;

use crate::error::Error;
use crate::transport::Endpoint;

// ============================================================================
// FailureKind
// ============================================================================

/// Category of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Socket, DNS or stream failure.
    Transport,
    /// Malformed or unexpected server message.
    ProtocolViolation,
    /// Server refused the key exchange.
    HandshakeRejected,
    /// Connect, handshake or session open took too long.
    Timeout,
    /// Key could not be persisted.
    Storage,
    /// Crypto provider failure.
    Crypto,
}

/// Why the connection entered [`ConnectionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// Category.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

impl From<&Error> for FailureReason {
    fn from(error: &Error) -> Self {
        let kind = match error {
            Error::ProtocolViolation { .. } | Error::Json(_) => FailureKind::ProtocolViolation,
            Error::HandshakeRejected { .. } => FailureKind::HandshakeRejected,
            Error::ConnectTimeout { .. }
            | Error::HandshakeTimeout { .. }
            | Error::RequestTimeout { .. } => FailureKind::Timeout,
            Error::Storage { .. } => FailureKind::Storage,
            Error::Crypto { .. } => FailureKind::Crypto,
            _ => FailureKind::Transport,
        };

        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// State of the broker's single logical connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no attempt scheduled by failure.
    #[default]
    Disconnected,
    /// Dialing, or waiting for the server to accept a cached key.
    Connecting,
    /// Negotiating a new auth key.
    HandshakingAuth,
    /// Session open; application traffic flows.
    Authenticated {
        /// Endpoint of the session.
        endpoint: Endpoint,
        /// Server salt for the session.
        salt: u64,
    },
    /// Last attempt failed; next attempt not before `backoff_until`.
    Failed {
        /// What went wrong.
        reason: FailureReason,
        /// End of the backoff window.
        backoff_until: Instant,
    },
}

impl ConnectionState {
    /// Returns `true` if application traffic may be sent.
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// Returns `true` while dialing or handshaking.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::HandshakingAuth)
    }

    /// Short state name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::HandshakingAuth => "handshaking",
            Self::Authenticated { .. } => "authenticated",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated { endpoint, .. } => write!(f, "authenticated({endpoint})"),
            Self::Failed { reason, .. } => write!(f, "failed({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// NetworkState
// ============================================================================

/// Class of the active network transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportClass {
    /// Wi-Fi.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Wired.
    Ethernet,
    /// Anything else (VPN, unknown).
    Other,
}

/// Connectivity as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkState {
    /// Platform has not reported yet.
    #[default]
    Unknown,
    /// No connectivity.
    Offline,
    /// Connected over a transport.
    Connected(TransportClass),
}

impl NetworkState {
    /// Returns `true` for [`NetworkState::Offline`].
    #[inline]
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::EndpointId;

    #[test]
    fn test_failure_reason_classification() {
        let reason = FailureReason::from(&Error::protocol_violation("bad frame"));
        assert_eq!(reason.kind, FailureKind::ProtocolViolation);

        let reason = FailureReason::from(&Error::handshake_rejected(EndpointId::new("a"), "no"));
        assert_eq!(reason.kind, FailureKind::HandshakeRejected);

        let reason = FailureReason::from(&Error::transport("reset"));
        assert_eq!(reason.kind, FailureKind::Transport);
        assert!(reason.message.contains("reset"));
    }

    #[test]
    fn test_state_predicates() {
        let endpoint = Endpoint::parse("ws://a.example").expect("valid");
        let state = ConnectionState::Authenticated { endpoint, salt: 1 };
        assert!(state.is_authenticated());
        assert!(!state.is_connecting());
        assert!(ConnectionState::HandshakingAuth.is_connecting());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        let endpoint = Endpoint::parse("ws://a.example").expect("valid");
        let state = ConnectionState::Authenticated { endpoint, salt: 0 };
        assert_eq!(state.to_string(), "authenticated(ws://a.example/)");
    }
}
