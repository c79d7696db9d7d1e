//! Wire frames exchanged with a server endpoint.
//!
//! Frames follow `module.methodName` naming and are carried as JSON inside a
//! versioned envelope. Byte payloads are base64 encoded.
//!
//! | Frame | Direction | Layer |
//! |-------|-----------|-------|
//! | `handshake.init` / `handshake.reply` | both | plain |
//! | `handshake.rejected` | server → client | plain |
//! | `session.hello` / `session.welcome` | client → server / server → client | plain |
//! | `session.unknownKey` | server → client | plain |
//! | `session.sealed` | both | carries a sealed [`Message`] |
//!
//! Application traffic ([`Message`]) only ever travels sealed with the auth
//! key of the connection.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, KeyId, ServerSessionId};

// ============================================================================
// Constants
// ============================================================================

/// Envelope version understood by this client.
pub const PROTOCOL_VERSION: u32 = 1;

/// Major version of the API layer announced in `session.hello`.
pub const API_MAJOR_VERSION: u32 = 1;

/// Minor version of the API layer announced in `session.hello`.
pub const API_MINOR_VERSION: u32 = 0;

// ============================================================================
// Frame
// ============================================================================

/// A plain frame on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Frame {
    /// Opening (or follow-up) key exchange message from the client.
    #[serde(rename = "handshake.init")]
    HandshakeInit {
        /// Opaque crypto provider output.
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },

    /// Key exchange message from the server.
    #[serde(rename = "handshake.reply")]
    HandshakeReply {
        /// Opaque server output for the crypto provider.
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },

    /// Server refuses the key exchange.
    #[serde(rename = "handshake.rejected")]
    HandshakeRejected {
        /// Reason reported by the server.
        reason: String,
    },

    /// Client announces the key it will seal traffic with.
    #[serde(rename = "session.hello")]
    Hello {
        /// Key the client holds.
        #[serde(rename = "keyId")]
        key_id: KeyId,
        /// API layer major version.
        #[serde(rename = "apiMajor")]
        api_major: u32,
        /// API layer minor version.
        #[serde(rename = "apiMinor")]
        api_minor: u32,
    },

    /// Server accepts the key and opens a session.
    #[serde(rename = "session.welcome")]
    Welcome {
        /// Server salt for this session.
        salt: u64,
        /// Server-side session id.
        session: ServerSessionId,
    },

    /// Server does not know the announced key.
    #[serde(rename = "session.unknownKey")]
    UnknownAuthKey {
        /// The key id the server refused.
        #[serde(rename = "keyId")]
        key_id: KeyId,
    },

    /// A sealed [`Message`].
    #[serde(rename = "session.sealed")]
    Sealed {
        /// Key used to seal.
        #[serde(rename = "keyId")]
        key_id: KeyId,
        /// Ciphertext.
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Frame {
    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandshakeInit { .. } => "handshake.init",
            Self::HandshakeReply { .. } => "handshake.reply",
            Self::HandshakeRejected { .. } => "handshake.rejected",
            Self::Hello { .. } => "session.hello",
            Self::Welcome { .. } => "session.welcome",
            Self::UnknownAuthKey { .. } => "session.unknownKey",
            Self::Sealed { .. } => "session.sealed",
        }
    }

    /// Encodes the frame inside a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = EnvelopeRef {
            version: PROTOCOL_VERSION,
            frame: self,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decodes a frame, rejecting unknown envelope versions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the bytes are not a valid
    /// envelope or carry a different version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::protocol_violation(format!("malformed frame: {e}")))?;

        if envelope.version != PROTOCOL_VERSION {
            return Err(Error::protocol_violation(format!(
                "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
                envelope.version
            )));
        }

        Ok(envelope.frame)
    }
}

// ============================================================================
// Message
// ============================================================================

/// Application-layer message carried inside [`Frame::Sealed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Message {
    /// Request from client.
    #[serde(rename = "rpc.request")]
    Rpc {
        /// Correlation id.
        id: CorrelationId,
        /// Payload type.
        #[serde(rename = "typeTag")]
        type_tag: u32,
        /// Payload.
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },

    /// Successful response from server.
    #[serde(rename = "rpc.result")]
    RpcResult {
        /// Correlation id of the request.
        id: CorrelationId,
        /// Payload type.
        #[serde(rename = "typeTag")]
        type_tag: u32,
        /// Payload.
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },

    /// Error response from server.
    #[serde(rename = "rpc.error")]
    RpcError {
        /// Correlation id of the request.
        id: CorrelationId,
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Server push.
    #[serde(rename = "updates.push")]
    Push {
        /// Payload type.
        #[serde(rename = "typeTag")]
        type_tag: u32,
        /// Payload.
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },

    /// Client (re)subscribes to server pushes.
    #[serde(rename = "updates.subscribe")]
    Subscribe,
}

impl Message {
    /// Serializes the message for sealing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an opened message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::protocol_violation(format!("malformed message: {e}")))
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    frame: &'a Frame,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    frame: Frame,
}

// ============================================================================
// Base64 Helpers
// ============================================================================

pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================
