//! Request, Response and Update types.
//!
//! Payloads are opaque byte buffers tagged with a type identifier; encoding
//! the payload itself belongs to the caller's serializer.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Request
// ============================================================================

/// An RPC request submitted by the application layer.
///
/// Per-request overrides fall back to the broker configuration when unset.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use session_broker::Request;
///
/// let request = Request::new(0x0102, b"payload".to_vec())
///     .with_timeout(Duration::from_secs(5))
///     .with_max_attempts(1);
///
/// assert_eq!(request.type_tag, 0x0102);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Type identifier of the payload.
    pub type_tag: u32,

    /// Serialized request body.
    pub payload: Vec<u8>,

    /// Wall-clock budget for this request.
    pub timeout: Option<Duration>,

    /// Maximum number of transmissions across reconnects.
    pub max_attempts: Option<u32>,
}

impl Request {
    /// Creates a request using the broker's default timeout and retry cap.
    #[inline]
    #[must_use]
    pub fn new(type_tag: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            type_tag,
            payload: payload.into(),
            timeout: None,
            max_attempts: None,
        }
    }

    /// Overrides the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the maximum transmission count.
    ///
    /// Use `1` for requests that must never be repeated.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

// ============================================================================
// Response
// ============================================================================

/// Successful response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Type identifier of the response payload.
    pub type_tag: u32,

    /// Serialized response body.
    pub payload: Vec<u8>,
}

impl Response {
    /// Creates a response.
    #[inline]
    #[must_use]
    pub fn new(type_tag: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            type_tag,
            payload: payload.into(),
        }
    }
}

// ============================================================================
// Update
// ============================================================================

/// Server-initiated push delivered through the session listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Type identifier of the update payload.
    pub type_tag: u32,

    /// Serialized update body.
    pub payload: Vec<u8>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = Request::new(1, vec![1, 2, 3]);
        assert_eq!(request.payload, vec![1, 2, 3]);
        assert!(request.timeout.is_none());
        assert!(request.max_attempts.is_none());
    }

    #[test]
    fn test_request_overrides() {
        let request = Request::new(1, Vec::new())
            .with_timeout(Duration::from_millis(250))
            .with_max_attempts(1);
        assert_eq!(request.timeout, Some(Duration::from_millis(250)));
        assert_eq!(request.max_attempts, Some(1));
    }
}
