//! Network provider seam.
//!
//! The broker never touches sockets. A [`NetworkProvider`] turns an
//! [`Endpoint`] into a [`Link`]: a framed, bidirectional byte stream split
//! into an outbound [`FrameSink`] and an inbound [`FrameSource`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

use super::Endpoint;

// ============================================================================
// Traits
// ============================================================================

/// Opens framed connections to endpoints.
///
/// Implementations own DNS, TCP and TLS.
#[async_trait]
pub trait NetworkProvider: Send + Sync + 'static {
    /// Connects to an endpoint.
    ///
    /// # Errors
    ///
    /// Any error is treated as a transport failure of this attempt.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link>;
}

/// Outbound half of a link.
#[async_trait]
pub trait FrameSink: Send {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// An error closes the link.
    async fn send(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Closes the link. Must be idempotent.
    async fn close(&mut self);
}

/// Inbound half of a link.
#[async_trait]
pub trait FrameSource: Send {
    /// Receives the next frame; `None` once the stream has ended.
    ///
    /// Must be cancel-safe: the I/O task polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<Vec<u8>>>;
}

// ============================================================================
// Link
// ============================================================================

/// A connected, framed byte stream.
pub struct Link {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub source: Box<dyn FrameSource>,
}

impl Link {
    /// Creates a link from its two halves.
    #[inline]
    #[must_use]
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}
