//! Awaitable handle for one request.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::Response;

use super::event::Event;

// ============================================================================
// PendingCall
// ============================================================================

/// Resolves with the request's outcome.
///
/// Dropping a `PendingCall` does not cancel the request; use
/// [`PendingCall::cancel`] or [`crate::Broker::cancel`].
#[derive(Debug)]
#[must_use = "a PendingCall does nothing unless awaited or cancelled"]
pub struct PendingCall {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<Response>>,
    events: mpsc::UnboundedSender<Event>,
}

impl PendingCall {
    pub(crate) fn new(
        id: CorrelationId,
        rx: oneshot::Receiver<Result<Response>>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self { id, rx, events }
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Cancels the request; it resolves with [`Error::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] after shutdown.
    pub fn cancel(&self) -> Result<()> {
        self.events
            .send(Event::Cancel(self.id))
            .map_err(|_| Error::BrokerClosed)
    }
}

impl Future for PendingCall {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::BrokerClosed)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_with_sent_result() {
        let (tx, rx) = oneshot::channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let call = PendingCall::new(CorrelationId::new(1), rx, events);

        let _ = tx.send(Ok(Response::new(7, b"ok".to_vec())));
        let response = call.await.expect("ok");
        assert_eq!(response.type_tag, 7);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_broker_closed() {
        let (tx, rx) = oneshot::channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let call = PendingCall::new(CorrelationId::new(1), rx, events);

        drop(tx);
        assert!(matches!(call.await, Err(Error::BrokerClosed)));
    }

    #[tokio::test]
    async fn test_cancel_after_close() {
        let (_tx, rx) = oneshot::channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let call = PendingCall::new(CorrelationId::new(1), rx, events);

        drop(events_rx);
        assert!(matches!(call.cancel(), Err(Error::BrokerClosed)));
    }
}
