//! Processor mailbox.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::oneshot;

use crate::auth::AuthKey;
use crate::error::Result;
use crate::identifiers::CorrelationId;
use crate::protocol::Request;
use crate::session::{Completion, NetworkState};
use crate::transport::{Link, LinkEvent};

// ============================================================================
// Event
// ============================================================================

/// Everything the processor reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum Event {
    /// Caller submitted a request.
    Submit {
        id: CorrelationId,
        request: Request,
        completion: Completion,
    },
    /// Caller cancelled a request.
    Cancel(CorrelationId),
    /// Platform reported connectivity.
    NetworkChanged(NetworkState),
    /// Caller asked for an immediate attempt.
    Reconnect,
    /// Caller asked to stop; acknowledged once everything is resolved.
    Shutdown(oneshot::Sender<()>),
    /// Dial of an attempt finished.
    Connected { epoch: u64, result: Result<Link> },
    /// Connection task observation.
    Link(LinkEvent),
    /// Blocking key save finished.
    KeyPersisted {
        epoch: u64,
        key: AuthKey,
        result: Result<()>,
    },
}

impl From<LinkEvent> for Event {
    fn from(event: LinkEvent) -> Self {
        Self::Link(event)
    }
}
