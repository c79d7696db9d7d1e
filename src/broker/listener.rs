//! Session notifications for the embedding application.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::ServerSessionId;
use crate::protocol::Update;
use crate::session::ConnectionState;
use crate::transport::Endpoint;

// ============================================================================
// SessionListener
// ============================================================================

/// Receives session notifications.
///
/// Called from the broker's processor task, in order. Implementations must
/// return quickly and must not block; hand work off to another task if
/// needed. Every method has a no-op default.
pub trait SessionListener: Send + Sync + 'static {
    /// The connection state changed.
    fn on_state_changed(&self, state: &ConnectionState) {
        let _ = state;
    }

    /// The server pushed an update.
    fn on_update(&self, update: Update) {
        let _ = update;
    }

    /// The auth key for an endpoint was dropped because the server no
    /// longer accepts it.
    fn on_auth_key_invalidated(&self, endpoint: &Endpoint) {
        let _ = endpoint;
    }

    /// The server opened a session different from the previous one for
    /// this endpoint; server-side state tied to the old session is gone.
    fn on_new_session(&self, endpoint: &Endpoint, session: ServerSessionId) {
        let _ = (endpoint, session);
    }
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {}
