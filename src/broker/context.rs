//! Identity of one broker instance.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::InstanceId;
use crate::protocol::{API_MAJOR_VERSION, API_MINOR_VERSION};

// ============================================================================
// SessionContext
// ============================================================================

/// Identity passed explicitly to everything a broker owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Unique per broker instance; appears in every log span.
    pub instance: InstanceId,
    /// Application id assigned by the service, if any.
    pub app_id: Option<u32>,
    /// API layer announced in `session.hello`.
    pub api_layer: (u32, u32),
}

impl SessionContext {
    /// Creates a context with a fresh instance id.
    #[must_use]
    pub fn new(app_id: Option<u32>) -> Self {
        Self {
            instance: InstanceId::generate(),
            app_id,
            api_layer: (API_MAJOR_VERSION, API_MINOR_VERSION),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(None)
    }
}
