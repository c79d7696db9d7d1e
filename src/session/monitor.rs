//! Network state monitor.
//!
//! Passive: the platform reports connectivity, the monitor classifies each
//! report into a transition the supervisor reacts to.

// ============================================================================
// Imports
// ============================================================================

use tracing::info;

use super::state::NetworkState;

// ============================================================================
// NetworkTransition
// ============================================================================

/// Meaningful change between two consecutive reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransition {
    /// Connectivity returned (or became unknown after being offline).
    CameOnline,
    /// Connectivity lost.
    WentOffline,
    /// Still online, over a different transport class.
    TransportChanged,
    /// Nothing the supervisor cares about.
    Unchanged,
}

// ============================================================================
// NetworkMonitor
// ============================================================================

/// Tracks the last reported [`NetworkState`].
#[derive(Debug, Default)]
pub struct NetworkMonitor {
    current: NetworkState,
}

impl NetworkMonitor {
    /// Creates a monitor in [`NetworkState::Unknown`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last reported state.
    #[inline]
    #[must_use]
    pub fn current(&self) -> NetworkState {
        self.current
    }

    /// Records a report and classifies it.
    pub fn observe(&mut self, next: NetworkState) -> NetworkTransition {
        let previous = std::mem::replace(&mut self.current, next);

        let transition = match (previous, next) {
            (a, b) if a == b => NetworkTransition::Unchanged,
            (_, NetworkState::Offline) => NetworkTransition::WentOffline,
            (NetworkState::Offline, _) => NetworkTransition::CameOnline,
            (NetworkState::Unknown, NetworkState::Connected(_)) => NetworkTransition::CameOnline,
            (NetworkState::Connected(_), NetworkState::Connected(_)) => {
                NetworkTransition::TransportChanged
            }
            (NetworkState::Connected(_), NetworkState::Unknown) => NetworkTransition::Unchanged,
            (NetworkState::Unknown, NetworkState::Unknown) => NetworkTransition::Unchanged,
        };

        if transition != NetworkTransition::Unchanged {
            info!(from = ?previous, to = ?next, ?transition, "Network state changed");
        }
        transition
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::state::TransportClass;

    #[test]
    fn test_transitions() {
        let mut monitor = NetworkMonitor::new();

        assert_eq!(
            monitor.observe(NetworkState::Connected(TransportClass::Wifi)),
            NetworkTransition::CameOnline
        );
        assert_eq!(
            monitor.observe(NetworkState::Connected(TransportClass::Wifi)),
            NetworkTransition::Unchanged
        );
        assert_eq!(
            monitor.observe(NetworkState::Connected(TransportClass::Cellular)),
            NetworkTransition::TransportChanged
        );
        assert_eq!(monitor.observe(NetworkState::Offline), NetworkTransition::WentOffline);
        assert_eq!(
            monitor.observe(NetworkState::Connected(TransportClass::Ethernet)),
            NetworkTransition::CameOnline
        );
        assert_eq!(monitor.current(), NetworkState::Connected(TransportClass::Ethernet));
    }

    #[test]
    fn test_unknown_after_offline_counts_as_online() {
        let mut monitor = NetworkMonitor::new();
        monitor.observe(NetworkState::Offline);
        assert_eq!(monitor.observe(NetworkState::Unknown), NetworkTransition::CameOnline);
    }
}
