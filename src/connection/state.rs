//! Lifecycle state of a connection worker.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
#[non_exhaustive]
pub enum ConnectionState {
    /// The worker has been created but not run.
    #[default]
    Idle = 0,
    /// The read and write pumps are running.
    Running = 1,
    /// Teardown has been claimed and is in progress.
    Closing = 2,
    /// The transport is closed and the result has been published.
    Closed = 3,
}

impl ConnectionState {
    /// Check if the connection is in an active state.
    ///
    /// Returns `true` for `Running` or `Closing` states.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Running | ConnectionState::Closing)
    }

    /// Check if teardown has started or finished.
    #[must_use]
    #[inline]
    pub const fn is_terminating(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Running,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Running => write!(f, "Running"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// A [`ConnectionState`] readable from any task.
#[derive(Debug, Default)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Idle);
        assert_eq!(AtomicState::default().load(), ConnectionState::Idle);
    }

    #[test]
    fn test_atomic_state_round_trips_every_state() {
        let atomic = AtomicState::default();
        for state in [
            ConnectionState::Idle,
            ConnectionState::Running,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            atomic.store(state);
            assert_eq!(atomic.load(), state);
        }
    }

    #[test]
    fn test_is_active() {
        assert!(!ConnectionState::Idle.is_active());
        assert!(ConnectionState::Running.is_active());
        assert!(ConnectionState::Closing.is_active());
        assert!(!ConnectionState::Closed.is_active());
    }

    #[test]
    fn test_is_terminating() {
        assert!(!ConnectionState::Idle.is_terminating());
        assert!(!ConnectionState::Running.is_terminating());
        assert!(ConnectionState::Closing.is_terminating());
        assert!(ConnectionState::Closed.is_terminating());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Idle.to_string(), "Idle");
        assert_eq!(ConnectionState::Running.to_string(), "Running");
        assert_eq!(ConnectionState::Closing.to_string(), "Closing");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
    }
}
