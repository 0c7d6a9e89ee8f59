//! Per-connection lifecycle: `Connecting → Active → Closed`.
//!
//! `Closed` is terminal.  The transition into it is reported exactly once,
//! no matter how many times the transport signals a close, so teardown
//! (deregistration from the registry) runs exactly once per connection.

use std::sync::atomic::{AtomicU8, Ordering};

/// Observable state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

impl ConnectionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Active => 1,
            Self::Closed => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// Lock-free holder of a [`ConnectionState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Starts in `Connecting`.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting → Active`.  Returns `false` if the connection was not
    /// `Connecting` (already active, or closed first).
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to `Closed`.  Returns `true` only for the call that performed
    /// the transition.
    pub fn close(&self) -> bool {
        self.state
            .swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel)
            != ConnectionState::Closed.as_u8()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_connecting() {
        assert_eq!(Lifecycle::new().state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_activate_then_close() {
        // Arrange
        let lifecycle = Lifecycle::new();

        // Act / Assert
        assert!(lifecycle.activate());
        assert_eq!(lifecycle.state(), ConnectionState::Active);
        assert!(lifecycle.close());
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_reports_transition_once() {
        let lifecycle = Lifecycle::new();
        lifecycle.activate();
        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(!lifecycle.close());
    }

    #[test]
    fn test_closed_is_terminal() {
        let lifecycle = Lifecycle::new();
        lifecycle.close();
        assert!(!lifecycle.activate());
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_connecting_can_close_directly() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.close());
    }
}
