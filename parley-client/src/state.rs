//! Connection lifecycle states
//!
//! Exactly one state exists per client. It is mutated only by the
//! connection dispatcher; the façade observes snapshots of it.

use std::fmt::{self, Display};

/// Lifecycle state of a parley connection
///
/// # State transitions
///
/// ```text
///                 connect()          transport open       handshake ok
/// Idle/Disconnected -----> Connecting ------> Connected ------> Authenticated
///                               |                  |                  |
///                               | open err/timeout | close()/EOF/err  | close()/EOF/err
///                               v                  v                  v
///                          Disconnected   (Closing ->) Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Initial state, never connected
    #[default]
    Idle,
    /// Transport connect in progress
    Connecting,
    /// Transport open, no authenticated session yet
    Connected,
    /// Handshake complete, session token held
    Authenticated,
    /// Graceful shutdown in progress
    Closing,
    /// Connection lost or closed; a new `connect()` is required
    Disconnected,
}

impl ConnectionState {
    /// Check if the transport is live and the dispatcher should be reading
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Check if requests may be dispatched in this state
    pub const fn can_send(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Check if a `connect()` call is acceptable in this state
    pub const fn can_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Closing => write!(f, "Closing"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}
