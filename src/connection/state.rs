//! Connection lifecycle states.

/// WebSocket connection state.
///
/// Transitions are monotonic except for the two branches out of
/// `Connecting`: to `Open` on a successful open, or to `Closing` when the
/// connection is abandoned before the open completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// The transport is opening the connection.
    #[default]
    Connecting,
    /// Connection is open and ready for data transfer.
    Open,
    /// Close requested, waiting for the close handshake to finish.
    Closing,
    /// Connection is fully closed.
    Closed,
}

impl ConnectionState {
    /// `readyState` value for [`ConnectionState::Connecting`].
    pub const CONNECTING: u16 = 0;
    /// `readyState` value for [`ConnectionState::Open`].
    pub const OPEN: u16 = 1;
    /// `readyState` value for [`ConnectionState::Closing`].
    pub const CLOSING: u16 = 2;
    /// `readyState` value for [`ConnectionState::Closed`].
    pub const CLOSED: u16 = 3;

    /// Numeric `readyState` of this state (`0..=3`).
    #[must_use]
    #[inline]
    pub const fn ready_state(&self) -> u16 {
        match self {
            ConnectionState::Connecting => Self::CONNECTING,
            ConnectionState::Open => Self::OPEN,
            ConnectionState::Closing => Self::CLOSING,
            ConnectionState::Closed => Self::CLOSED,
        }
    }

    /// Check if sending data is allowed in this state.
    ///
    /// Returns `true` only for `Open` state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closing)
                | (ConnectionState::Connecting, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Closing)
                | (ConnectionState::Open, ConnectionState::Closed)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
