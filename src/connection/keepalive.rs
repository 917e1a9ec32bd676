//! Keepalive policy as a two-state sub-machine.
//!
//! The scheduler that owns the timers lives in the connection engine; this
//! type only decides what a timer expiry means. Every liveness signal (any
//! inbound frame or pong) puts the machine back into
//! [`KeepalivePhase::AwaitingFirstTimeout`].
//!
//! ```text
//!            liveness                    liveness
//!         +-----------+          +------------------------+
//!         v           |          v                        |
//!   AwaitingFirstTimeout --timeout/ping--> AwaitingPong --timeout--> abort
//! ```

use std::time::Duration;

/// Close code sent when the peer stops answering pings.
pub const KEEPALIVE_CLOSE_CODE: u16 = 1001;

/// Close reason sent when the peer stops answering pings.
pub const KEEPALIVE_CLOSE_REASON: &str = "no response from ping";

/// Where the keepalive machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeepalivePhase {
    /// Waiting out the first half of the idle period.
    #[default]
    AwaitingFirstTimeout,
    /// A ping was sent; waiting out the second half for any liveness signal.
    AwaitingPong,
}

/// What the scheduler must do when its timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeepaliveAction {
    /// Send a ping and re-arm the timer.
    SendPing,
    /// Give up on the peer: close with code 1001.
    Abort,
}

/// Keepalive sub-machine for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    interval: Duration,
    phase: KeepalivePhase,
}

impl Keepalive {
    /// Create the machine for an idle timeout.
    ///
    /// Returns `None` when `idle` is zero, which disables keepalive.
    #[must_use]
    pub fn new(idle: Duration) -> Option<Self> {
        if idle.is_zero() {
            return None;
        }
        Some(Self {
            interval: idle / 2,
            phase: KeepalivePhase::AwaitingFirstTimeout,
        })
    }

    /// Timer duration for the current phase (half the idle timeout).
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> KeepalivePhase {
        self.phase
    }

    /// Record a liveness signal, restarting the countdown from zero.
    pub fn on_liveness(&mut self) {
        self.phase = KeepalivePhase::AwaitingFirstTimeout;
    }

    /// Record a timer expiry.
    pub fn on_timeout(&mut self) -> KeepaliveAction {
        match self.phase {
            KeepalivePhase::AwaitingFirstTimeout => {
                self.phase = KeepalivePhase::AwaitingPong;
                KeepaliveAction::SendPing
            }
            KeepalivePhase::AwaitingPong => KeepaliveAction::Abort,
        }
    }
}
