//! Close request validation and close handshake bookkeeping.

use std::time::Instant;

use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::message::CloseCode;

/// Maximum UTF-8 length of a close reason (125-byte control payload minus
/// the 2-byte code).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// A validated close request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseRequest {
    code: Option<u16>,
    reason: Option<String>,
}

impl CloseRequest {
    /// Validate an application close request.
    ///
    /// A reason without a code implies code `1000`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCloseCode`] unless `code` is `1000` or in `3000..=4999`
    /// - [`Error::CloseReasonTooLong`] if `reason` is longer than 123 bytes
    pub fn new(code: Option<u16>, reason: Option<&str>) -> Result<Self> {
        if let Some(code) = code {
            if !CloseCode::from_u16(code).is_application_sendable() {
                return Err(Error::InvalidCloseCode(code));
            }
        }

        if let Some(reason) = reason {
            if reason.len() > MAX_CLOSE_REASON_BYTES {
                return Err(Error::CloseReasonTooLong {
                    size: reason.len(),
                    max: MAX_CLOSE_REASON_BYTES,
                });
            }
        }

        let code = match (code, reason) {
            (None, Some(_)) => Some(CloseCode::Normal.as_u16()),
            (code, _) => code,
        };

        Ok(Self {
            code,
            reason: reason.map(str::to_owned),
        })
    }

    /// Close request issued by the engine itself, bypassing the application
    /// code range.
    pub(crate) fn internal(code: u16, reason: &str) -> Self {
        Self {
            code: Some(code),
            reason: Some(reason.to_owned()),
        }
    }

    /// Close code, if any.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        self.code
    }

    /// Close reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// What a local `close()` call must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseDecision {
    /// No transport handle yet: remember the request until the open resolves.
    Abandon,
    /// Forward the close request to the transport now.
    Send(CloseRequest),
    /// A close is already underway or done.
    Noop,
}

/// How an inbound close frame relates to our own close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteClose {
    /// We already sent a close; this is the peer's acknowledgement.
    Acknowledgement,
    /// The peer started the handshake; it must be echoed.
    PeerInitiated,
}

/// Close handshake coordinator state.
///
/// The local close request is sent exactly once; the moment it is sent is
/// recorded so a bounded wait can be enforced against it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CloseHandshake {
    /// No close requested yet.
    #[default]
    Idle,
    /// Close requested while still connecting.
    Abandoned(CloseRequest),
    /// Local close sent to the transport.
    Sent {
        /// The request that was sent.
        request: CloseRequest,
        /// When it was sent.
        at: Instant,
    },
    /// Peer-initiated close was echoed back.
    Echoed,
}

impl CloseHandshake {
    /// Decide what a local close request does in `state`.
    pub fn request(
        &mut self,
        state: ConnectionState,
        request: CloseRequest,
        now: Instant,
    ) -> CloseDecision {
        if !matches!(self, CloseHandshake::Idle) {
            return CloseDecision::Noop;
        }

        match state {
            ConnectionState::Connecting => {
                *self = CloseHandshake::Abandoned(request);
                CloseDecision::Abandon
            }
            ConnectionState::Open => {
                *self = CloseHandshake::Sent {
                    request: request.clone(),
                    at: now,
                };
                CloseDecision::Send(request)
            }
            _ => CloseDecision::Noop,
        }
    }

    /// The open resolved successfully; returns the deferred request, if the
    /// connection was abandoned, and marks it sent.
    pub fn take_abandoned(&mut self, now: Instant) -> Option<CloseRequest> {
        match std::mem::take(self) {
            CloseHandshake::Abandoned(request) => {
                *self = CloseHandshake::Sent {
                    request: request.clone(),
                    at: now,
                };
                Some(request)
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// Returns `true` if the connection was abandoned before open.
    #[must_use]
    pub const fn is_abandoned(&self) -> bool {
        matches!(self, CloseHandshake::Abandoned(_))
    }

    /// Classify an inbound close frame, marking a peer-initiated one echoed.
    pub fn on_remote_close(&mut self) -> RemoteClose {
        match self {
            CloseHandshake::Sent { .. } => RemoteClose::Acknowledgement,
            _ => {
                *self = CloseHandshake::Echoed;
                RemoteClose::PeerInitiated
            }
        }
    }

    /// When the local close was sent, if it was.
    #[must_use]
    pub const fn sent_at(&self) -> Option<Instant> {
        match self {
            CloseHandshake::Sent { at, .. } => Some(*at),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_boundaries() {
        let table = [
            (999, false),
            (1000, true),
            (1001, false),
            (2999, false),
            (3000, true),
            (4999, true),
            (5000, false),
        ];
        for (code, accepted) in table {
            let result = CloseRequest::new(Some(code), None);
            assert_eq!(result.is_ok(), accepted, "code {code}");
            if !accepted {
                assert_eq!(result, Err(Error::InvalidCloseCode(code)));
            }
        }
    }

    #[test]
    fn test_reason_length_boundary() {
        let exact = "a".repeat(123);
        assert!(CloseRequest::new(Some(1000), Some(&exact)).is_ok());

        let over = "a".repeat(124);
        assert_eq!(
            CloseRequest::new(Some(1000), Some(&over)),
            Err(Error::CloseReasonTooLong {
                size: 124,
                max: 123
            })
        );
    }

    #[test]
    fn test_reason_length_counts_utf8_bytes() {
        // 41 three-byte characters = 123 bytes
        let exact = "€".repeat(41);
        assert!(CloseRequest::new(None, Some(&exact)).is_ok());
        let over = format!("{exact}a");
        assert!(CloseRequest::new(None, Some(&over)).is_err());
    }

    #[test]
    fn test_reason_without_code_defaults_to_1000() {
        let request = CloseRequest::new(None, Some("bye")).unwrap();
        assert_eq!(request.code(), Some(1000));
        assert_eq!(request.reason(), Some("bye"));
    }

    #[test]
    fn test_empty_request() {
        let request = CloseRequest::new(None, None).unwrap();
        assert_eq!(request.code(), None);
        assert_eq!(request.reason(), None);
    }

    #[test]
    fn test_code_checked_before_reason() {
        let over = "a".repeat(200);
        assert_eq!(
            CloseRequest::new(Some(1), Some(&over)),
            Err(Error::InvalidCloseCode(1))
        );
    }

    #[test]
    fn test_close_while_open_sends_once() {
        let mut handshake = CloseHandshake::default();
        let now = Instant::now();
        let request = CloseRequest::new(Some(1000), None).unwrap();

        assert_eq!(
            handshake.request(ConnectionState::Open, request.clone(), now),
            CloseDecision::Send(request.clone())
        );
        assert_eq!(handshake.sent_at(), Some(now));
        assert_eq!(
            handshake.request(ConnectionState::Closing, request, now),
            CloseDecision::Noop
        );
    }

    #[test]
    fn test_close_while_connecting_abandons() {
        let mut handshake = CloseHandshake::default();
        let now = Instant::now();
        let request = CloseRequest::new(Some(3000), Some("later")).unwrap();

        assert_eq!(
            handshake.request(ConnectionState::Connecting, request.clone(), now),
            CloseDecision::Abandon
        );
        assert!(handshake.is_abandoned());
        assert_eq!(handshake.take_abandoned(now), Some(request));
        assert_eq!(handshake.sent_at(), Some(now));
        assert_eq!(handshake.take_abandoned(now), None);
    }

    #[test]
    fn test_remote_close_classification() {
        let mut handshake = CloseHandshake::default();
        assert_eq!(handshake.on_remote_close(), RemoteClose::PeerInitiated);
        assert_eq!(handshake, CloseHandshake::Echoed);

        let mut handshake = CloseHandshake::default();
        handshake.request(
            ConnectionState::Open,
            CloseRequest::default(),
            Instant::now(),
        );
        assert_eq!(handshake.on_remote_close(), RemoteClose::Acknowledgement);
    }

    #[test]
    fn test_close_after_closed_is_noop() {
        let mut handshake = CloseHandshake::default();
        assert_eq!(
            handshake.request(
                ConnectionState::Closed,
                CloseRequest::default(),
                Instant::now()
            ),
            CloseDecision::Noop
        );
        assert_eq!(handshake, CloseHandshake::Idle);
    }
}
