//! Transport provider contract.
//!
//! The engine never touches sockets or frames. Everything below the message
//! level (TCP/TLS, the HTTP upgrade, framing, masking, answering pings) is the
//! job of a [`Transport`] implementation. [`MemoryTransport`] is an
//! in-process provider for tests and demos.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::ConnectRequest;

pub use memory::{Call, MemoryPeer, MemoryTransport, OpenBehavior, RecordedCall};

/// Opaque identity of an open transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u64);

impl TransportHandle {
    /// Wrap a provider-specific identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The provider-specific identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Handle for all further calls on this connection.
    pub handle: TransportHandle,
    /// Subprotocol selected by the server, or empty.
    pub protocol: String,
    /// Extensions negotiated with the server, or empty.
    pub extensions: String,
}

/// One inbound event from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// A pong frame.
    Pong,
    /// A fatal transport failure.
    Error(String),
    /// A close frame from the peer. `code` is `None` if the frame had no status.
    Close {
        /// Status code, if the frame carried one.
        code: Option<u16>,
        /// Close reason (empty if none).
        reason: String,
    },
}

/// Resolves once the transport has taken a queued frame.
pub type Ack = BoxFuture<'static, Result<()>>;

/// Transport provider consumed by the engine.
///
/// At most one [`next_event`](Transport::next_event) call per handle is
/// outstanding at any time.
///
/// The outbound methods queue their frame before returning and hand back an
/// [`Ack`] for the transport's acknowledgement. The engine calls them with
/// the connection lock held, which is what keeps every frame inside the
/// state it was accepted in: they must not block and must not call back
/// into the connection. Frames are queued in call order.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection. Implementations should give up once `cancel` fires.
    async fn open(&self, request: &ConnectRequest, cancel: CancellationToken) -> Result<Opened>;

    /// Wait for the next inbound event.
    async fn next_event(&self, handle: TransportHandle) -> TransportEvent;

    /// Queue a text message.
    fn send_text(&self, handle: TransportHandle, text: String) -> Ack;

    /// Queue a binary message.
    fn send_binary(&self, handle: TransportHandle, data: Bytes) -> Ack;

    /// Queue a ping frame.
    fn send_ping(&self, handle: TransportHandle) -> Ack;

    /// Queue a close frame. Must be safe to call after the peer started closing.
    fn close(&self, handle: TransportHandle, code: Option<u16>, reason: Option<String>) -> Ack;
}
