//! Event-dispatch facade.
//!
//! [`WebSocket`] mirrors the browser-style socket object: synchronous `send`
//! and `close` calls, and `open`/`message`/`error`/`close` notifications
//! delivered to a single handler as the engine produces them.
//!
//! # Tasks
//!
//! Each socket runs two tokio tasks:
//!
//! - a driver that waits for the open, pumps the [`EventLoop`] and reports
//!   the final outcome
//! - an acknowledgement task that waits, in call order, for the transport to
//!   take each frame `send` and `close` queued on it

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::{BinaryType, Config};
use crate::connection::{
    Connection, ConnectionState, EventLoop, Opening, PendingClose, PendingSend, Termination,
};
use crate::error::Result;
use crate::message::{Blob, CloseEvent, Message, MessageData};
use crate::protocol::ConnectRequest;
use crate::transport::Transport;

/// Notification delivered to a socket's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection is open.
    Open,
    /// An inbound message.
    Message(MessageData),
    /// The connection failed; always followed by [`SocketEvent::Close`].
    Error(crate::Error),
    /// The connection has ended. Always the last event.
    Close(CloseEvent),
}

/// Event handler callback type.
///
/// Called from the socket's driver task, one event at a time.
pub type EventHandler = Box<dyn Fn(SocketEvent) + Send + Sync>;

enum Queued {
    Send(PendingSend),
    Close(PendingClose),
}

/// Event-dispatch WebSocket.
///
/// # Example
///
/// ```rust,ignore
/// use wsengine::{SocketEvent, WebSocket};
///
/// let ws = WebSocket::connect("wss://example.com/chat", ["chat"], transport, |event| {
///     if let SocketEvent::Message(data) = event {
///         println!("{:?}", data.as_text());
///     }
/// })?;
/// ws.send("hello")?;
/// ws.close(Some(1000), Some("done"))?;
/// ```
pub struct WebSocket {
    connection: Connection,
    binary_type: Arc<Mutex<BinaryType>>,
    acks: mpsc::UnboundedSender<Queued>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("connection", &self.connection)
            .field("binary_type", &*self.binary_type.lock())
            .finish()
    }
}

impl WebSocket {
    /// Connect with [`Config::socket`].
    ///
    /// # Errors
    ///
    /// Fails synchronously, without touching the transport, for an invalid
    /// URL or subprotocol list.
    pub fn connect<I, P, T, F>(url: &str, protocols: I, transport: T, handler: F) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
        T: Transport,
        F: Fn(SocketEvent) + Send + Sync + 'static,
    {
        Self::with_config(url, protocols, transport, Config::socket(), Box::new(handler))
    }

    /// Connect with an explicit configuration.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails synchronously, without touching the transport, for an invalid
    /// URL or subprotocol list.
    pub fn with_config<I, P, T>(
        url: &str,
        protocols: I,
        transport: T,
        config: Config,
        handler: EventHandler,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
        T: Transport,
    {
        let request = ConnectRequest::new(url, protocols)?;
        let binary_type = Arc::new(Mutex::new(config.binary_type));
        let (connection, opening) = Connection::connect(request, Arc::new(transport), config, None);

        let (acks, queued) = mpsc::unbounded_channel();
        tokio::spawn(ack_loop(queued));
        tokio::spawn(drive(
            opening,
            connection.clone(),
            Arc::clone(&binary_type),
            handler,
        ));

        Ok(Self {
            connection,
            binary_type,
            acks,
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Negotiated subprotocol (empty until open).
    #[must_use]
    pub fn protocol(&self) -> String {
        self.connection.protocol()
    }

    /// Negotiated extensions (empty until open).
    #[must_use]
    pub fn extensions(&self) -> String {
        self.connection.extensions()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current state as `0..=3`.
    #[must_use]
    pub fn ready_state(&self) -> u16 {
        self.state().ready_state()
    }

    /// Bytes accepted by `send` and not yet acknowledged by the transport.
    #[must_use]
    pub fn buffered_amount(&self) -> u64 {
        self.connection.buffered_amount()
    }

    /// How inbound binary messages are surfaced.
    #[must_use]
    pub fn binary_type(&self) -> BinaryType {
        *self.binary_type.lock()
    }

    /// Change how inbound binary messages are surfaced. Applies to messages
    /// delivered after the call.
    pub fn set_binary_type(&self, binary_type: BinaryType) {
        *self.binary_type.lock() = binary_type;
    }

    /// The underlying engine.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Queue a message on the transport.
    ///
    /// The message counts toward `buffered_amount` until the transport
    /// acknowledges it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`](crate::Error::InvalidState) unless open
    /// - [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) over the size limit
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        let pending = self.connection.send(message.into())?;
        self.track(Queued::Send(pending));
        Ok(())
    }

    /// Start the close handshake. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCloseCode`](crate::Error::InvalidCloseCode) unless `code` is `1000` or `3000..=4999`
    /// - [`Error::CloseReasonTooLong`](crate::Error::CloseReasonTooLong) over 123 bytes
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        if let Some(pending) = self.connection.close(code, reason)? {
            self.track(Queued::Close(pending));
        }
        Ok(())
    }

    /// Wait for the connection to end.
    pub async fn closed(&self) -> CloseEvent {
        self.connection.closed().await.event
    }

    fn track(&self, queued: Queued) {
        // The ack task only stops once every sender is gone.
        let _ = self.acks.send(queued);
    }
}

async fn ack_loop(mut queued: mpsc::UnboundedReceiver<Queued>) {
    while let Some(next) = queued.recv().await {
        match next {
            Queued::Send(pending) => {
                let _ = pending.acknowledged().await;
            }
            Queued::Close(pending) => {
                let _ = pending.acknowledged().await;
            }
        }
    }
    trace!("Socket ack task stopped");
}

async fn drive(
    opening: Opening,
    connection: Connection,
    binary_type: Arc<Mutex<BinaryType>>,
    handler: EventHandler,
) {
    let events = match opening.wait().await {
        Ok(events) => Some(events),
        Err(error) => {
            debug!(url = %connection.url(), %error, "Socket failed to open");
            None
        }
    };

    if let Some(events) = events {
        pump(events, &binary_type, &handler).await;
    }

    report(connection.closed().await, &handler);
}

async fn pump(mut events: EventLoop, binary_type: &Mutex<BinaryType>, handler: &EventHandler) {
    // Closed before it opened: nothing but the close is reported.
    if events.was_abandoned() {
        events.drain().await;
        return;
    }

    handler(SocketEvent::Open);

    while let Some(message) = events.next().await {
        let data = match message {
            Message::Text(text) => MessageData::Text(text),
            Message::Binary(data) => match *binary_type.lock() {
                BinaryType::Blob => MessageData::Blob(Blob::new(data)),
                BinaryType::ArrayBuffer => MessageData::ArrayBuffer(data),
            },
        };
        handler(SocketEvent::Message(data));
    }
}

fn report(termination: Termination, handler: &EventHandler) {
    let Termination { event, error } = termination;
    if let Some(error) = error {
        handler(SocketEvent::Error(error));
    }
    handler(SocketEvent::Close(event));
}
