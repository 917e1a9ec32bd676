//! Stream facade.
//!
//! [`WebSocketStream`] exposes a connection as a readable/writable pair plus
//! a single `closed` outcome. The readable side is a bounded queue fed by a
//! pump task, so a consumer that stops reading stops the engine from pulling
//! further transport events.
//!
//! Connections made through this facade bound the close handshake: if the
//! peer does not acknowledge a local close within
//! [`STREAM_CLOSE_TIMEOUT`](crate::config::STREAM_CLOSE_TIMEOUT), `closed`
//! fails with [`Error::CloseTimeout`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::Config;
use crate::connection::{Connection, ConnectionState, EventLoop, Opening};
use crate::error::{Error, Result};
use crate::message::{CloseInfo, Message};
use crate::protocol::ConnectRequest;
use crate::transport::Transport;

/// Options for [`WebSocketStream::connect`].
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Requested subprotocols.
    pub protocols: Vec<String>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Cancels the connection: before open it aborts, after open it closes.
    pub signal: Option<CancellationToken>,
}

impl StreamOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requested subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the abort signal.
    #[must_use]
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// An open stream connection.
#[derive(Debug)]
pub struct OpenedStream {
    /// Negotiated subprotocol.
    pub protocol: String,
    /// Negotiated extensions.
    pub extensions: String,
    /// Inbound messages.
    pub readable: WebSocketReader,
    /// Outbound messages.
    pub writable: WebSocketWriter,
}

type OpenOutcome = oneshot::Receiver<Result<OpenedStream>>;

/// Stream-oriented WebSocket.
///
/// # Example
///
/// ```rust,ignore
/// use wsengine::{StreamOptions, WebSocketStream};
///
/// let ws = WebSocketStream::connect("wss://example.com", StreamOptions::new(), transport)?;
/// let mut opened = ws.opened().await?;
/// opened.writable.write("ping").await?;
/// while let Some(msg) = opened.readable.read().await {
///     println!("{msg:?}");
/// }
/// let info = ws.closed().await?;
/// ```
pub struct WebSocketStream {
    connection: Connection,
    opened: Mutex<Option<OpenOutcome>>,
}

impl std::fmt::Debug for WebSocketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketStream")
            .field("connection", &self.connection)
            .finish()
    }
}

impl WebSocketStream {
    /// Connect with [`Config::stream`].
    ///
    /// # Errors
    ///
    /// Fails synchronously, without touching the transport, for an invalid
    /// URL, subprotocol list or header.
    pub fn connect<T: Transport>(url: &str, options: StreamOptions, transport: T) -> Result<Self> {
        Self::with_config(url, options, transport, Config::stream())
    }

    /// Connect with an explicit configuration.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails synchronously, without touching the transport, for an invalid
    /// URL, subprotocol list or header.
    pub fn with_config<T: Transport>(
        url: &str,
        options: StreamOptions,
        transport: T,
        config: Config,
    ) -> Result<Self> {
        let StreamOptions {
            protocols,
            headers,
            signal,
        } = options;
        let request = ConnectRequest::new(url, protocols)?.headers(headers)?;
        let read_buffer = config.read_buffer.max(1);

        let (connection, opening) =
            Connection::connect(request, Arc::new(transport), config, signal);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(drive(opening, connection.clone(), read_buffer, tx));

        Ok(Self {
            connection,
            opened: Mutex::new(Some(rx)),
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Wait for the connection to open.
    ///
    /// # Errors
    ///
    /// - the open failure, or [`Error::Aborted`] if the connection was
    ///   aborted or closed before it opened
    /// - [`Error::AlreadyOpened`] on every call after the first
    pub async fn opened(&self) -> Result<OpenedStream> {
        let outcome = self.opened.lock().take().ok_or(Error::AlreadyOpened)?;
        outcome
            .await
            .unwrap_or_else(|_| Err(Error::Aborted("connection task stopped".into())))
    }

    /// Wait for the connection to end.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection: an open failure, a
    /// transport error, a keepalive failure or a close timeout.
    pub async fn closed(&self) -> Result<CloseInfo> {
        self.connection.closed().await.result()
    }

    /// Start the close handshake. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Fails synchronously for an invalid close code or an oversized reason.
    pub fn close(&self, info: Option<CloseInfo>) -> Result<()> {
        close_detached(&self.connection, info)
    }
}

fn close_detached(connection: &Connection, info: Option<CloseInfo>) -> Result<()> {
    let pending = match &info {
        Some(info) => {
            let reason = (!info.reason.is_empty()).then_some(info.reason.as_str());
            connection.close(Some(info.code), reason)?
        }
        None => connection.close(None, None)?,
    };
    if let Some(pending) = pending {
        tokio::spawn(async move {
            let _ = pending.acknowledged().await;
        });
    }
    Ok(())
}

async fn drive(
    opening: Opening,
    connection: Connection,
    read_buffer: usize,
    tx: oneshot::Sender<Result<OpenedStream>>,
) {
    let events = match opening.wait().await {
        Ok(events) => events,
        Err(error) => {
            debug!(url = %connection.url(), %error, "Stream failed to open");
            let _ = tx.send(Err(error));
            return;
        }
    };

    if events.was_abandoned() {
        let _ = tx.send(Err(Error::Aborted("closed before the connection opened".into())));
        events.drain().await;
        return;
    }

    let (queue, rx) = mpsc::channel(read_buffer);
    let opened = OpenedStream {
        protocol: connection.protocol(),
        extensions: connection.extensions(),
        readable: WebSocketReader {
            rx,
            connection: connection.clone(),
        },
        writable: WebSocketWriter {
            connection: connection.clone(),
        },
    };
    let _ = tx.send(Ok(opened));

    pump(events, queue, connection.subscribe_state()).await;
}

/// Feed the readable queue. While open, a full queue holds the event loop
/// back; afterwards messages that do not fit are dropped so the close
/// handshake can still complete.
async fn pump(
    mut events: EventLoop,
    queue: mpsc::Sender<Message>,
    mut state: watch::Receiver<ConnectionState>,
) {
    loop {
        let permit = tokio::select! {
            permit = queue.reserve() => permit.ok(),
            _ = state.wait_for(|s| *s != ConnectionState::Open) => None,
        };

        let Some(message) = events.next().await else {
            break;
        };

        match permit {
            Some(permit) => permit.send(message),
            None => {
                if let Err(error) = queue.try_send(message) {
                    trace!(url = %events.connection().url(), %error, "Dropped inbound message");
                }
            }
        }
    }
    trace!(url = %events.connection().url(), "Stream pump stopped");
}

/// Readable half of a stream connection.
///
/// Yields inbound messages and ends once the connection has closed.
#[derive(Debug)]
pub struct WebSocketReader {
    rx: mpsc::Receiver<Message>,
    connection: Connection,
}

impl WebSocketReader {
    /// Next inbound message, or `None` once the connection has closed.
    pub async fn read(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Stop reading and close the connection.
    ///
    /// # Errors
    ///
    /// Fails synchronously for an invalid close code or an oversized reason.
    pub fn cancel(mut self, info: Option<CloseInfo>) -> Result<()> {
        self.rx.close();
        close_detached(&self.connection, info)
    }
}

impl Stream for WebSocketReader {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

/// Writable half of a stream connection.
#[derive(Debug, Clone)]
pub struct WebSocketWriter {
    connection: Connection,
}

impl WebSocketWriter {
    /// Send a message and wait for the transport to take it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the connection is open
    /// - [`Error::MessageTooLarge`] over the size limit
    /// - the transport's error
    pub async fn write(&self, message: impl Into<Message>) -> Result<()> {
        self.connection.send(message.into())?.acknowledged().await
    }

    /// Close the connection without a code.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the close could not be sent.
    pub async fn close(&self) -> Result<()> {
        match self.connection.close(None, None)? {
            Some(pending) => pending.acknowledged().await,
            None => Ok(()),
        }
    }

    /// Close the connection with code `1000` and `reason`.
    ///
    /// # Errors
    ///
    /// Fails for an oversized reason, or with the transport's error.
    pub async fn abort(&self, reason: Option<&str>) -> Result<()> {
        match self.connection.close(Some(1000), reason)? {
            Some(pending) => pending.acknowledged().await,
            None => Ok(()),
        }
    }

    /// Bytes written and not yet acknowledged by the transport.
    #[must_use]
    pub fn buffered_amount(&self) -> u64 {
        self.connection.buffered_amount()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Call, MemoryTransport, OpenBehavior};

    #[tokio::test]
    async fn test_invalid_header_fails_synchronously() {
        let (transport, peer) = MemoryTransport::pair();
        let options = StreamOptions::new().header("X-Bad", "a\r\nb");
        assert!(WebSocketStream::connect("ws://stream.test", options, transport).is_err());
        assert!(peer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_headers_reach_transport() {
        let (transport, peer) = MemoryTransport::pair();
        let options = StreamOptions::new()
            .protocol("chat")
            .header("Authorization", "Bearer t");
        let ws = WebSocketStream::connect("ws://stream.test/", options, transport).unwrap();
        let opened = ws.opened().await.unwrap();
        assert_eq!(opened.protocol, "chat");
        assert_eq!(
            peer.calls()[0],
            Call::Open {
                url: "ws://stream.test/".into(),
                protocols: vec!["chat".into()],
                headers: vec![("Authorization".into(), "Bearer t".into())],
            }
        );
    }

    #[tokio::test]
    async fn test_opened_only_once() {
        let (transport, _peer) = MemoryTransport::pair();
        let ws = WebSocketStream::connect("ws://stream.test", StreamOptions::new(), transport)
            .unwrap();
        assert!(ws.opened().await.is_ok());
        assert_eq!(ws.opened().await.unwrap_err(), Error::AlreadyOpened);
    }

    #[tokio::test]
    async fn test_open_failure_rejects_both() {
        let (transport, peer) = MemoryTransport::pair();
        peer.set_open(OpenBehavior::Reject("refused".into()));
        let ws = WebSocketStream::connect("ws://stream.test", StreamOptions::new(), transport)
            .unwrap();
        let expected = Error::OpenFailed("refused".into());
        assert_eq!(ws.opened().await.unwrap_err(), expected);
        assert_eq!(ws.closed().await.unwrap_err(), expected);
    }

    #[tokio::test]
    async fn test_reader_yields_then_ends() {
        let (transport, peer) = MemoryTransport::pair();
        let ws = WebSocketStream::connect("ws://stream.test", StreamOptions::new(), transport)
            .unwrap();
        let mut opened = ws.opened().await.unwrap();

        peer.send_text("one");
        peer.send_binary(vec![2u8]);
        peer.close(Some(1000), "bye");

        assert_eq!(opened.readable.read().await, Some(Message::text("one")));
        assert_eq!(
            opened.readable.read().await,
            Some(Message::binary(vec![2u8]))
        );
        assert_eq!(opened.readable.read().await, None);
        assert_eq!(ws.closed().await, Ok(CloseInfo::new(1000u16, "bye")));
    }
}
