//! In-process transport provider.
//!
//! A [`MemoryTransport`] serves exactly one connection. Its [`MemoryPeer`]
//! plays the remote endpoint: it decides how the open resolves, pushes inbound
//! events and inspects every call the engine made, stamped with the tokio
//! clock so paused-time tests can assert on timing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Ack, Opened, Transport, TransportEvent, TransportHandle};
use crate::error::{Error, Result};
use crate::protocol::ConnectRequest;

const HANDLE: TransportHandle = TransportHandle::new(1);

/// How the next `open` call resolves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Accept, selecting the first requested subprotocol.
    #[default]
    AcceptFirstProtocol,
    /// Accept with an explicit negotiation result.
    Accept {
        /// Selected subprotocol.
        protocol: String,
        /// Negotiated extensions.
        extensions: String,
    },
    /// Fail the open with [`Error::OpenFailed`].
    Reject(String),
    /// Keep the open pending until the peer resolves it.
    Hold,
}

/// A call the engine made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `open`
    Open {
        /// Requested URL.
        url: String,
        /// Requested subprotocols.
        protocols: Vec<String>,
        /// Extra request headers.
        headers: Vec<(String, String)>,
    },
    /// `send_text`
    SendText(String),
    /// `send_binary`
    SendBinary(Bytes),
    /// `send_ping`
    Ping,
    /// `close`
    Close {
        /// Close code sent.
        code: Option<u16>,
        /// Close reason sent.
        reason: Option<String>,
    },
}

/// A [`Call`] with the tokio time it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// When the call was made.
    pub at: Instant,
    /// The call.
    pub call: Call,
}

struct Inner {
    open: watch::Sender<OpenBehavior>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportEvent>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: watch::Sender<usize>,
    hold_acks: AtomicBool,
    acks: Semaphore,
    auto_echo_close: AtomicBool,
    send_error: Mutex<Option<String>>,
}

impl Inner {
    fn record(&self, call: Call) {
        trace!(?call, "Memory transport call");
        let mut calls = self.calls.lock();
        calls.push(RecordedCall {
            at: Instant::now(),
            call,
        });
        let len = calls.len();
        drop(calls);
        self.call_count.send_replace(len);
    }

    fn check_failure(&self) -> Result<()> {
        match self.send_error.lock().clone() {
            Some(message) => Err(Error::Transport(message)),
            None => Ok(()),
        }
    }
}

/// Ack for a queued send, held back while acks are held.
fn acknowledge(inner: &Arc<Inner>) -> Ack {
    let inner = Arc::clone(inner);
    Box::pin(async move {
        if inner.hold_acks.load(Ordering::Acquire) {
            let permit = inner
                .acks
                .acquire()
                .await
                .map_err(|_| Error::Transport("memory transport shut down".into()))?;
            permit.forget();
        }
        inner.check_failure()
    })
}

/// In-process transport for a single connection.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

/// Remote side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Create a transport and its peer.
    #[must_use]
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            open: watch::channel(OpenBehavior::default()).0,
            events_tx,
            events_rx: AsyncMutex::new(events_rx),
            calls: Mutex::new(Vec::new()),
            call_count: watch::channel(0).0,
            hold_acks: AtomicBool::new(false),
            acks: Semaphore::new(0),
            auto_echo_close: AtomicBool::new(true),
            send_error: Mutex::new(None),
        });
        (
            MemoryTransport {
                inner: Arc::clone(&inner),
            },
            MemoryPeer { inner },
        )
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("calls", &self.inner.calls.lock().len())
            .finish()
    }
}

impl MemoryPeer {
    /// Set how `open` resolves. Resolves a held open immediately.
    pub fn set_open(&self, behavior: OpenBehavior) {
        self.inner.open.send_replace(behavior);
    }

    /// Keep send acks pending until [`release_acks`](Self::release_acks).
    pub fn hold_acks(&self) {
        self.inner.hold_acks.store(true, Ordering::Release);
    }

    /// Let `n` held sends complete.
    pub fn release_acks(&self, n: usize) {
        self.inner.acks.add_permits(n);
    }

    /// Make every later send, ping and close fail with `message`.
    pub fn fail_sends(&self, message: impl Into<String>) {
        *self.inner.send_error.lock() = Some(message.into());
    }

    /// Whether a local close is answered with a matching close frame
    /// (default `true`).
    pub fn set_auto_echo_close(&self, enabled: bool) {
        self.inner.auto_echo_close.store(enabled, Ordering::Release);
    }

    /// Deliver a text message.
    pub fn send_text(&self, text: impl Into<String>) {
        self.push(TransportEvent::Text(text.into()));
    }

    /// Deliver a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) {
        self.push(TransportEvent::Binary(data.into()));
    }

    /// Deliver a pong.
    pub fn pong(&self) {
        self.push(TransportEvent::Pong);
    }

    /// Report a fatal transport error.
    pub fn error(&self, message: impl Into<String>) {
        self.push(TransportEvent::Error(message.into()));
    }

    /// Start (or acknowledge) a close handshake from the peer.
    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        self.push(TransportEvent::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Queue an arbitrary event.
    pub fn push(&self, event: TransportEvent) {
        // The receiver lives in the same `Inner`, so this never fails.
        let _ = self.inner.events_tx.send(event);
    }

    /// Every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .calls
            .lock()
            .iter()
            .map(|recorded| recorded.call.clone())
            .collect()
    }

    /// Every call made so far, with timestamps.
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|recorded| predicate(&recorded.call))
            .count()
    }

    /// Wait until at least `n` calls have been made.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut count = self.inner.call_count.subscribe();
        let _ = count.wait_for(|len| *len >= n).await;
    }
}

impl std::fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer")
            .field("calls", &self.inner.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, request: &ConnectRequest, cancel: CancellationToken) -> Result<Opened> {
        self.inner.record(Call::Open {
            url: request.url().to_owned(),
            protocols: request.protocols().to_vec(),
            headers: request.header_list().to_vec(),
        });

        let mut behavior = self.inner.open.subscribe();
        let resolved = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Aborted("open cancelled".into())),
            resolved = behavior.wait_for(|b| *b != OpenBehavior::Hold) => {
                resolved.map(|b| (*b).clone())
            }
        };
        let behavior =
            resolved.map_err(|_| Error::OpenFailed("memory transport shut down".into()))?;

        match behavior {
            OpenBehavior::AcceptFirstProtocol => Ok(Opened {
                handle: HANDLE,
                protocol: request.protocols().first().cloned().unwrap_or_default(),
                extensions: String::new(),
            }),
            OpenBehavior::Accept {
                protocol,
                extensions,
            } => Ok(Opened {
                handle: HANDLE,
                protocol,
                extensions,
            }),
            OpenBehavior::Reject(message) => Err(Error::OpenFailed(message)),
            OpenBehavior::Hold => Err(Error::OpenFailed("open still held".into())),
        }
    }

    async fn next_event(&self, _handle: TransportHandle) -> TransportEvent {
        let mut events = self.inner.events_rx.lock().await;
        events
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Error("peer disconnected".into()))
    }

    fn send_text(&self, _handle: TransportHandle, text: String) -> Ack {
        self.inner.record(Call::SendText(text));
        acknowledge(&self.inner)
    }

    fn send_binary(&self, _handle: TransportHandle, data: Bytes) -> Ack {
        self.inner.record(Call::SendBinary(data));
        acknowledge(&self.inner)
    }

    fn send_ping(&self, _handle: TransportHandle) -> Ack {
        self.inner.record(Call::Ping);
        Box::pin(std::future::ready(self.inner.check_failure()))
    }

    fn close(&self, _handle: TransportHandle, code: Option<u16>, reason: Option<String>) -> Ack {
        self.inner.record(Call::Close {
            code,
            reason: reason.clone(),
        });
        let result = self.inner.check_failure();
        if result.is_ok() && self.inner.auto_echo_close.load(Ordering::Acquire) {
            let _ = self.inner.events_tx.send(TransportEvent::Close {
                code,
                reason: reason.unwrap_or_default(),
            });
        }
        Box::pin(std::future::ready(result))
    }
}
