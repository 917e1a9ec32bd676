//! Connection engine.
//!
//! A [`Connection`] owns the lifecycle of one transport connection: the open
//! task, the keepalive scheduler, the close handshake and its timeout, and
//! the single-assignment close outcome. Inbound traffic is consumed through
//! the [`EventLoop`] handed out once the open resolves.
//!
//! Lock order is always `slot` before `state`; the state watch is only
//! written while holding the slot lock so that the handle, the handshake and
//! the state never disagree.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::buffered::{BufferedAmount, SendTicket};
use super::close::{CloseDecision, CloseHandshake, CloseRequest, RemoteClose};
use super::keepalive::{KEEPALIVE_CLOSE_CODE, KEEPALIVE_CLOSE_REASON, Keepalive, KeepaliveAction};
use super::state::ConnectionState;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseEvent, CloseInfo, Message};
use crate::protocol::ConnectRequest;
use crate::transport::{Ack, Opened, Transport, TransportEvent, TransportHandle};

/// How a connection ended.
///
/// Published exactly once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Code, reason and cleanliness of the close.
    pub event: CloseEvent,
    /// The failure that ended the connection, if it did not close cleanly.
    pub error: Option<Error>,
}

impl Termination {
    /// A completed close handshake.
    #[must_use]
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            event: CloseEvent::clean(code, reason),
            error: None,
        }
    }

    /// A connection that ended because of `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self {
            event: CloseEvent::abnormal(),
            error: Some(error),
        }
    }

    /// The peer stopped answering keepalive pings.
    #[must_use]
    pub fn keepalive() -> Self {
        Self {
            event: CloseEvent {
                code: KEEPALIVE_CLOSE_CODE,
                reason: KEEPALIVE_CLOSE_REASON.to_owned(),
                was_clean: false,
            },
            error: Some(Error::KeepaliveTimeout),
        }
    }

    /// Returns `true` if no error is attached.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    /// The close info, or the error that ended the connection.
    ///
    /// # Errors
    ///
    /// Returns the attached error if there is one.
    pub fn result(&self) -> Result<CloseInfo> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.event.info()),
        }
    }
}

#[derive(Default)]
struct Slot {
    handle: Option<TransportHandle>,
    protocol: String,
    extensions: String,
    handshake: CloseHandshake,
    // Overrides the clean outcome once the peer acknowledges an engine-initiated close.
    pending: Option<Termination>,
    tasks: Vec<JoinHandle<()>>,
    finished: bool,
}

struct Shared {
    url: String,
    transport: Arc<dyn Transport>,
    config: Config,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
    buffered: BufferedAmount,
    outcome: watch::Sender<Option<Termination>>,
    liveness: Notify,
}

impl Shared {
    /// Move to `next` if legal. Callers hold the slot lock.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if !state.can_transition_to(next) {
                return false;
            }
            debug!(url = %self.url, from = %state, to = %next, "State transition");
            *state = next;
            true
        })
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish the outcome and release every resource. Only the first call
    /// has any effect.
    fn finish(&self, termination: Termination) -> bool {
        let tasks = {
            let mut slot = self.slot.lock();
            if slot.finished {
                return false;
            }
            slot.finished = true;
            slot.handle = None;
            slot.pending = None;
            self.state.send_if_modified(|state| {
                let changed = *state != ConnectionState::Closed;
                *state = ConnectionState::Closed;
                changed
            });
            std::mem::take(&mut slot.tasks)
        };

        for task in tasks {
            task.abort();
        }

        debug!(
            url = %self.url,
            code = termination.event.code,
            reason = %termination.event.reason,
            was_clean = termination.event.was_clean,
            error = ?termination.error,
            "Connection closed"
        );
        self.outcome.send_replace(Some(termination));
        true
    }
}

/// Handle to one connection.
///
/// Cheap to clone; every clone observes the same state.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .field("buffered_amount", &self.buffered_amount())
            .finish()
    }
}

impl Connection {
    /// Start opening a connection.
    ///
    /// Must be called inside a tokio runtime. The returned [`Opening`]
    /// resolves once the transport has opened (or failed to open) the
    /// connection. If `signal` fires before that, the connection goes
    /// straight to `Closed` with [`Error::Aborted`]; if it fires later, a
    /// normal close is started.
    pub fn connect(
        request: ConnectRequest,
        transport: Arc<dyn Transport>,
        config: Config,
        signal: Option<CancellationToken>,
    ) -> (Self, Opening) {
        let shared = Arc::new(Shared {
            url: request.url().to_owned(),
            transport,
            config,
            state: watch::channel(ConnectionState::Connecting).0,
            slot: Mutex::new(Slot::default()),
            buffered: BufferedAmount::new(),
            outcome: watch::channel(None).0,
            liveness: Notify::new(),
        });
        let connection = Connection { shared };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(connection.clone().run_open(request, signal, tx));

        (connection, Opening { rx })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Negotiated subprotocol (empty until open).
    #[must_use]
    pub fn protocol(&self) -> String {
        self.shared.slot.lock().protocol.clone()
    }

    /// Negotiated extensions (empty until open).
    #[must_use]
    pub fn extensions(&self) -> String {
        self.shared.slot.lock().extensions.clone()
    }

    /// Bytes submitted to the transport and not yet acknowledged.
    #[must_use]
    pub fn buffered_amount(&self) -> u64 {
        self.shared.buffered.get()
    }

    /// Configuration this connection runs with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The close outcome, if the connection has ended.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        self.shared.outcome.borrow().clone()
    }

    /// Wait for the connection to end.
    pub async fn closed(&self) -> Termination {
        let mut outcome = self.shared.outcome.subscribe();
        let termination = outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());
        termination
            .unwrap_or_else(|| Termination::failed(Error::Transport("connection dropped".into())))
    }

    /// Queue a message on the transport.
    ///
    /// The state check and the transport call happen under the connection
    /// lock, so a message is only ever handed to the transport while the
    /// connection is open. `buffered_amount` includes the message until the
    /// returned [`PendingSend`] sees the acknowledgement or is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the connection is open
    /// - [`Error::MessageTooLarge`] if the message exceeds the configured limit
    pub fn send(&self, message: Message) -> Result<PendingSend> {
        let shared = &self.shared;
        let slot = shared.slot.lock();
        let state = shared.current_state();
        let handle = match slot.handle {
            Some(handle) if state.can_send() => handle,
            _ => return Err(Error::InvalidState(state)),
        };

        shared.config.limits.check_message_size(message.len())?;

        let ticket = shared.buffered.reserve(message.len());
        trace!(
            url = %shared.url,
            len = message.len(),
            text = message.is_text(),
            "Send queued"
        );
        let ack = match message {
            Message::Text(text) => shared.transport.send_text(handle, text),
            Message::Binary(data) => shared.transport.send_binary(handle, data),
        };
        drop(slot);

        Ok(PendingSend {
            connection: self.clone(),
            ack,
            ticket,
        })
    }

    /// Start the close handshake.
    ///
    /// The close frame is queued on the transport before this returns; the
    /// [`PendingClose`] waits for its acknowledgement. Returns `None` when
    /// nothing was queued: the connection is still opening (the close is
    /// deferred until the open resolves) or a close is already underway.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCloseCode`] unless `code` is `1000` or in `3000..=4999`
    /// - [`Error::CloseReasonTooLong`] if `reason` exceeds 123 bytes
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<Option<PendingClose>> {
        let request = CloseRequest::new(code, reason)?;
        Ok(self.request_close(request))
    }

    fn request_close(&self, request: CloseRequest) -> Option<PendingClose> {
        let ack = {
            let mut slot = self.shared.slot.lock();
            let state = self.shared.current_state();
            match slot.handshake.request(state, request, Instant::now().into_std()) {
                CloseDecision::Noop => return None,
                CloseDecision::Abandon => {
                    self.shared.transition(ConnectionState::Closing);
                    debug!(url = %self.shared.url, "Close requested while connecting; abandoning");
                    return None;
                }
                CloseDecision::Send(request) => {
                    let handle = slot.handle?;
                    self.shared.transition(ConnectionState::Closing);
                    debug!(
                        url = %self.shared.url,
                        code = ?request.code(),
                        reason = ?request.reason(),
                        "Close requested"
                    );
                    self.queue_close(handle, &request)
                }
            }
        };

        self.arm_close_timeout();
        Some(PendingClose {
            connection: self.clone(),
            ack,
        })
    }

    /// Queue a close frame. Callers hold the slot lock.
    fn queue_close(&self, handle: TransportHandle, request: &CloseRequest) -> Ack {
        self.shared
            .transport
            .close(handle, request.code(), request.reason().map(str::to_owned))
    }

    fn register_task(&self, task: JoinHandle<()>) {
        let mut slot = self.shared.slot.lock();
        if slot.finished {
            task.abort();
        } else {
            slot.tasks.push(task);
        }
    }

    async fn run_open(
        self,
        request: ConnectRequest,
        signal: Option<CancellationToken>,
        tx: oneshot::Sender<Result<EventLoop>>,
    ) {
        debug!(url = %self.shared.url, protocols = ?request.protocols(), "Opening connection");

        let cancel = signal.clone().unwrap_or_default();
        let open = self.shared.transport.open(&request, cancel.child_token());
        let open = async {
            match self.shared.config.timeouts.open {
                Some(limit) => tokio::time::timeout(limit, open).await.unwrap_or_else(|_| {
                    Err(Error::OpenFailed(format!("no response within {limit:?}")))
                }),
                None => open.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Aborted("connection aborted before open".into())),
            result = open => result,
        };

        let outcome = match result {
            Ok(opened) => self.complete_open(opened, signal).await,
            Err(error) => {
                self.fail_open(error.clone());
                Err(error)
            }
        };
        let _ = tx.send(outcome);
    }

    async fn complete_open(
        &self,
        opened: Opened,
        signal: Option<CancellationToken>,
    ) -> Result<EventLoop> {
        let Opened {
            handle,
            protocol,
            extensions,
        } = opened;

        let deferred = {
            let mut slot = self.shared.slot.lock();
            slot.handle = Some(handle);
            slot.protocol = protocol;
            slot.extensions = extensions;
            match slot.handshake.take_abandoned(Instant::now().into_std()) {
                Some(request) => Some(self.queue_close(handle, &request)),
                None => {
                    self.shared.transition(ConnectionState::Open);
                    None
                }
            }
        };

        let events = EventLoop {
            connection: self.clone(),
            handle,
            outcome: self.shared.outcome.subscribe(),
            abandoned: deferred.is_some(),
        };

        match deferred {
            None => {
                debug!(url = %self.shared.url, %handle, "Connection open");
                self.start_keepalive();
                if let Some(signal) = signal {
                    self.watch_signal(signal);
                }
            }
            Some(ack) => {
                debug!(url = %self.shared.url, %handle, "Opened after close was requested; closing");
                self.arm_close_timeout();
                let pending = PendingClose {
                    connection: self.clone(),
                    ack,
                };
                let _ = pending.acknowledged().await;
            }
        }

        Ok(events)
    }

    fn fail_open(&self, error: Error) {
        let abandoned = self.shared.slot.lock().handshake.is_abandoned();
        warn!(url = %self.shared.url, %error, abandoned, "Open failed");
        self.shared.finish(Termination::failed(error));
    }

    fn watch_signal(&self, signal: CancellationToken) {
        let connection = self.clone();
        let task = tokio::spawn(async move {
            signal.cancelled().await;
            debug!(url = %connection.shared.url, "Abort signal fired; closing");
            if let Some(pending) = connection.request_close(CloseRequest::default()) {
                let _ = pending.acknowledged().await;
            }
        });
        self.register_task(task);
    }

    fn arm_close_timeout(&self) {
        let Some(limit) = self.shared.config.timeouts.close else {
            return;
        };
        let Some(sent_at) = self.shared.slot.lock().handshake.sent_at() else {
            return;
        };
        let deadline = Instant::from_std(sent_at) + limit;
        let connection = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if connection
                .shared
                .finish(Termination::failed(Error::CloseTimeout(limit)))
            {
                warn!(url = %connection.shared.url, ?limit, "Close handshake timed out");
            }
        });
        self.register_task(task);
    }

    fn start_keepalive(&self) {
        let Some(keepalive) = Keepalive::new(self.shared.config.timeouts.idle) else {
            return;
        };
        debug!(
            url = %self.shared.url,
            interval = ?keepalive.interval(),
            "Keepalive enabled"
        );
        let task = tokio::spawn(self.clone().run_keepalive(keepalive));
        self.register_task(task);
    }

    async fn run_keepalive(self, mut keepalive: Keepalive) {
        let mut state = self.subscribe_state();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(keepalive.interval()) => {}
                _ = self.shared.liveness.notified() => {
                    keepalive.on_liveness();
                    continue;
                }
                _ = state.wait_for(|s| *s != ConnectionState::Open) => return,
            }

            match keepalive.on_timeout() {
                KeepaliveAction::SendPing => {
                    let Some(ack) = self.queue_ping() else {
                        return;
                    };
                    if let Err(error) = ack.await {
                        warn!(url = %self.shared.url, %error, "Keepalive ping failed");
                    }
                }
                KeepaliveAction::Abort => {
                    self.abort_unresponsive().await;
                    return;
                }
            }
        }
    }

    fn queue_ping(&self) -> Option<Ack> {
        let slot = self.shared.slot.lock();
        if self.shared.current_state() != ConnectionState::Open {
            return None;
        }
        let handle = slot.handle?;
        trace!(url = %self.shared.url, "Sending keepalive ping");
        Some(self.shared.transport.send_ping(handle))
    }

    async fn abort_unresponsive(&self) {
        warn!(url = %self.shared.url, "No response from ping; closing");
        let request = CloseRequest::internal(KEEPALIVE_CLOSE_CODE, KEEPALIVE_CLOSE_REASON);
        let ack = {
            let mut slot = self.shared.slot.lock();
            let state = self.shared.current_state();
            match (
                slot.handshake.request(state, request, Instant::now().into_std()),
                slot.handle,
            ) {
                (CloseDecision::Send(request), Some(handle)) => {
                    self.shared.transition(ConnectionState::Closing);
                    slot.pending = Some(Termination::keepalive());
                    Some(self.queue_close(handle, &request))
                }
                _ => None,
            }
        };

        if let Some(ack) = ack {
            if let Err(error) = ack.await {
                debug!(url = %self.shared.url, %error, "Keepalive close failed");
            }
        }
        self.shared.finish(Termination::keepalive());
    }

    async fn on_remote_close(&self, handle: TransportHandle, code: Option<u16>, reason: String) {
        let (echo, pending) = {
            let mut slot = self.shared.slot.lock();
            let echo = match slot.handshake.on_remote_close() {
                RemoteClose::Acknowledgement => None,
                RemoteClose::PeerInitiated => {
                    self.shared.transition(ConnectionState::Closing);
                    let echo_reason = code.and(Some(reason.clone())).filter(|r| !r.is_empty());
                    Some(self.shared.transport.close(handle, code, echo_reason))
                }
            };
            (echo, slot.pending.take())
        };

        match echo {
            None => {
                debug!(url = %self.shared.url, ?code, %reason, "Close acknowledged by peer");
            }
            Some(ack) => {
                debug!(url = %self.shared.url, ?code, %reason, "Peer started close; echoed");
                if let Err(error) = ack.await {
                    debug!(url = %self.shared.url, %error, "Close echo failed");
                }
            }
        }

        let code = code.unwrap_or(CloseCode::NoStatus.as_u16());
        let termination = pending.unwrap_or_else(|| Termination::clean(code, reason));
        self.shared.finish(termination);
    }
}

/// Resolves when the transport has opened, or failed to open, a connection.
#[derive(Debug)]
#[must_use = "the connection's inbound events are only read through the event loop"]
pub struct Opening {
    rx: oneshot::Receiver<Result<EventLoop>>,
}

impl Opening {
    /// Wait for the open to resolve.
    ///
    /// # Errors
    ///
    /// Returns the open failure, or [`Error::Aborted`] if the abort signal
    /// fired first.
    pub async fn wait(self) -> Result<EventLoop> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Error::Aborted("open task cancelled".into())))
    }
}

/// Inbound side of an open connection.
///
/// There is exactly one per connection.
pub struct EventLoop {
    connection: Connection,
    handle: TransportHandle,
    outcome: watch::Receiver<Option<Termination>>,
    abandoned: bool,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}

impl EventLoop {
    /// The connection this loop reads from.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns `true` if `close()` was called before the open completed.
    #[must_use]
    pub const fn was_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Next inbound message, or `None` once the connection has ended.
    ///
    /// Pongs only count as liveness. A close frame completes (or answers)
    /// the close handshake; a transport error ends the connection.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            if self.outcome.borrow().is_some() {
                return None;
            }

            let event = tokio::select! {
                biased;
                _ = self.outcome.wait_for(Option::is_some) => return None,
                event = self.connection.shared.transport.next_event(self.handle) => event,
            };

            let shared = &self.connection.shared;
            match event {
                TransportEvent::Text(text) => {
                    shared.liveness.notify_one();
                    return Some(Message::Text(text));
                }
                TransportEvent::Binary(data) => {
                    shared.liveness.notify_one();
                    return Some(Message::Binary(data));
                }
                TransportEvent::Pong => {
                    trace!(url = %shared.url, "Pong received");
                    shared.liveness.notify_one();
                }
                TransportEvent::Error(message) => {
                    warn!(url = %shared.url, error = %message, "Transport error");
                    shared.finish(Termination::failed(Error::Transport(message)));
                    return None;
                }
                TransportEvent::Close { code, reason } => {
                    self.connection
                        .on_remote_close(self.handle, code, reason)
                        .await;
                    return None;
                }
            }
        }
    }

    /// Read and discard messages until the connection ends.
    pub async fn drain(mut self) -> Termination {
        while self.next().await.is_some() {}
        self.connection.closed().await
    }
}

/// A queued send waiting for the transport's acknowledgement.
///
/// The message is already on the transport. Dropping this releases its
/// bytes from `buffered_amount` without waiting.
#[must_use = "buffered_amount only drops once the acknowledgement is awaited"]
pub struct PendingSend {
    connection: Connection,
    ack: Ack,
    ticket: SendTicket,
}

impl std::fmt::Debug for PendingSend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSend")
            .field("url", &self.connection.shared.url)
            .field("len", &self.ticket.len())
            .finish()
    }
}

impl PendingSend {
    /// Payload length in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.ticket.len()
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ticket.is_empty()
    }

    /// Wait for the transport to take the message.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn acknowledged(self) -> Result<()> {
        let PendingSend {
            connection,
            ack,
            ticket,
        } = self;

        let result = ack.await;
        ticket.acknowledge();

        if let Err(error) = &result {
            debug!(url = %connection.shared.url, %error, "Send failed");
        }
        result
    }
}

/// A queued close frame waiting for the transport's acknowledgement.
#[must_use = "a failed close is only reported once the acknowledgement is awaited"]
pub struct PendingClose {
    connection: Connection,
    ack: Ack,
}

impl std::fmt::Debug for PendingClose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingClose")
            .field("url", &self.connection.shared.url)
            .finish()
    }
}

impl PendingClose {
    /// Wait for the transport to take the close frame.
    ///
    /// A transport failure ends the connection with that error.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn acknowledged(self) -> Result<()> {
        let PendingClose { connection, ack } = self;

        let result = ack.await;
        if let Err(error) = &result {
            warn!(url = %connection.shared.url, %error, "Close failed");
            connection.shared.finish(Termination::failed(error.clone()));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::STREAM_CLOSE_TIMEOUT;
    use crate::transport::{Call, MemoryPeer, MemoryTransport, OpenBehavior};

    fn connect(config: Config) -> (Connection, Opening, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        let request = ConnectRequest::new("ws://engine.test/", ["chat"]).unwrap();
        let (connection, opening) =
            Connection::connect(request, Arc::new(transport), config, None);
        (connection, opening, peer)
    }

    #[tokio::test]
    async fn test_open_assigns_identity() {
        let (connection, opening, _peer) = connect(Config::socket());
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(connection.protocol(), "");

        let events = opening.wait().await.unwrap();
        assert!(!events.was_abandoned());
        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(connection.protocol(), "chat");
        assert_eq!(connection.url(), "ws://engine.test/");
    }

    #[tokio::test]
    async fn test_open_failure_closes() {
        let (transport, peer) = MemoryTransport::pair();
        peer.set_open(OpenBehavior::Reject("refused".into()));
        let request = ConnectRequest::new("ws://engine.test/", Vec::<String>::new()).unwrap();
        let (connection, opening) =
            Connection::connect(request, Arc::new(transport), Config::socket(), None);

        let error = opening.wait().await.unwrap_err();
        assert_eq!(error, Error::OpenFailed("refused".into()));
        assert_eq!(connection.state(), ConnectionState::Closed);

        let termination = connection.closed().await;
        assert_eq!(termination.event, CloseEvent::abnormal());
        assert_eq!(termination.error, Some(error));
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (connection, opening, peer) = connect(Config::socket());
        peer.set_open(OpenBehavior::Hold);
        let error = connection.send(Message::text("early")).unwrap_err();
        assert_eq!(error, Error::InvalidState(ConnectionState::Connecting));
        peer.set_open(OpenBehavior::AcceptFirstProtocol);
        let _events = opening.wait().await.unwrap();
        assert_eq!(peer.count(|c| matches!(c, Call::SendText(_))), 0);
    }

    #[tokio::test]
    async fn test_send_accounts_until_acknowledged() {
        let (connection, opening, peer) = connect(Config::socket());
        let _events = opening.wait().await.unwrap();
        peer.hold_acks();

        let pending = connection.send(Message::text("hello")).unwrap();
        assert_eq!(connection.buffered_amount(), 5);
        assert_eq!(peer.calls()[1], Call::SendText("hello".into()));
        let task = tokio::spawn(pending.acknowledged());
        tokio::task::yield_now().await;
        assert_eq!(connection.buffered_amount(), 5);

        peer.release_acks(1);
        task.await.unwrap().unwrap();
        assert_eq!(connection.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn test_oversized_send_rejected() {
        let config = Config::socket().with_limits(crate::config::Limits::new(4));
        let (connection, opening, _peer) = connect(config);
        let _events = opening.wait().await.unwrap();

        let error = connection.send(Message::binary(vec![0u8; 5])).unwrap_err();
        assert_eq!(error, Error::MessageTooLarge { size: 5, max: 4 });
        assert_eq!(connection.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn test_local_close_handshake() {
        let (connection, opening, peer) = connect(Config::socket());
        let mut events = opening.wait().await.unwrap();

        let pending = connection.close(Some(1000), Some("done")).unwrap().unwrap();
        assert_eq!(connection.state(), ConnectionState::Closing);
        assert!(connection.close(Some(1000), None).unwrap().is_none());
        pending.acknowledged().await.unwrap();

        assert_eq!(events.next().await, None);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(
            connection.closed().await,
            Termination::clean(1000, "done")
        );
        assert_eq!(peer.count(|c| matches!(c, Call::Close { .. })), 1);
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed_once() {
        let (connection, opening, peer) = connect(Config::socket());
        let mut events = opening.wait().await.unwrap();

        peer.close(Some(4000), "going");
        assert_eq!(events.next().await, None);
        assert_eq!(connection.closed().await, Termination::clean(4000, "going"));
        assert_eq!(
            peer.calls().last(),
            Some(&Call::Close {
                code: Some(4000),
                reason: Some("going".into())
            })
        );
        assert!(connection.close(None, None).unwrap().is_none());
        assert_eq!(peer.count(|c| matches!(c, Call::Close { .. })), 1);
    }

    #[tokio::test]
    async fn test_peer_close_without_code_reports_no_status() {
        let (connection, opening, peer) = connect(Config::socket());
        let mut events = opening.wait().await.unwrap();
        peer.close(None, "");
        assert_eq!(events.next().await, None);
        assert_eq!(connection.closed().await.event.code, 1005);
    }

    #[tokio::test]
    async fn test_transport_error_ends_connection() {
        let (connection, opening, peer) = connect(Config::socket());
        let mut events = opening.wait().await.unwrap();
        peer.send_text("before");
        peer.error("reset by peer");

        assert_eq!(events.next().await, Some(Message::text("before")));
        assert_eq!(events.next().await, None);
        let termination = connection.closed().await;
        assert!(!termination.event.was_clean);
        assert_eq!(
            termination.error,
            Some(Error::Transport("reset by peer".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_timeout() {
        let config = Config::socket().with_close_timeout(Some(STREAM_CLOSE_TIMEOUT));
        let (connection, opening, peer) = connect(config);
        peer.set_auto_echo_close(false);
        let events = opening.wait().await.unwrap();

        connection
            .close(None, None)
            .unwrap()
            .unwrap()
            .acknowledged()
            .await
            .unwrap();
        let termination = events.drain().await;
        assert_eq!(
            termination.error,
            Some(Error::CloseTimeout(Duration::from_secs(5)))
        );
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_termination_result() {
        assert_eq!(
            Termination::clean(1000, "ok").result(),
            Ok(CloseInfo::new(1000u16, "ok"))
        );
        assert_eq!(
            Termination::keepalive().result(),
            Err(Error::KeepaliveTimeout)
        );
        let failed = Termination::failed(Error::OpenFailed("refused".into()));
        assert!(!failed.is_clean());
        assert!(!failed.event.was_clean);
        assert_eq!(failed.result(), Err(Error::OpenFailed("refused".into())));
    }

    #[tokio::test]
    async fn test_close_queued_before_close_returns() {
        let (connection, opening, peer) = connect(Config::socket());
        peer.set_auto_echo_close(false);
        let _events = opening.wait().await.unwrap();

        let _send = connection.send(Message::text("first")).unwrap();
        let _close = connection.close(Some(1000), None).unwrap().unwrap();
        assert_eq!(
            &peer.calls()[1..],
            &[
                Call::SendText("first".into()),
                Call::Close {
                    code: Some(1000),
                    reason: None
                },
            ]
        );
        assert!(connection.send(Message::text("second")).is_err());
        assert_eq!(peer.count(|c| matches!(c, Call::SendText(_))), 1);
    }

    #[tokio::test]
    async fn test_open_failure_after_close_keeps_error() {
        let (connection, opening, peer) = connect(Config::socket());
        peer.set_open(OpenBehavior::Hold);
        assert!(connection.close(None, None).unwrap().is_none());
        peer.set_open(OpenBehavior::Reject("unreachable".into()));

        let error = opening.wait().await.unwrap_err();
        assert_eq!(error, Error::OpenFailed("unreachable".into()));
        let termination = connection.closed().await;
        assert_eq!(termination.event, CloseEvent::abnormal());
        assert_eq!(termination.error, Some(error));
        assert_eq!(peer.count(|c| matches!(c, Call::Close { .. })), 0);
    }
}
