//! Test harness utilities for engine and facade tests.
//!
//! Every test runs against the in-process [`MemoryTransport`]; this module
//! wires it up to each facade and collects what the facades report.

#![allow(dead_code)]

mod events;

use std::time::Duration;

use tokio::time::Instant;
use wsengine::transport::{Call, RecordedCall};
use wsengine::{Config, MemoryPeer, MemoryTransport, StreamOptions, WebSocket, WebSocketStream};

pub use events::EventLog;

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An event-dispatch socket connected to a scripted peer.
pub fn socket(config: Config) -> (WebSocket, MemoryPeer, EventLog) {
    init_tracing();
    let (transport, peer) = MemoryTransport::pair();
    let log = EventLog::new();
    let ws = WebSocket::with_config(
        "ws://harness.test/socket",
        ["chat"],
        transport,
        config,
        log.handler(),
    )
    .expect("valid request");
    (ws, peer, log)
}

/// A stream socket connected to a scripted peer.
pub fn stream(options: StreamOptions, config: Config) -> (WebSocketStream, MemoryPeer) {
    init_tracing();
    let (transport, peer) = MemoryTransport::pair();
    let ws = WebSocketStream::with_config("ws://harness.test/stream", options, transport, config)
        .expect("valid request");
    (ws, peer)
}

/// Wait for the `nth` (1-based) call matching `predicate` and return it.
pub async fn nth_call(
    peer: &MemoryPeer,
    nth: usize,
    predicate: impl Fn(&Call) -> bool,
) -> RecordedCall {
    loop {
        let recorded = peer.recorded();
        if let Some(call) = recorded
            .iter()
            .filter(|recorded| predicate(&recorded.call))
            .nth(nth - 1)
        {
            return call.clone();
        }
        peer.wait_for_calls(recorded.len() + 1).await;
    }
}

/// Assert `at - start` lies in `[expected, expected + 50ms)`.
pub fn assert_elapsed(start: Instant, at: Instant, expected: Duration) {
    let elapsed = at - start;
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

pub fn is_close(call: &Call) -> bool {
    matches!(call, Call::Close { .. })
}

pub fn is_ping(call: &Call) -> bool {
    matches!(call, Call::Ping)
}

pub fn is_send(call: &Call) -> bool {
    matches!(call, Call::SendText(_) | Call::SendBinary(_))
}
