//! Concurrency tests for the send path and the close handshake.
//!
//! Exercises `buffered_amount` accounting and close idempotence under
//! concurrent callers on a multi-threaded runtime.

mod harness;

use std::sync::Arc;

use harness::{is_close, is_send};
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use wsengine::{
    Config, ConnectRequest, Connection, ConnectionState, MemoryPeer, MemoryTransport, Message,
    StreamOptions,
};

async fn open_connection() -> (Connection, MemoryPeer) {
    harness::init_tracing();
    let (transport, peer) = MemoryTransport::pair();
    let request = ConnectRequest::new("ws://concurrency.test", Vec::<String>::new()).unwrap();
    let (connection, opening) =
        Connection::connect(request, Arc::new(transport), Config::socket(), None);
    let events = opening.wait().await.unwrap();
    tokio::spawn(events.drain());
    (connection, peer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buffered_amount_is_running_sum() {
    let (connection, peer) = open_connection().await;
    peer.hold_acks();

    let mut set = JoinSet::new();
    let mut expected = 0u64;
    for i in 0..32usize {
        let payload = vec![0u8; i * 7 + 1];
        expected += payload.len() as u64;
        let pending = connection.send(Message::binary(payload)).unwrap();
        set.spawn(pending.acknowledged());
    }

    assert_eq!(connection.buffered_amount(), expected);
    peer.wait_for_calls(1 + 32).await;
    assert_eq!(connection.buffered_amount(), expected);

    // Release acknowledgements in uneven batches.
    for batch in [5, 1, 13, 2, 11] {
        peer.release_acks(batch);
        tokio::task::yield_now().await;
        assert!(connection.buffered_amount() <= expected);
    }

    while let Some(result) = set.join_next().await {
        result.unwrap().unwrap();
    }
    assert_eq!(connection.buffered_amount(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_return_to_zero() {
    let (ws, peer) = harness::stream(StreamOptions::new(), Config::stream());
    let opened = ws.opened().await.unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let mut set = JoinSet::new();
    for task in 0..8 {
        let writer = opened.writable.clone();
        let barrier = Arc::clone(&barrier);
        set.spawn(async move {
            barrier.wait().await;
            for n in 0..50 {
                writer.write(format!("task {task} message {n}")).await.unwrap();
            }
        });
    }

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
    assert_eq!(opened.writable.buffered_amount(), 0);
    assert_eq!(peer.count(is_send), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_sends_once() {
    let (connection, peer) = open_connection().await;
    let barrier = Arc::new(Barrier::new(16));

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let connection = connection.clone();
        let barrier = Arc::clone(&barrier);
        set.spawn(async move {
            barrier.wait().await;
            match connection.close(Some(1000), Some("race")).unwrap() {
                Some(pending) => {
                    pending.acknowledged().await.unwrap();
                    1
                }
                None => 0,
            }
        });
    }

    let mut sent = 0;
    while let Some(result) = set.join_next().await {
        sent += result.unwrap();
    }

    assert_eq!(sent, 1);
    connection.closed().await;
    assert_eq!(peer.count(is_close), 1);
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sends_racing_close() {
    let (connection, peer) = open_connection().await;

    let mut set = JoinSet::new();
    for n in 0..64 {
        let connection = connection.clone();
        set.spawn(async move {
            match connection.send(Message::text(format!("{n}"))) {
                Ok(pending) => pending.acknowledged().await.is_ok(),
                Err(_) => false,
            }
        });
    }
    if let Some(pending) = connection.close(None, None).unwrap() {
        pending.acknowledged().await.unwrap();
    }

    let mut forwarded = 0;
    while let Some(result) = set.join_next().await {
        if result.unwrap() {
            forwarded += 1;
        }
    }
    connection.closed().await;

    // Exactly the sends that reported success reached the transport, and
    // all of them ahead of the close frame.
    assert_eq!(peer.count(is_send), forwarded);
    let calls = peer.calls();
    let close = calls.iter().position(is_close).unwrap();
    assert!(calls[close..].iter().all(|c| !is_send(c)));
    assert_eq!(connection.buffered_amount(), 0);
    assert!(connection.send(Message::text("late")).is_err());
}
