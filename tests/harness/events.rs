//! Collects the notifications an event-dispatch socket delivers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use wsengine::{CloseEvent, EventHandler, SocketEvent};

/// Shared, append-only record of socket events.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SocketEvent>>>,
    count: Arc<watch::Sender<usize>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(watch::channel(0).0),
        }
    }

    /// Handler that appends to this log.
    pub fn handler(&self) -> EventHandler {
        let log = self.clone();
        Box::new(move |event| {
            let mut events = log.events.lock();
            events.push(event);
            log.count.send_replace(events.len());
        })
    }

    pub fn snapshot(&self) -> Vec<SocketEvent> {
        self.events.lock().clone()
    }

    /// Wait until `n` events have been delivered.
    pub async fn wait_for(&self, n: usize) -> Vec<SocketEvent> {
        let mut count = self.count.subscribe();
        let _ = count.wait_for(|len| *len >= n).await;
        self.snapshot()
    }

    /// Wait for the final close event and return every event.
    pub async fn wait_for_close(&self) -> Vec<SocketEvent> {
        let mut count = self.count.subscribe();
        loop {
            let closed = matches!(self.events.lock().last(), Some(SocketEvent::Close(_)));
            if closed {
                return self.snapshot();
            }
            let seen = *count.borrow_and_update();
            let _ = count.wait_for(|len| *len > seen).await;
        }
    }

    /// The close event, if delivered.
    pub fn close_event(&self) -> Option<CloseEvent> {
        self.events.lock().iter().find_map(|event| match event {
            SocketEvent::Close(close) => Some(close.clone()),
            _ => None,
        })
    }
}
