//! Backpressure accounting for in-flight sends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running sum of bytes submitted to the transport but not yet acknowledged.
///
/// This is a counter, not a queue: sends may complete in any order and each
/// one only removes its own contribution.
#[derive(Debug, Clone, Default)]
pub struct BufferedAmount {
    bytes: Arc<AtomicU64>,
}

impl BufferedAmount {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of unacknowledged bytes.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Account for `len` bytes about to be submitted.
    ///
    /// The bytes are removed again when the returned ticket is dropped or
    /// [acknowledged](SendTicket::acknowledge), so the counter returns to zero
    /// even if a send is cancelled midway.
    #[must_use = "dropping the ticket releases the bytes immediately"]
    pub fn reserve(&self, len: usize) -> SendTicket {
        let len = len as u64;
        self.bytes.fetch_add(len, Ordering::AcqRel);
        SendTicket {
            bytes: Arc::clone(&self.bytes),
            len,
        }
    }
}

/// Bytes of one in-flight send.
#[derive(Debug)]
pub struct SendTicket {
    bytes: Arc<AtomicU64>,
    len: u64,
}

impl SendTicket {
    /// Number of bytes this ticket accounts for.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark the send as acknowledged by the transport.
    pub fn acknowledge(self) {
        drop(self);
    }
}

impl Drop for SendTicket {
    fn drop(&mut self) {
        self.bytes.fetch_sub(self.len, Ordering::AcqRel);
    }
}
