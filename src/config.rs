//! Configuration and limits for WebSocket connections.

use std::time::Duration;

/// How inbound binary frames are surfaced by the event-dispatch facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BinaryType {
    /// Deliver binary payloads as an opaque [`Blob`](crate::message::Blob).
    #[default]
    Blob,
    /// Deliver binary payloads as raw bytes.
    ArrayBuffer,
}

impl std::fmt::Display for BinaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryType::Blob => write!(f, "blob"),
            BinaryType::ArrayBuffer => write!(f, "arraybuffer"),
        }
    }
}

/// Resource limits applied to outbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single outbound message in bytes.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Limits {
    /// Create new limits with a custom message size.
    #[must_use]
    pub const fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Idle timeout driving the keepalive scheduler.
    ///
    /// After `idle / 2` without inbound traffic a ping is sent; after another
    /// `idle / 2` without traffic the connection is closed with code 1001.
    /// `Duration::ZERO` disables keepalive.
    /// Default: disabled
    pub idle: Duration,

    /// Bounded wait for the peer to acknowledge a local close.
    ///
    /// `None` waits for the remote close event indefinitely.
    /// Default: None
    pub close: Option<Duration>,

    /// Bounded wait for the transport provider to open the connection.
    ///
    /// Default: None
    pub open: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idle: Duration::ZERO,
            close: None,
            open: None,
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(idle: Duration, close: Option<Duration>, open: Option<Duration>) -> Self {
        Self { idle, close, open }
    }
}

/// Close acknowledgement wait enforced by the stream facade.
pub const STREAM_CLOSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Timeout configuration.
    pub timeouts: Timeouts,

    /// Capacity of the stream facade's readable queue (in messages).
    ///
    /// Default: 16
    pub read_buffer: usize,

    /// Initial binary surfacing for the event-dispatch facade.
    ///
    /// Default: [`BinaryType::Blob`]
    pub binary_type: BinaryType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            read_buffer: 16,
            binary_type: BinaryType::Blob,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the keepalive idle timeout. `Duration::ZERO` disables keepalive.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.timeouts.idle = idle;
        self
    }

    /// Set the close acknowledgement timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, close: Option<Duration>) -> Self {
        self.timeouts.close = close;
        self
    }

    /// Set the open timeout.
    #[must_use]
    pub const fn with_open_timeout(mut self, open: Option<Duration>) -> Self {
        self.timeouts.open = open;
        self
    }

    /// Set the readable queue capacity of the stream facade.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub const fn with_read_buffer(mut self, messages: usize) -> Self {
        self.read_buffer = messages;
        self
    }

    /// Set the initial binary type of the event-dispatch facade.
    #[must_use]
    pub const fn with_binary_type(mut self, binary_type: BinaryType) -> Self {
        self.binary_type = binary_type;
        self
    }

    /// Configure for the event-dispatch facade (no close timeout).
    #[must_use]
    pub fn socket() -> Self {
        Self::default()
    }

    /// Configure for the stream facade (5 second close timeout).
    #[must_use]
    pub fn stream() -> Self {
        Self {
            timeouts: Timeouts {
                close: Some(STREAM_CLOSE_TIMEOUT),
                ..Timeouts::default()
            },
            ..Default::default()
        }
    }
}
