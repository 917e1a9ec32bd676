//! # wsengine - Client-side WebSocket protocol engine
//!
//! `wsengine` turns a validated connection request into a live, full-duplex
//! message channel and manages it through its four lifecycle states. It does
//! not do socket I/O or framing itself: those are delegated to a
//! [`Transport`] provider.
//!
//! ## Features
//!
//! - **Four-state lifecycle** (`Connecting`, `Open`, `Closing`, `Closed`) with a
//!   single, exactly-once close outcome
//! - **Keepalive** with a two-strike ping policy driven by an idle timeout
//! - **Close handshake** reconciliation of local and peer-initiated closes,
//!   with an optional bounded wait for the peer's acknowledgement
//! - **Backpressure accounting** (`buffered_amount`) for in-flight sends
//! - **Two facades** over the same engine: an event-dispatch [`WebSocket`]
//!   and a readable/writable [`WebSocketStream`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsengine::{SocketEvent, WebSocket};
//!
//! let ws = WebSocket::connect("wss://example.com/chat", ["chat"], transport, |event| {
//!     println!("{event:?}");
//! })?;
//! ws.send("hello")?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod socket;
#[cfg(feature = "async-tokio")]
pub mod stream;
#[cfg(feature = "async-tokio")]
pub mod transport;

pub use config::{BinaryType, Config, Limits, STREAM_CLOSE_TIMEOUT, Timeouts};
#[cfg(feature = "async-tokio")]
pub use connection::{Connection, EventLoop, Opening, PendingClose, PendingSend, Termination};
pub use connection::{CloseRequest, ConnectionState, Keepalive, KeepaliveAction};
pub use error::{Error, ErrorKind, Result};
pub use message::{Blob, CloseCode, CloseEvent, CloseInfo, Message, MessageData};
pub use protocol::ConnectRequest;

#[cfg(feature = "async-tokio")]
pub use socket::{EventHandler, SocketEvent, WebSocket};
#[cfg(feature = "async-tokio")]
pub use stream::{OpenedStream, StreamOptions, WebSocketReader, WebSocketStream, WebSocketWriter};
#[cfg(feature = "async-tokio")]
pub use transport::{
    Ack, MemoryPeer, MemoryTransport, Transport, TransportEvent, TransportHandle,
};
