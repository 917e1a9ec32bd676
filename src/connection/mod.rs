//! Connection engine and its state machines.
//!
//! The runtime-free pieces (lifecycle state, keepalive policy, close
//! handshake bookkeeping and send accounting) are usable on their own. The
//! `Connection` that drives them on tokio is behind the `async-tokio`
//! feature.
//!
//! ## Connection Lifecycle
//!
//! 1. **Connecting** - The transport is opening the connection
//! 2. **Open** - Messages flow both ways; keepalive is running
//! 3. **Closing** - Close sent (or abandoned before open), waiting for the peer
//! 4. **Closed** - Outcome published, transport handle released
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsengine::{Config, ConnectRequest, Connection, Message};
//!
//! let request = ConnectRequest::new("wss://example.com/chat", ["chat"])?;
//! let (conn, opening) = Connection::connect(request, Arc::new(transport), Config::socket(), None);
//! let mut events = opening.wait().await?;
//!
//! conn.send(Message::text("Hello"))?.acknowledged().await?;
//! while let Some(msg) = events.next().await {
//!     println!("Received: {:?}", msg);
//! }
//! ```

pub mod buffered;
pub mod close;
pub mod keepalive;
mod state;

pub use buffered::{BufferedAmount, SendTicket};
pub use close::{CloseDecision, CloseHandshake, CloseRequest, MAX_CLOSE_REASON_BYTES, RemoteClose};
pub use keepalive::{Keepalive, KeepaliveAction, KeepalivePhase};
pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
#[allow(clippy::module_inception)]
mod connection;

#[cfg(feature = "async-tokio")]
pub use connection::{Connection, EventLoop, Opening, PendingClose, PendingSend, Termination};
