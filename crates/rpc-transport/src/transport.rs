//! The [`DuplexTransport`] trait: the only thing the protocol's state
//! machines require of a wire transport.

use async_trait::async_trait;
use std::fmt;

/// Opaque identity of an accepted connection, assigned by the transport
/// (or its embedder) and threaded through the server state machine so
/// token envelopes can bind a question to the connection that asked it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ConnectionId {
    /// Wrap an existing identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// An event the transport reports to whoever is driving it.
///
/// The protocol only needs open/message/error/close — content negotiation,
/// TLS, and reconnection policy are all out of scope (§1) and live in the
/// concrete transport's own configuration.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel is open and ready to carry frames.
    Open,
    /// A text payload arrived. Frames are always UTF-8 strings (§4.2); a
    /// transport that receives a non-string payload must translate that
    /// into [`TransportEvent::Error`], never silently drop it.
    Message(String),
    /// A non-fatal transport error — typically a malformed frame from the
    /// peer, surfaced to let the owning state machine decide whether to
    /// treat it as a protocol violation.
    Error(String),
    /// The channel closed, with a reason string. Terminal: no further
    /// events follow.
    Close(String),
}

/// A duplex, ordered, message-oriented channel carrying UTF-8 frames.
///
/// This is every wire-level capability the client and server state
/// machines depend on. Concrete transports (WebSocket, in-process pipes
/// for tests) implement this trait; selecting and configuring one (TLS,
/// host/port, reconnect policy) is explicitly out of scope for the core
/// (§1) and lives in the transport crate that provides it.
#[async_trait]
pub trait DuplexTransport: Send + Sync {
    /// Send one frame. Implementations must preserve send order: frames
    /// submitted via successive calls to `send` must arrive at the peer in
    /// the same order, since the state machines rely on transport ordering
    /// for the channel-item release race-fix (§5).
    async fn send(&self, frame: String) -> rpc_core::Result<()>;

    /// Receive the next event. Returns `None` once the channel has
    /// permanently closed and no further events will ever be produced.
    async fn recv(&self) -> Option<TransportEvent>;

    /// Close the channel from this side, if not already closed.
    async fn close(&self, reason: &str);
}
