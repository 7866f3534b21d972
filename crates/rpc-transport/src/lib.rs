//! Duplex transport trait and in-memory implementation for the duplex RPC
//! session protocol.
//!
//! The protocol needs nothing more from a transport than a duplex,
//! ordered, message-oriented channel carrying UTF-8 text payloads, with
//! open/message/error/close signaling — see [`DuplexTransport`]. Concrete
//! wire transports (WebSocket, etc.) live in their own crates and
//! implement this trait; [`memory`] provides a same-process pair used by
//! `rpc-client`/`rpc-server`'s own tests and by any embedder that doesn't
//! need a real socket.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
mod transport;

pub use transport::{ConnectionId, DuplexTransport, TransportEvent};
