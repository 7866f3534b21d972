//! # rpc — bidirectional, session-aware duplex RPC
//!
//! A facade over the workspace's individual crates: pull in `rpc` and get
//! the wire codec, the channel-item registries, the security gate and token
//! box, the transport trait, and the client/server state machines under one
//! dependency.
//!
//! ## Layout
//!
//! - [`rpc_core`] — errors and the concurrency primitives (`SingleFlight`,
//!   `SingleFlightMap`, `LatestGreatest`, `DeferredResult`) the state
//!   machines are built on.
//! - [`rpc_wire`] — the `Codec` trait and its JSON/JSON-plus/length-prefixed
//!   implementations.
//! - [`rpc_protocol`] — the wire frames (`ClientFrame`/`ServerFrame`),
//!   `CallResult`, cookie-session types, and the sealed token payloads.
//! - [`rpc_channel_items`] — the sent/received channel-item registries and
//!   the GC-vs-race release protocol.
//! - [`rpc_security`] — the CSRF/origin gate and the AEAD token box.
//! - [`rpc_transport`] — the [`DuplexTransport`](rpc_transport::DuplexTransport)
//!   trait connections are built over, plus an in-memory pair for tests.
//! - [`rpc_client`] — [`Connection`](rpc_client::Connection) and
//!   [`do_call`](rpc_client::do_call), the client send-path retry loop.
//! - [`rpc_server`] — [`ServerConnection`](rpc_server::ServerConnection) and
//!   [`accept`](rpc_server::accept), the server receive-path state machine.
//!
//! Most embedders only need [`prelude`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use rpc_channel_items;
pub use rpc_client;
pub use rpc_core;
pub use rpc_protocol;
pub use rpc_security;
pub use rpc_server;
pub use rpc_transport;
pub use rpc_wire;

/// The types most embedders reach for first.
pub mod prelude {
    pub use rpc_core::concurrency::{DeferredResult, LatestGreatest, SingleFlight, SingleFlightMap};
    pub use rpc_core::{Error, Result};

    pub use rpc_protocol::call::{CallResult, ChannelItemDto, ChannelItemKind, ErrorPayload};
    pub use rpc_protocol::session::{
        CachedCookieSession, CookieSession, CookieSessionState, CsrfProtectionMode,
        SecurityPropertiesOfHttpRequest, SecurityRelevantSessionFields,
    };
    pub use rpc_protocol::{ClientFrame, ServerFrame};

    pub use rpc_transport::{ConnectionId, DuplexTransport, TransportEvent};

    pub use rpc_security::gate::{evaluate, GateDecision, GateRejection, GateRequest};
    pub use rpc_security::tokenbox::TokenBox;

    pub use rpc_client::{
        do_call, observe_cookie_state, open, BoxFuture as ClientBoxFuture,
        Callback as ClientCallback, CallOutcome, ChannelItem as ClientChannelItem, ClientConfig,
        Connection, ConnectionRegistry, HttpSessionCollaborator,
        ReadableSource as ClientReadableSource,
    };

    pub use rpc_server::{
        accept, AlwaysLatest, BoxFuture as ServerBoxFuture, Callback as ServerCallback,
        ChannelItem as ServerChannelItem, ChannelItemLookup, CookieSessionValidator,
        DispatchOutcome, DispatchRequest, MethodDispatcher, MethodOutcome,
        ReadableSource as ServerReadableSource, ServerConfig, ServerConnection,
    };

    pub use async_trait::async_trait;
}
