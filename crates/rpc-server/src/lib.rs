//! Server-side state machine for the duplex RPC session protocol.
//!
//! A [`ServerConnection`] is the mirror of `rpc-client`'s `Connection`: it
//! owns one transport for the life of an accepted connection, the
//! channel-item registries for callbacks/readables crossing in either
//! direction, and the cached cookie-session view the receive path in
//! [`dispatcher`] drives through the 9-step `methodCall` algorithm. Unlike
//! the client there is no URL-keyed registry here — a server simply
//! [`accept`]s a transport per incoming connection.
//!
//! [`dispatch::MethodDispatcher`] is the one seam this crate does not
//! implement: argument typechecking, the security gate re-invocation on
//! session access, and the user method itself all live behind it, supplied
//! by the embedder.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel_item;
mod config;
mod connection;
mod dispatch;
mod dispatcher;
mod validator;

use std::sync::Arc;

use rpc_security::tokenbox::TokenBox;
use rpc_transport::DuplexTransport;

pub use channel_item::{
    BoxFuture, Callback, ChannelItem, ChannelItemKey, ChannelItemLookup, ReadableSource,
};
pub use config::ServerConfig;
pub use connection::{PROTOCOL_VERSION, ServerConnection};
pub use dispatch::{DispatchOutcome, DispatchRequest, MethodDispatcher, MethodOutcome};
pub use validator::{AlwaysLatest, CookieSessionValidator};

/// Accept a connection over `transport`: constructs the [`ServerConnection`],
/// sends the initial `init` handshake, and spawns its background receive
/// loop.
#[must_use]
pub fn accept(
    transport: Arc<dyn DuplexTransport>,
    config: ServerConfig,
    token_box: Arc<TokenBox>,
    validator: Arc<dyn CookieSessionValidator>,
    method_dispatcher: Arc<dyn MethodDispatcher>,
) -> Arc<ServerConnection> {
    let connection = ServerConnection::new(transport, config, token_box, validator, method_dispatcher);
    dispatcher::spawn(connection.clone());
    connection
}
