//! Local representations of callbacks and readable streams passed as call
//! arguments or results, mirroring `rpc-client`'s own copy — the server
//! side of the same symmetric registry design (component 5 is "mirror of
//! 4"), materializing client-sent callbacks as locally invocable proxies
//! rather than minting them for a peer to invoke.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rpc_channel_items::ReceivedItemHandle;
use rpc_protocol::{ChannelItemDto, ChannelItemKind};

/// A future boxed for storage behind a trait object.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A callback function the peer may invoke as a down-call.
pub trait Callback: Send + Sync {
    /// Invoke the callback with `args`, producing the outcome reported
    /// back on `methodDownCallResult`.
    fn call(&self, args: serde_json::Value) -> BoxFuture<'static, rpc_protocol::CallResult>;
}

/// A readable byte stream the peer may pull from via `streamDataRequest`.
pub trait ReadableSource: Send + Sync {
    /// Produce the next chunk, or `None` at end of stream.
    fn next_chunk(&self) -> BoxFuture<'static, Option<Vec<u8>>>;
}

/// Either kind of channel item, held by whichever side currently owns it.
#[derive(Clone)]
pub enum ChannelItem {
    /// A callback this side can invoke on behalf of the peer.
    Callback(Arc<dyn Callback>),
    /// A readable stream this side can pull chunks from on behalf of the
    /// peer.
    Readable(Arc<dyn ReadableSource>),
}

impl ChannelItem {
    /// The DTO kind this item serializes to.
    #[must_use]
    pub fn kind(&self) -> ChannelItemKind {
        match self {
            Self::Callback(_) => ChannelItemKind::Callback,
            Self::Readable(_) => ChannelItemKind::Readable,
        }
    }

    /// View this item as a callback, if that's what it is.
    #[must_use]
    pub fn as_callback(&self) -> Option<&Arc<dyn Callback>> {
        match self {
            Self::Callback(cb) => Some(cb),
            Self::Readable(_) => None,
        }
    }

    /// View this item as a readable, if that's what it is.
    #[must_use]
    pub fn as_readable(&self) -> Option<&Arc<dyn ReadableSource>> {
        match self {
            Self::Readable(r) => Some(r),
            Self::Callback(_) => None,
        }
    }

    /// Stable identity used as the `SentItems` key.
    #[must_use]
    pub fn identity(&self) -> ChannelItemKey {
        let ptr = match self {
            Self::Callback(cb) => Arc::as_ptr(cb) as *const () as usize,
            Self::Readable(r) => Arc::as_ptr(r) as *const () as usize,
        };
        ChannelItemKey(ptr)
    }
}

/// Pointer-identity key for a [`ChannelItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelItemKey(usize);

/// What a [`crate::dispatch::MethodDispatcher`] consults to resolve a
/// [`ChannelItemDto`] found in call arguments back into the proxy
/// materialized for it.
///
/// Returns the full [`ReceivedItemHandle`] rather than the bare trait
/// object: a dispatcher that wants to retain an item past the lifetime of
/// this one call (e.g. registering a callback as a long-lived event
/// listener) must clone the handle it is handed, which keeps the item
/// alive and holds off the release notice for as long as the clone lives.
/// Anything a dispatcher does not retain is released once the call
/// returns and the materializing side drops its own copy.
pub trait ChannelItemLookup: Send + Sync {
    /// Resolve `id` to the handle materialized for it, if `id` names a
    /// callback present in this call's arguments.
    fn resolve_callback(&self, id: u64) -> Option<ReceivedItemHandle<ChannelItem>>;

    /// Resolve `id` to the handle materialized for it, if `id` names a
    /// readable present in this call's arguments.
    fn resolve_readable(&self, id: u64) -> Option<ReceivedItemHandle<ChannelItem>>;
}

/// A fixed set of handles materialized for one `methodCall`'s arguments,
/// implementing [`ChannelItemLookup`] over a plain lookup table.
pub struct MaterializedChannelItems {
    pub(crate) by_id: HashMap<u64, ReceivedItemHandle<ChannelItem>>,
}

impl ChannelItemLookup for MaterializedChannelItems {
    fn resolve_callback(&self, id: u64) -> Option<ReceivedItemHandle<ChannelItem>> {
        let handle = self.by_id.get(&id)?;
        handle.item().as_callback()?;
        Some(handle.clone())
    }

    fn resolve_readable(&self, id: u64) -> Option<ReceivedItemHandle<ChannelItem>> {
        let handle = self.by_id.get(&id)?;
        handle.item().as_readable()?;
        Some(handle.clone())
    }
}

/// Walk `args` collecting every [`ChannelItemDto`] found, for materializing
/// proxies before a method call runs (mirror of `embed_channel_items` in
/// the opposite direction: finding DTOs rather than placing them).
pub(crate) fn scan_channel_item_dtos(args: &serde_json::Value, out: &mut Vec<ChannelItemDto>) {
    use serde_json::Value;

    match args {
        Value::Object(map) => {
            if let Ok(dto) = serde_json::from_value::<ChannelItemDto>(Value::Object(map.clone())) {
                out.push(dto);
                return;
            }
            for value in map.values() {
                scan_channel_item_dtos(value, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_channel_item_dtos(item, out);
            }
        }
        _ => {}
    }
}

/// A proxy for a callback the *client* owns, materialized when the client
/// embeds one as a `methodCall` argument. Invoking it sends a `downCall`
/// frame and awaits the matching `methodDownCallResult`.
pub struct RemoteCallback {
    pub(crate) connection: std::sync::Weak<crate::connection::ServerConnection>,
    pub(crate) callback_id: u64,
}

impl Callback for RemoteCallback {
    fn call(&self, args: serde_json::Value) -> BoxFuture<'static, rpc_protocol::CallResult> {
        let connection = self.connection.clone();
        let callback_id = self.callback_id;
        Box::pin(async move {
            let Some(connection) = connection.upgrade() else {
                return rpc_protocol::CallResult::Error {
                    error: rpc_protocol::call::ErrorPayload::new(
                        "ConnectionClosed",
                        "connection no longer available for down-call",
                    ),
                    http_status_code: None,
                };
            };
            crate::dispatcher::down_call(&connection, callback_id, args).await
        })
    }
}

/// A proxy for a readable stream the *client* owns, materialized when the
/// client embeds one as a `methodCall` argument. Pulling a chunk sends a
/// `streamDataRequest` frame and awaits the matching `streamData`.
pub struct RemoteReadable {
    pub(crate) connection: std::sync::Weak<crate::connection::ServerConnection>,
    pub(crate) stream_id: u64,
}

impl ReadableSource for RemoteReadable {
    fn next_chunk(&self) -> BoxFuture<'static, Option<Vec<u8>>> {
        let connection = self.connection.clone();
        let stream_id = self.stream_id;
        Box::pin(async move {
            let connection = connection.upgrade()?;
            crate::dispatcher::pull_stream_chunk(&connection, stream_id).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_a_dto_nested_inside_an_array() {
        let args = serde_json::json!({
            "name": "widget",
            "listeners": [{"_dtoType": "Callback", "id": 3}],
        });
        let mut found = Vec::new();
        scan_channel_item_dtos(&args, &mut found);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 3);
        assert_eq!(found[0].kind, ChannelItemKind::Callback);
    }

    #[test]
    fn scan_finds_nothing_in_plain_arguments() {
        let args = serde_json::json!({"name": "widget", "count": 2});
        let mut found = Vec::new();
        scan_channel_item_dtos(&args, &mut found);
        assert!(found.is_empty());
    }
}
