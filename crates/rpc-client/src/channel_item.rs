//! Local representations of callbacks and readable streams passed as call
//! arguments or results — the two kinds of channel item the protocol
//! transports via DTOs (see `rpc_channel_items` for the registries that
//! track their lifetime).
//!
//! Unlike the host runtime this protocol was distilled from, Rust has no
//! reflective object-graph walk to find callbacks buried inside an
//! arbitrary argument value. Callers instead pass channel items alongside
//! `args` as an explicit list, and mark their position in `args` with a
//! `{"$channelItemIndex": N}` placeholder; [`embed_channel_items`]
//! resolves those placeholders into real [`ChannelItemDto`]s immediately
//! before a frame is sent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

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

    /// Stable identity used as the `SentItems` key: two `Arc` clones of the
    /// same underlying item must compare equal so re-sending it reuses its
    /// existing id.
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

/// Walk `args`, replacing every `{"$channelItemIndex": N}` placeholder with
/// the [`ChannelItemDto`] assigned to `ids[N]`.
///
/// # Panics
///
/// Panics if `N` is out of bounds for `ids` — a caller-side programming
/// error (the placeholder must reference a real position in the
/// `channel_items` list passed to the same call), not a wire condition.
pub(crate) fn embed_channel_items(
    args: &serde_json::Value,
    kinds: &[ChannelItemKind],
    ids: &[u64],
) -> serde_json::Value {
    use serde_json::Value;

    match args {
        Value::Object(map) => {
            if let Some(Value::Number(n)) = map.get("$channelItemIndex") {
                let index = n.as_u64().expect("channel item index must be a u64") as usize;
                let dto = ChannelItemDto {
                    kind: kinds[index],
                    id: ids[index],
                };
                return serde_json::to_value(dto).expect("ChannelItemDto always serializes");
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), embed_channel_items(v, kinds, ids)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| embed_channel_items(v, kinds, ids))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_a_top_level_placeholder() {
        let args = serde_json::json!({"$channelItemIndex": 0});
        let out = embed_channel_items(&args, &[ChannelItemKind::Callback], &[7]);
        assert_eq!(out["_dtoType"], "Callback");
        assert_eq!(out["id"], 7);
    }

    #[test]
    fn replaces_a_nested_placeholder_inside_an_array() {
        let args = serde_json::json!([1, {"$channelItemIndex": 0}, "x"]);
        let out = embed_channel_items(&args, &[ChannelItemKind::Readable], &[3]);
        assert_eq!(out[1]["_dtoType"], "Readable");
        assert_eq!(out[1]["id"], 3);
        assert_eq!(out[0], 1);
        assert_eq!(out[2], "x");
    }

    #[test]
    fn leaves_ordinary_values_untouched() {
        let args = serde_json::json!({"a": 1, "b": [true, null]});
        let out = embed_channel_items(&args, &[], &[]);
        assert_eq!(out, args);
    }
}
