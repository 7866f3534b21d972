//! The client→server and server→client frame alphabet.
//!
//! Every `ClientFrame` carries a `sequence_number` that is monotone per
//! connection; the server uses it to detect reordering or drops from a
//! transport that does not itself guarantee in-order delivery and to
//! deduplicate retransmits.

use serde::{Deserialize, Serialize};

use crate::call::CallResult;
use crate::session::{CookieSessionState, SecurityPropertiesOfHttpRequest};

/// A frame sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Invoke a method. `call_id` is unique for the life of the connection
    /// and is echoed back on the matching `methodCallResult`.
    MethodCall {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// Identity of this call, for matching the eventual result.
        call_id: u64,
        /// Fully qualified method name.
        method: String,
        /// Arguments, with any callbacks/readables already replaced by
        /// [`crate::call::ChannelItemDto`] placeholders.
        args: serde_json::Value,
        /// Security group this call executes under.
        security_group: String,
    },
    /// Push a fresh cookie-session snapshot fetched over HTTP.
    SetCookieSession {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// The new session state, or `None` to mark the session destroyed.
        session: Option<CookieSessionState>,
        /// Full payload accompanying the state, mirrors
        /// [`crate::session::CookieSession::payload`].
        payload: Option<serde_json::Value>,
    },
    /// Refresh the server's cached view of this connection's HTTP security
    /// properties for one security group.
    UpdateHttpSecurityProperties {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// The security group being refreshed.
        security_group: String,
        /// The freshly observed properties.
        properties: SecurityPropertiesOfHttpRequest,
    },
    /// Ask the server to report its protocol version, used at connection
    /// start to negotiate compatibility before any real call is attempted.
    GetVersion {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
    },
    /// Deliver the client's side of a down-call (a call the server made
    /// into a callback the client is holding).
    MethodDownCallResult {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// Identity of the down-call this answers.
        down_call_id: u64,
        /// The outcome.
        result: CallResult,
    },
    /// Ask the server to produce the next chunk of a readable stream it
    /// owns.
    StreamDataRequest {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// Id of the readable, as assigned when it was first sent.
        stream_id: u64,
    },
    /// Inform the peer that a previously sent channel item will never be
    /// referenced again by this side, permitting garbage collection once
    /// both sides agree (see `rpc_channel_items`).
    ChannelItemNotUsedAnymore {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// Id of the released item.
        item_id: u64,
        /// Inbound sequence number last observed for this id at the moment
        /// the local proxy was dropped — the value the peer's `SentItems`
        /// registry compares against `last_time_sent` to decide the
        /// release race (see `rpc_channel_items::release`).
        time: u64,
    },
    /// Deliver a chunk of a readable stream the client owns, in answer to
    /// the server's `streamDataRequest`.
    StreamData {
        /// Monotone per-connection sequence number.
        sequence_number: u64,
        /// Id of the readable this chunk belongs to.
        stream_id: u64,
        /// Raw chunk bytes, or `None` to signal end-of-stream.
        chunk: Option<Vec<u8>>,
    },
}

impl ClientFrame {
    /// The monotone sequence number carried by every client frame.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        match self {
            Self::MethodCall { sequence_number, .. }
            | Self::SetCookieSession { sequence_number, .. }
            | Self::UpdateHttpSecurityProperties { sequence_number, .. }
            | Self::GetVersion { sequence_number }
            | Self::MethodDownCallResult { sequence_number, .. }
            | Self::StreamDataRequest { sequence_number, .. }
            | Self::ChannelItemNotUsedAnymore { sequence_number, .. }
            | Self::StreamData { sequence_number, .. } => *sequence_number,
        }
    }
}

/// A frame sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Sent once, immediately after the channel opens, announcing the
    /// protocol version the server speaks.
    Init {
        /// The server's protocol version.
        version: u32,
    },
    /// The outcome of a `methodCall`.
    MethodCallResult {
        /// Identity of the call this answers.
        call_id: u64,
        /// The outcome.
        result: CallResult,
    },
    /// The server invoking a callback the client is holding.
    DownCall {
        /// Identity of this down-call, unique for the life of the
        /// connection, echoed back on `methodDownCallResult`.
        down_call_id: u64,
        /// Id of the callback being invoked, as assigned when it was first
        /// sent to the server.
        callback_id: u64,
        /// Arguments to the callback.
        args: serde_json::Value,
    },
    /// Mirror of [`ClientFrame::ChannelItemNotUsedAnymore`] in the
    /// server-to-client direction.
    ChannelItemNotUsedAnymore {
        /// Id of the released item.
        item_id: u64,
        /// Inbound sequence number last observed for this id at the moment
        /// the local proxy was dropped.
        time: u64,
    },
    /// Mirror of [`ClientFrame::StreamDataRequest`] in the
    /// server-to-client direction: requests the next chunk of a readable
    /// that the client owns.
    StreamDataRequest {
        /// Id of the readable, as assigned when it was first sent.
        stream_id: u64,
    },
    /// Mirror of [`ClientFrame::StreamData`] in the server-to-client
    /// direction.
    StreamData {
        /// Id of the readable this chunk belongs to.
        stream_id: u64,
        /// Raw chunk bytes, or `None` to signal end-of-stream.
        chunk: Option<Vec<u8>>,
    },
    /// Answer to `getVersion`.
    GetVersion {
        /// The server's protocol version.
        version: u32,
    },
}
