//! The server-side connection: mirror of `rpc-client`'s `Connection`, per
//! the workspace's component 5 being "mirror of 4" — it owns the
//! transport, the channel-item registries, the cached cookie-session view,
//! and the per-security-group properties cache the receive path in
//! [`crate::handler`] consults.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rpc_channel_items::{ReceivedItemHandle, ReceivedItems, ReleaseNotice, SentItems};
use rpc_core::concurrency::DeferredResult;
use rpc_core::{Error, Result};
use rpc_protocol::session::SecurityPropertiesOfHttpRequest;
use rpc_protocol::{CachedCookieSession, CallResult, ServerFrame};
use rpc_security::tokenbox::TokenBox;
use rpc_transport::{ConnectionId, DuplexTransport};

use crate::channel_item::{ChannelItem, ChannelItemKey};
use crate::config::ServerConfig;
use crate::dispatch::MethodDispatcher;
use crate::validator::CookieSessionValidator;

/// The protocol version this crate speaks, announced on `init`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Per-connection state on the server side.
pub struct ServerConnection {
    pub(crate) id: ConnectionId,
    pub(crate) config: ServerConfig,
    pub(crate) transport: Arc<dyn DuplexTransport>,
    pub(crate) token_box: Arc<TokenBox>,
    pub(crate) validator: Arc<dyn CookieSessionValidator>,
    pub(crate) method_dispatcher: Arc<dyn MethodDispatcher>,
    pub(crate) outbound_sequence: AtomicU64,
    pub(crate) sent_items: SentItems<ChannelItemKey, ChannelItem>,
    pub(crate) received_items: ReceivedItems<ChannelItem>,
    pub(crate) release_notices: Mutex<mpsc::UnboundedReceiver<ReleaseNotice>>,
    pub(crate) cookie_session: Mutex<CachedCookieSession>,
    pub(crate) security_properties: DashMap<String, SecurityPropertiesOfHttpRequest>,
    pub(crate) fatal_error: Mutex<Option<Error>>,
    pub(crate) closed: AtomicBool,
    /// Down-calls this side has issued into a callback the client owns,
    /// awaiting the matching `methodDownCallResult`.
    pub(crate) pending_down_calls: DashMap<u64, Arc<DeferredResult<CallResult>>>,
    pub(crate) next_down_call_id: AtomicU64,
    /// Pulls this side has issued for the next chunk of a readable the
    /// client owns, awaiting the matching `streamData`.
    pub(crate) pending_stream_pulls: DashMap<u64, Arc<DeferredResult<Option<Vec<u8>>>>>,
}

impl ServerConnection {
    /// Accept a new connection over `transport`, assigning it a fresh
    /// random [`ConnectionId`].
    #[must_use]
    pub fn new(
        transport: Arc<dyn DuplexTransport>,
        config: ServerConfig,
        token_box: Arc<TokenBox>,
        validator: Arc<dyn CookieSessionValidator>,
        method_dispatcher: Arc<dyn MethodDispatcher>,
    ) -> Arc<Self> {
        let (received_items, release_notices) = ReceivedItems::new();
        Arc::new(Self {
            id: ConnectionId::new(uuid::Uuid::new_v4().to_string()),
            config,
            transport,
            token_box,
            validator,
            method_dispatcher,
            outbound_sequence: AtomicU64::new(0),
            sent_items: SentItems::new(),
            received_items,
            release_notices: Mutex::new(release_notices),
            cookie_session: Mutex::new(CachedCookieSession::Uninitialized),
            security_properties: DashMap::new(),
            fatal_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            pending_down_calls: DashMap::new(),
            next_down_call_id: AtomicU64::new(0),
            pending_stream_pulls: DashMap::new(),
        })
    }

    /// Claim the next down-call id.
    pub(crate) fn next_down_call_id(&self) -> u64 {
        self.next_down_call_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// This connection's assigned identity, bound into every question
    /// token it mints.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Claim the next monotone outbound sequence number.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.outbound_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send one frame, failing immediately if the connection already holds
    /// a fatal error.
    pub(crate) async fn send(&self, frame: ServerFrame) -> Result<()> {
        if let Some(err) = self.fatal_error.lock().clone() {
            return Err(err);
        }
        let json = serde_json::to_string(&frame)?;
        self.transport.send(json).await
    }

    /// Send the initial handshake frame announcing the protocol version.
    pub(crate) async fn send_init(&self) -> Result<()> {
        self.send(ServerFrame::Init {
            version: PROTOCOL_VERSION,
        })
        .await
    }

    /// `true` once a fatal error has been recorded.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The fatal error that closed this connection, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal_error.lock().clone()
    }

    /// Record a fatal error and mark the connection closed. Idempotent.
    pub(crate) fn fail(self: &Arc<Self>, err: Error) {
        {
            let mut guard = self.fatal_error.lock();
            if guard.is_some() {
                return;
            }
            *guard = Some(err);
        }
        self.closed.store(true, Ordering::SeqCst);

        let down_calls: Vec<_> = self
            .pending_down_calls
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.pending_down_calls.clear();
        let pulls: Vec<_> = self
            .pending_stream_pulls
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.pending_stream_pulls.clear();
        tokio::spawn(async move {
            for deferred in down_calls {
                deferred.reject().await;
            }
            for deferred in pulls {
                deferred.reject().await;
            }
        });
    }

    /// Close the connection from the server's own initiative.
    pub async fn close(self: &Arc<Self>, reason: &str) {
        self.fail(Error::connection_closed());
        self.transport.close(reason).await;
    }

    /// The currently cached cookie-session view.
    #[must_use]
    pub fn cookie_session(&self) -> CachedCookieSession {
        self.cookie_session.lock().clone()
    }

    /// Drain every release notice currently queued, turning each into an
    /// outbound `channelItemNotUsedAnymore` frame.
    pub(crate) async fn flush_release_notices(&self) {
        let notices: Vec<ReleaseNotice> = {
            let mut rx = self.release_notices.lock();
            let mut drained = Vec::new();
            while let Ok(notice) = rx.try_recv() {
                drained.push(notice);
            }
            drained
        };
        for notice in notices {
            let _ = self
                .send(ServerFrame::ChannelItemNotUsedAnymore {
                    item_id: notice.id,
                    time: notice.time,
                })
                .await;
        }
    }

    /// Materialize (or look up) the local proxy for a channel item the
    /// client sent.
    pub(crate) fn materialize_received_item(
        &self,
        id: u64,
        item: ChannelItem,
        inbound_sequence: u64,
    ) -> ReceivedItemHandle<ChannelItem> {
        self.received_items.materialize(id, item, inbound_sequence)
    }
}
