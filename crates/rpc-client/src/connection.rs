//! The client-side connection: owns the transport, the pending-call table,
//! the channel-item registries, and the cookie-session cache that the
//! retry loop in [`crate::call`] drives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rpc_channel_items::{ReceivedItemHandle, ReceivedItems, ReleaseNotice, SentItems};
use rpc_core::concurrency::{DeferredResult, SingleFlight, SingleFlightMap};
use rpc_core::{Error, Result};
use rpc_protocol::{CachedCookieSession, CallResult, ClientFrame, CookieSessionState};
use rpc_transport::DuplexTransport;

use crate::channel_item::{ChannelItem, ChannelItemKey};
use crate::config::ClientConfig;

/// Per-connection state shared between [`crate::call::do_call`] and the
/// background receive loop in [`crate::dispatcher`].
pub struct Connection {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn DuplexTransport>,
    pub(crate) outbound_sequence: AtomicU64,
    pub(crate) next_call_id: AtomicU64,
    pub(crate) pending_calls: DashMap<u64, Arc<DeferredResult<CallResult>>>,
    pub(crate) sent_items: SentItems<ChannelItemKey, ChannelItem>,
    pub(crate) received_items: ReceivedItems<ChannelItem>,
    pub(crate) release_notices: Mutex<mpsc::UnboundedReceiver<ReleaseNotice>>,
    pub(crate) fatal_error: Mutex<Option<Error>>,
    pub(crate) closed: AtomicBool,
    pub(crate) cookie_session: Mutex<CachedCookieSession>,
    pub(crate) last_set_on_server: Mutex<Option<CookieSessionState>>,
    pub(crate) last_stale_target: Mutex<Option<CookieSessionState>>,
    /// Collapses concurrent cookie-session resync attempts into one.
    pub(crate) fix_outdated_cookie_session: SingleFlight<CookieSessionState, Error>,
    /// Collapses concurrent HTTP-security-property fetches, keyed by
    /// `syncKey` (the security group).
    pub(crate) fetch_http_security_properties: SingleFlightMap<String, (), Error>,
}

impl Connection {
    /// Open a new connection over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn DuplexTransport>, config: ClientConfig) -> Arc<Self> {
        let (received_items, release_notices) = ReceivedItems::new();
        Arc::new(Self {
            config,
            transport,
            outbound_sequence: AtomicU64::new(0),
            next_call_id: AtomicU64::new(0),
            pending_calls: DashMap::new(),
            sent_items: SentItems::new(),
            received_items,
            release_notices: Mutex::new(release_notices),
            fatal_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            cookie_session: Mutex::new(CachedCookieSession::Uninitialized),
            last_set_on_server: Mutex::new(None),
            last_stale_target: Mutex::new(None),
            fix_outdated_cookie_session: SingleFlight::new(),
            fetch_http_security_properties: SingleFlightMap::new(),
        })
    }

    /// Claim the next monotone outbound sequence number.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.outbound_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Claim the next call id.
    pub(crate) fn next_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send one frame, failing immediately if the connection already holds
    /// a fatal error.
    pub(crate) async fn send(&self, frame: ClientFrame) -> Result<()> {
        if let Some(err) = self.fatal_error.lock().clone() {
            return Err(err);
        }
        let json = serde_json::to_string(&frame)?;
        self.transport.send(json).await
    }

    /// `true` once a fatal error has been recorded or the connection has
    /// otherwise closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The fatal error that closed this connection, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal_error.lock().clone()
    }

    /// Record a fatal error, reject every pending call, and mark the
    /// connection closed. Idempotent: a second call is a no-op.
    pub(crate) fn fail(self: &Arc<Self>, err: Error) {
        {
            let mut guard = self.fatal_error.lock();
            if guard.is_some() {
                return;
            }
            *guard = Some(err.clone());
        }
        self.closed.store(true, Ordering::SeqCst);
        warn!(error = %err, "client connection entering fatal state");

        let pending: Vec<_> = self
            .pending_calls
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.pending_calls.clear();
        let this = self.clone();
        tokio::spawn(async move {
            for deferred in pending {
                deferred
                    .resolve(CallResult::Error {
                        error: rpc_protocol::call::ErrorPayload::new(
                            "ConnectionClosed",
                            this.fatal_error().map(|e| e.message).unwrap_or_default(),
                        ),
                        http_status_code: None,
                    })
                    .await;
            }
        });
    }

    /// Close the connection from the client's own initiative.
    pub async fn close(self: &Arc<Self>, reason: &str) {
        self.fail(Error::connection_closed());
        self.transport.close(reason).await;
    }

    /// Drain every release notice currently queued, turning each into an
    /// outbound `channelItemNotUsedAnymore` frame.
    pub(crate) async fn flush_release_notices(self: &Arc<Self>) {
        let notices: Vec<ReleaseNotice> = {
            let mut rx = self.release_notices.lock();
            let mut drained = Vec::new();
            while let Ok(notice) = rx.try_recv() {
                drained.push(notice);
            }
            drained
        };
        for notice in notices {
            let sequence_number = self.next_sequence();
            debug!(item_id = notice.id, time = notice.time, "releasing channel item");
            let _ = self
                .send(ClientFrame::ChannelItemNotUsedAnymore {
                    sequence_number,
                    item_id: notice.id,
                    time: notice.time,
                })
                .await;
        }
    }

    /// Materialize (or look up) the local proxy for a channel item the
    /// server sent, e.g. embedded in a `methodCallResult`.
    pub(crate) fn materialize_received_item(
        &self,
        id: u64,
        item: ChannelItem,
        inbound_sequence: u64,
    ) -> ReceivedItemHandle<ChannelItem> {
        self.received_items.materialize(id, item, inbound_sequence)
    }
}
