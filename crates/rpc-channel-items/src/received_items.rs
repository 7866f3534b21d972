//! The receiving side's registry of proxies materialized for the peer's
//! channel items.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::release::ReleaseNotice;

struct ReceivedItemGuard<T> {
    id: u64,
    item: T,
    last_known_inbound_sequence: AtomicU64,
    release_tx: mpsc::UnboundedSender<ReleaseNotice>,
}

impl<T> Drop for ReceivedItemGuard<T> {
    fn drop(&mut self) {
        let time = self.last_known_inbound_sequence.load(Ordering::SeqCst);
        // The receiver is gone; this is the best-effort equivalent of the
        // host runtime's GC finalizer. A closed channel means the
        // connection has already torn down its registries, in which case
        // there is nothing left to notify.
        let _ = self.release_tx.send(ReleaseNotice { id: self.id, time });
    }
}

/// A handle to a materialized callback/readable proxy.
///
/// Holding this handle keeps the item alive; dropping the last clone is
/// this crate's analogue of the host runtime collecting the proxy, and
/// enqueues a [`ReleaseNotice`] on the registry's release channel.
#[derive(Clone)]
pub struct ReceivedItemHandle<T> {
    guard: Arc<ReceivedItemGuard<T>>,
}

impl<T> ReceivedItemHandle<T> {
    /// The materialized item.
    pub fn item(&self) -> &T {
        &self.guard.item
    }

    /// Id this proxy was registered under.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.guard.id
    }

    /// Record that this id was observed again on inbound sequence
    /// `inbound_sequence`, so that a later release decided before this
    /// point gets caught by the race-fix check in `SentItems` on the peer.
    pub fn note_seen_at(&self, inbound_sequence: u64) {
        self.guard
            .last_known_inbound_sequence
            .store(inbound_sequence, Ordering::SeqCst);
    }
}

/// Registry of proxies materialized for the peer's sent channel items.
pub struct ReceivedItems<T> {
    entries: DashMap<u64, std::sync::Weak<ReceivedItemGuard<T>>>,
    release_tx: mpsc::UnboundedSender<ReleaseNotice>,
}

impl<T> ReceivedItems<T> {
    /// Create an empty registry and the receiver for its release notices.
    ///
    /// The caller drives the returned [`mpsc::UnboundedReceiver`], turning
    /// each [`ReleaseNotice`] into an outbound
    /// `channelItemNotUsedAnymore { id, time }` frame.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReleaseNotice>) {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: DashMap::new(),
                release_tx,
            },
            release_rx,
        )
    }

    /// Materialize (or look up) the proxy for `id`, first seen on inbound
    /// sequence `inbound_sequence`.
    ///
    /// If this id was already materialized and its handle is still alive,
    /// the existing handle is returned (with its last-seen sequence
    /// bumped) rather than constructing a second, independent proxy for
    /// the same identity — `item` is assumed identical in that case and is
    /// dropped.
    pub fn materialize(&self, id: u64, item: T, inbound_sequence: u64) -> ReceivedItemHandle<T> {
        if let Some(existing) = self.entries.get(&id).and_then(|w| w.upgrade()) {
            existing
                .last_known_inbound_sequence
                .store(inbound_sequence, Ordering::SeqCst);
            return ReceivedItemHandle { guard: existing };
        }

        let guard = Arc::new(ReceivedItemGuard {
            id,
            item,
            last_known_inbound_sequence: AtomicU64::new(inbound_sequence),
            release_tx: self.release_tx.clone(),
        });
        self.entries.insert(id, Arc::downgrade(&guard));
        ReceivedItemHandle { guard }
    }

    /// Number of ids with a currently live handle.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Drop the bookkeeping entry for an id once its release has been
    /// acknowledged or decided unnecessary; safe to call even if the
    /// handle is still alive (it will simply be re-inserted on the next
    /// inbound reference, if any).
    pub fn forget(&self, id: u64) {
        self.entries.remove(&id);
    }
}
