//! The sending side's registry of channel items it has handed to the peer.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::release::{ReleaseOutcome, should_keep_after_release};

struct SentEntry<K, T> {
    key: K,
    item: T,
    last_time_sent: u64,
}

/// Registry of callbacks/readables sent to the peer, keyed by id.
///
/// `K` is the identity of the underlying item (e.g. a pointer-equality
/// wrapper around an `Arc`), used so that sending the *same* callback twice
/// reuses its existing id rather than minting a new one — the protocol
/// requires a stable id for the life of the item. `T` is the item itself,
/// cloned out on lookup (typically cheap, an `Arc` clone).
pub struct SentItems<K, T> {
    next_id: AtomicU64,
    by_id: DashMap<u64, SentEntry<K, T>>,
    by_key: DashMap<K, u64>,
}

impl<K, T> Default for SentItems<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> SentItems<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            by_id: DashMap::new(),
            by_key: DashMap::new(),
        }
    }

    /// Record that `item` (identified by `key`) is being sent at
    /// `outbound_sequence`, returning the id to place in the DTO.
    ///
    /// If this exact item has been sent before, its existing id is reused
    /// and `last_time_sent` is bumped to `outbound_sequence` — this bump is
    /// exactly what makes the release race-fix in [`Self::handle_release`]
    /// correct.
    pub fn record_send(&self, key: K, item: T, outbound_sequence: u64) -> u64 {
        if let Some(id) = self.by_key.get(&key).map(|r| *r) {
            if let Some(mut entry) = self.by_id.get_mut(&id) {
                entry.last_time_sent = outbound_sequence;
            }
            return id;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.by_id.insert(
            id,
            SentEntry {
                key: key.clone(),
                item,
                last_time_sent: outbound_sequence,
            },
        );
        self.by_key.insert(key, id);
        id
    }

    /// Evaluate a `channelItemNotUsedAnymore { id, time }` request from the
    /// peer, removing the entry unless it was re-sent after `time`.
    pub fn handle_release(&self, id: u64, time: u64) -> ReleaseOutcome {
        let Some(entry) = self.by_id.get(&id) else {
            return ReleaseOutcome::UnknownId;
        };

        if should_keep_after_release(entry.last_time_sent, time) {
            return ReleaseOutcome::Kept;
        }

        let key = entry.key.clone();
        drop(entry);
        self.by_id.remove(&id);
        self.by_key.remove(&key);
        ReleaseOutcome::Released
    }

    /// Look up the item currently registered under `id`.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<T> {
        self.by_id.get(&id).map(|entry| entry.item.clone())
    }

    /// Number of items currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// `true` if no items are currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_send_assigns_a_fresh_id() {
        let items: SentItems<&'static str, &'static str> = SentItems::new();
        let id = items.record_send("cb-1", "the-callback", 1);
        assert_eq!(items.get(id), Some("the-callback"));
    }

    #[test]
    fn resending_the_same_item_reuses_its_id() {
        let items: SentItems<&'static str, &'static str> = SentItems::new();
        let first = items.record_send("cb-1", "the-callback", 1);
        let second = items.record_send("cb-1", "the-callback", 5);
        assert_eq!(first, second);
    }

    #[test]
    fn release_after_last_send_removes_the_entry() {
        let items: SentItems<&'static str, &'static str> = SentItems::new();
        let id = items.record_send("cb-1", "the-callback", 1);
        assert_eq!(items.handle_release(id, 5), ReleaseOutcome::Released);
        assert_eq!(items.get(id), None);
    }

    #[test]
    fn release_race_keeps_item_resent_after_release_was_decided() {
        let items: SentItems<&'static str, &'static str> = SentItems::new();
        let id = items.record_send("cb-1", "the-callback", 1);
        // Receiver decided to release at time 2, but we re-sent at time 7
        // (e.g. a down-call) before that release message arrived.
        items.record_send("cb-1", "the-callback", 7);
        assert_eq!(items.handle_release(id, 2), ReleaseOutcome::Kept);
        assert_eq!(items.get(id), Some("the-callback"));
    }

    #[test]
    fn release_of_unknown_id_is_reported() {
        let items: SentItems<&'static str, &'static str> = SentItems::new();
        assert_eq!(items.handle_release(42, 0), ReleaseOutcome::UnknownId);
    }
}
