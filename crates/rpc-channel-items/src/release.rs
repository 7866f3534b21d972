//! The GC-vs-race release protocol shared by [`crate::sent_items::SentItems`]
//! and [`crate::received_items::ReceivedItems`].
//!
//! A `channelItemNotUsedAnymore { id, time }` message means "as of the
//! moment my local proxy was collected, I had last observed this item on
//! inbound sequence number `time`". Because messages can be in flight
//! concurrently with garbage collection, the sender may have re-sent the
//! same item (bumping `lastTimeSent`) *after* the receiver already decided
//! to release it but *before* the release message arrived. The fix: the
//! sender keeps the item whenever its own record of the last time it sent
//! the item is at or after the time the release was computed against.

/// Outcome of evaluating a release request against a `SentItems` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The item was removed; the id may be reused by neither side again.
    Released,
    /// The item was re-sent after the release was decided; the release is
    /// ignored and the id remains live.
    Kept,
    /// No entry exists for this id (already released, or never sent).
    UnknownId,
}

/// `true` if an entry last sent at `last_time_sent` must survive a release
/// request computed against `release_time`.
///
/// This is the single race-fix check for the whole registry: a release is
/// honored only when it was decided no earlier than the last time the item
/// crossed the wire. Kept as a standalone function so the race condition
/// itself — not the registry bookkeeping around it — can be exercised
/// directly.
#[must_use]
pub fn should_keep_after_release(last_time_sent: u64, release_time: u64) -> bool {
    last_time_sent >= release_time
}

/// A pending release, either about to be sent (from [`ReceivedItems`]) or
/// just received (into [`SentItems`]).
///
/// [`ReceivedItems`]: crate::received_items::ReceivedItems
/// [`SentItems`]: crate::sent_items::SentItems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseNotice {
    /// Id of the item being released.
    pub id: u64,
    /// Inbound sequence number last observed for this id, at the moment
    /// the local proxy was dropped.
    pub time: u64,
}
