//! Peer channel-item registries for the duplex RPC session protocol.
//!
//! Every connection holds two of these: a [`SentItems`] registry for
//! callbacks/readables the local side has handed to the peer, and a
//! [`ReceivedItems`] registry for the proxies materialized on decode of the
//! peer's DTOs. Both sides agree, via the release protocol in
//! [`release`], on when an item may finally be forgotten without risking
//! an "unknown id" failure on a message that was already in flight when
//! the release was decided.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod received_items;
pub mod release;
pub mod sent_items;

pub use received_items::{ReceivedItemHandle, ReceivedItems};
pub use release::{ReleaseNotice, ReleaseOutcome, should_keep_after_release};
pub use sent_items::SentItems;
