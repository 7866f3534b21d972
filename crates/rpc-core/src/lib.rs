//! Shared error types and concurrency primitives used by every crate in the
//! duplex RPC session protocol workspace.
//!
//! This crate has no knowledge of frames, sessions, or transports — it is
//! the foundation layer that [`rpc_protocol`], [`rpc_channel_items`],
//! [`rpc_security`], [`rpc_client`] and [`rpc_server`] build on.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod concurrency;
pub mod error;

pub use error::{Error, ErrorKind, Result};
