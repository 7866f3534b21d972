//! Frame catalogue and connection-lifetime data model for the duplex RPC
//! session protocol.
//!
//! This crate owns every type that crosses the wire or is shared between
//! the client and server state machines: [`frames`] (the client→server and
//! server→client frame alphabet), [`session`] (cookie-session state and the
//! security-relevant session fields), [`call`] (`CallResult` and channel
//! item DTOs) and [`tokens`] (the encrypted envelope payload shapes; the
//! actual authenticated encryption lives in `rpc-security`).
//!
//! Nothing here talks to a transport or a socket — see `rpc-transport` for
//! that boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod call;
pub mod frames;
pub mod session;
pub mod tokens;

pub use call::{CallResult, ChannelItemDto, ChannelItemKind, ErrorPayload};
pub use frames::{ClientFrame, ServerFrame};
pub use session::{
    CachedCookieSession, CookieSession, CookieSessionState, CsrfProtectionMode,
    SecurityPropertiesOfHttpRequest, SecurityRelevantSessionFields,
};
pub use tokens::{
    CookieSessionUpdate, GetCookieSessionAnswer, GetCookieSessionQuestion,
    GetHttpSecurityPropertiesAnswer, GetHttpSecurityPropertiesQuestion,
};
