//! The session validator: the server's connection to whatever store the
//! HTTP side persists cookie sessions in.
//!
//! The duplex core never reads or writes that store directly — it only
//! ever asks "is this still the latest version of this session?" and,
//! when a method mutates the session, hands the new payload back to the
//! client to commit over HTTP (see [`crate::dispatch`]).

use async_trait::async_trait;

use rpc_protocol::session::CookieSessionState;

/// Answers whether a cached `{id, version}` view is still the latest one
/// the session store knows about.
#[async_trait]
pub trait CookieSessionValidator: Send + Sync {
    /// `Ok(true)` if `state` is still the latest version of session
    /// `state.id` known to the store; `Ok(false)` if a newer version
    /// exists (the cached view must be marked outdated).
    async fn is_latest(&self, state: &CookieSessionState) -> rpc_core::Result<bool>;
}

/// A validator that always reports the cached view as latest. Suitable for
/// deployments with no external session store, or for tests that never
/// exercise the outdated-session recovery path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLatest;

#[async_trait]
impl CookieSessionValidator for AlwaysLatest {
    async fn is_latest(&self, _state: &CookieSessionState) -> rpc_core::Result<bool> {
        Ok(true)
    }
}
