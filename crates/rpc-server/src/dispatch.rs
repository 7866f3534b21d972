//! The external business-logic dispatch (`doCall_outer`): argument
//! typechecking, the security gate for session access, and the user
//! method itself all live behind this one seam.
//!
//! The server state machine's job ends at resolving security properties
//! and the cached session; everything about what a method actually does,
//! and whether accessing the session is allowed for this request, is
//! delegated here. `read_was_proven` on [`DispatchRequest::properties`] is
//! always set to `true` before the request reaches a dispatcher: the
//! server has already resolved HTTP security properties for this call's
//! group (step 5 of the receive path), so a conforming session accessor
//! may skip redundant origin re-derivation.

use async_trait::async_trait;

use rpc_protocol::call::ErrorPayload;
use rpc_protocol::session::{CookieSession, SecurityPropertiesOfHttpRequest};

use crate::channel_item::ChannelItemLookup;

/// Everything a dispatcher needs to run one method call.
pub struct DispatchRequest<'a> {
    /// Fully qualified method name.
    pub method: &'a str,
    /// Arguments, with callbacks/readables still in their
    /// [`rpc_protocol::ChannelItemDto`] wire shape; resolve one against
    /// `channel_items` by its `id` to get the local proxy.
    pub args: serde_json::Value,
    /// Security group this call executes under.
    pub security_group: &'a str,
    /// This connection's resolved security properties for `security_group`.
    pub properties: &'a SecurityPropertiesOfHttpRequest,
    /// The server's current view of the cookie session, if one is
    /// established.
    pub session: Option<&'a CookieSession>,
    /// Resolves a channel-item id named in `args` to the proxy materialized
    /// for it.
    pub channel_items: &'a dyn ChannelItemLookup,
}

/// The method-level outcome, before any cookie-session bookkeeping.
#[derive(Debug, Clone)]
pub enum MethodOutcome {
    /// The method ran to completion and returned this value.
    Ok(serde_json::Value),
    /// The method threw a legal non-`Error` value.
    ThrownValue(serde_json::Value),
    /// The method raised a structured error.
    Error(ErrorPayload),
}

/// What a dispatch produced: the method outcome, plus the new session
/// payload if the method mutated the session as a side effect.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The method-level result.
    pub outcome: MethodOutcome,
    /// `Some(payload)` if the method wrote to the session; `None` if it
    /// left the session untouched.
    pub modified_session_payload: Option<serde_json::Value>,
}

impl DispatchOutcome {
    /// An outcome with no session mutation.
    #[must_use]
    pub fn unmodified(outcome: MethodOutcome) -> Self {
        Self {
            outcome,
            modified_session_payload: None,
        }
    }
}

/// Runs user methods against a session object. Implementations own
/// argument typechecking, result/callback-argument validation, and the
/// security gate re-invocation on every session read or write — all out of
/// scope for the core (§1), but necessary for a method to actually do
/// anything.
#[async_trait]
pub trait MethodDispatcher: Send + Sync {
    /// Execute `request.method`, returning its outcome and whether it
    /// mutated the session. Must never panic across the call boundary: a
    /// method that raises must be reported as
    /// [`MethodOutcome::ThrownValue`] or [`MethodOutcome::Error`], not as
    /// an `Err` from this function.
    async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchOutcome;
}
