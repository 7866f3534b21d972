//! Payload shapes sealed inside the encrypted token envelopes that cross
//! the duplex/HTTP boundary.
//!
//! Every token is authenticated and bound to a `purpose` string (the AEAD
//! associated data, see `rpc_security::tokenbox`) so a token minted for one
//! question can never be replayed as the answer to a different one. The
//! purpose constants here are the single source of truth for that binding;
//! the sealing/opening code in `rpc-security` must use exactly these
//! strings.

use serde::{Deserialize, Serialize};

use crate::session::{CookieSessionState, SecurityPropertiesOfHttpRequest};

/// AEAD associated-data string for [`GetCookieSessionQuestion`].
pub const PURPOSE_GET_COOKIE_SESSION_QUESTION: &str = "GetCookieSession_question";
/// AEAD associated-data string for [`GetCookieSessionAnswer`].
pub const PURPOSE_GET_COOKIE_SESSION_ANSWER: &str = "GetCookieSessionAnswerToken";
/// AEAD associated-data string for [`GetHttpSecurityPropertiesQuestion`].
pub const PURPOSE_GET_HTTP_SECURITY_PROPERTIES_QUESTION: &str =
    "GetHttpSecurityProperties_question";
/// AEAD associated-data string for [`GetHttpSecurityPropertiesAnswer`].
pub const PURPOSE_GET_HTTP_SECURITY_PROPERTIES_ANSWER: &str = "GetHttpSecurityProperties_answer";
/// AEAD associated-data string for [`CookieSessionUpdate`].
pub const PURPOSE_COOKIE_SESSION_UPDATE: &str = "CookieSessionUpdate";

/// Sealed inside the `question` field of
/// [`crate::call::CallResult::NeedsInitializedCookieSession`]. The client
/// presents this verbatim to the HTTP endpoint, which opens it to recover
/// `connection_id` and mints a fresh session bound to that connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCookieSessionQuestion {
    /// The duplex connection this session must be bound to.
    pub connection_id: String,
    /// Server-chosen nonce, echoed back in the answer to prevent an answer
    /// minted for a stale question from being replayed against a newer one.
    pub nonce: String,
}

/// What the HTTP endpoint seals in response to a
/// [`GetCookieSessionQuestion`], and what the client feeds back to the
/// duplex side via `setCookieSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCookieSessionAnswer {
    /// Nonce copied verbatim from the question.
    pub nonce: String,
    /// The freshly established session state.
    pub session: CookieSessionState,
    /// Full session payload.
    pub payload: serde_json::Value,
}

/// Sealed inside the `question` field of
/// [`crate::call::CallResult::NeedsHttpSecurity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHttpSecurityPropertiesQuestion {
    /// The duplex connection whose security properties are being asked
    /// about.
    pub connection_id: String,
    /// The security group under evaluation.
    pub security_group: String,
    /// Server-chosen nonce, echoed back in the answer.
    pub nonce: String,
}

/// What the HTTP endpoint seals in response to a
/// [`GetHttpSecurityPropertiesQuestion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHttpSecurityPropertiesAnswer {
    /// Nonce copied verbatim from the question.
    pub nonce: String,
    /// The freshly observed properties for the asked-about security group.
    pub properties: SecurityPropertiesOfHttpRequest,
}

/// Sealed inside the `token` field of
/// [`crate::call::CallResult::DoCookieSessionUpdate`]; the client presents
/// this to the HTTP endpoint to commit a session mutation that happened as
/// a side effect of a method call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieSessionUpdate {
    /// The session state the update applies to; the HTTP endpoint rejects
    /// the update if its own view of `id` has since advanced past
    /// `state.version` under a conflicting mutation.
    pub state: CookieSessionState,
    /// The new payload to commit.
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_strings_are_pairwise_distinct() {
        let purposes = [
            PURPOSE_GET_COOKIE_SESSION_QUESTION,
            PURPOSE_GET_COOKIE_SESSION_ANSWER,
            PURPOSE_GET_HTTP_SECURITY_PROPERTIES_QUESTION,
            PURPOSE_GET_HTTP_SECURITY_PROPERTIES_ANSWER,
            PURPOSE_COOKIE_SESSION_UPDATE,
        ];
        for (i, a) in purposes.iter().enumerate() {
            for (j, b) in purposes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "purpose strings must not collide");
                }
            }
        }
    }

    #[test]
    fn cookie_session_update_round_trips_through_json() {
        let update = CookieSessionUpdate {
            state: CookieSessionState {
                id: "s1".into(),
                version: 2,
            },
            payload: serde_json::json!({"k": "v"}),
        };
        let json = serde_json::to_string(&update).unwrap();
        let back: CookieSessionUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, update.state);
        assert_eq!(back.payload, update.payload);
    }
}
