//! Cookie-session state and the security-relevant fields carried in its
//! payload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Opaque identity plus a monotonically increasing version. For a given
/// `id`, `version` only ever grows; a server that would otherwise accept a
/// presented `(id, version)` but knows of a newer `version' > version` must
/// treat the presented state as outdated rather than silently accepting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSessionState {
    /// Session identity, opaque to the protocol.
    pub id: String,
    /// Monotonically increasing version number.
    pub version: u64,
}

impl CookieSessionState {
    /// `true` if `other` is a version of the *same* session that is newer
    /// than `self`.
    #[must_use]
    pub fn is_outdated_by(&self, other: &CookieSessionState) -> bool {
        self.id == other.id && other.version > self.version
    }
}

/// The authoritative cookie-session content, owned by the HTTP side. The
/// duplex side only ever holds a cached view of this, or the sentinel
/// [`CachedCookieSession::Outdated`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieSession {
    /// Session identity.
    pub id: String,
    /// Monotonically increasing version.
    pub version: u64,
    /// Authoritative payload, including [`SecurityRelevantSessionFields`]
    /// under whatever key the host application chooses to store them.
    pub payload: serde_json::Value,
}

impl CookieSession {
    /// The `{id, version}` half of this session, without the payload.
    #[must_use]
    pub fn state(&self) -> CookieSessionState {
        CookieSessionState {
            id: self.id.clone(),
            version: self.version,
        }
    }
}

/// The duplex side's cached view of the cookie session: either a concrete
/// snapshot, or the sentinel meaning "the server knows its view is stale
/// and must resync before trusting it again".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CachedCookieSession {
    /// A concrete, believed-current snapshot.
    Session(CookieSession),
    /// The cached view is known stale; every `methodCall` must be answered
    /// with `dropped-cookie-session-outdated` until a fresh
    /// `setCookieSession` replaces this.
    Outdated,
    /// No session has ever been established on this connection.
    Uninitialized,
}

/// Selects which CSRF discipline the security gate enforces for a security
/// group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CsrfProtectionMode {
    /// Trust the browser's CORS preflight for non-simple requests (default).
    Preflight,
    /// Require a valid `corsReadToken` when the origin check fails.
    CorsReadToken,
    /// Require a valid, timing-safe-compared `csrfToken` on every request.
    CsrfToken,
}

impl Default for CsrfProtectionMode {
    fn default() -> Self {
        Self::Preflight
    }
}

/// Security-relevant fields stored in the cookie-session payload.
///
/// Invariant: at most one of `cors_read_tokens` / `csrf_tokens` is
/// non-empty — `csrf_protection_mode` selects which map is authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityRelevantSessionFields {
    /// The CSRF discipline in effect, if the session has opted into one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_protection_mode: Option<CsrfProtectionMode>,
    /// Per-security-group CORS read tokens.
    #[serde(default)]
    pub cors_read_tokens: HashMap<String, String>,
    /// Per-security-group CSRF tokens.
    #[serde(default)]
    pub csrf_tokens: HashMap<String, String>,
}

impl SecurityRelevantSessionFields {
    /// `true` if the invariant "at most one token map is non-empty" holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.cors_read_tokens.is_empty() || self.csrf_tokens.is_empty()
    }
}

/// Per-request security properties, attached to each HTTP call that the
/// duplex side's security gate evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPropertiesOfHttpRequest {
    /// The request's `Origin` header, if present.
    pub origin: Option<String>,
    /// The resource being accessed (security group or class identity).
    pub destination: String,
    /// Whether the request could have been issued as a browser "simple
    /// request" (no preflight would have been triggered).
    pub could_be_simple_request: bool,
    /// Whether the requesting browser is known to have CORS weaknesses
    /// that make preflight trust unsafe.
    pub browser_might_have_security_issue: bool,
    /// The CSRF discipline this request is evaluated under.
    pub csrf_protection_mode: CsrfProtectionMode,
    /// A presented CORS read token, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_read_token: Option<String>,
    /// A presented CSRF token, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// Set once a prior gate evaluation has proven a credentialed read was
    /// legitimate for this connection, letting subsequent gate calls skip
    /// redundant origin re-derivation.
    pub read_was_proven: bool,
}
