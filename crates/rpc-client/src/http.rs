//! The HTTP-side capabilities the client's retry loop depends on.
//!
//! Per the protocol's HTTP collaborator contract, the duplex core depends
//! only on three capabilities of the HTTP side: fetching a cookie session,
//! fetching HTTP security properties, and committing a session update. All
//! three calls carry an opaque, server-sealed envelope string that the
//! client forwards verbatim — it never inspects or decrypts the question
//! or token itself, only the HTTP side (holding the matching `TokenBox`)
//! can.

use async_trait::async_trait;

use rpc_protocol::session::{CookieSession, SecurityPropertiesOfHttpRequest};
use rpc_protocol::tokens::{GetCookieSessionAnswer, GetHttpSecurityPropertiesAnswer};

/// What the client needs from the HTTP side of the deployment to drive the
/// cookie-session and security-property resync loops in [`crate::call`].
///
/// The concrete HTTP wire (fetch, cookie jar, same-origin credentials) is
/// out of scope; implementors typically wrap a browser `fetch` call or, in
/// a headless client, a cookie-jar-aware HTTP client pointed at the same
/// deployment's HTTP endpoints.
#[async_trait]
pub trait HttpSessionCollaborator: Send + Sync {
    /// Present a server-sealed `GetCookieSessionQuestion` envelope to the
    /// HTTP side and receive back the freshly established session.
    async fn get_cookie_session(
        &self,
        sealed_question: &str,
    ) -> rpc_core::Result<GetCookieSessionAnswer>;

    /// Read whatever session the HTTP side already considers current,
    /// without a server-minted question. Used to resync after the server
    /// reports `dropped-cookie-session-outdated`, or after a background
    /// poll of the browser's own cookie jar observes a version bump: in
    /// both cases no question was asked, the duplex side just needs to
    /// catch up to what the HTTP side already knows.
    async fn fetch_current_cookie_session(&self) -> rpc_core::Result<CookieSession>;

    /// Present a server-sealed `GetHttpSecurityPropertiesQuestion` envelope
    /// and receive back the observed properties for that security group.
    async fn get_http_security_properties(
        &self,
        sealed_question: &str,
    ) -> rpc_core::Result<GetHttpSecurityPropertiesAnswer>;

    /// Commit a session mutation the duplex side produced as a side effect
    /// of a method call, presenting `sealed_token` (a server-sealed
    /// `CookieSessionUpdate` envelope) alongside this request's own
    /// security properties so the HTTP side's gate can validate the write.
    async fn update_cookie_session(
        &self,
        sealed_token: &str,
        request_properties: &SecurityPropertiesOfHttpRequest,
    ) -> rpc_core::Result<GetCookieSessionAnswer>;
}
