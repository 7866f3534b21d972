//! Client configuration.

/// Configuration for one client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Security group this connection's calls execute under, used to key
    /// the `needs-http-security` single-flight fetches.
    pub security_group: String,
    /// Current request-observed security properties, refreshed whenever
    /// `fetchHttpSecurityProperties` succeeds. Seeded with conservative
    /// defaults (no tokens presented, preflight mode) until the first
    /// fetch completes.
    pub initial_security_properties: rpc_protocol::session::SecurityPropertiesOfHttpRequest,
}

impl ClientConfig {
    /// Build a config for `security_group` with no security properties
    /// observed yet.
    #[must_use]
    pub fn new(security_group: impl Into<String>) -> Self {
        Self {
            security_group: security_group.into(),
            initial_security_properties: rpc_protocol::session::SecurityPropertiesOfHttpRequest {
                origin: None,
                destination: String::new(),
                could_be_simple_request: true,
                browser_might_have_security_issue: false,
                csrf_protection_mode:
                    rpc_protocol::session::CsrfProtectionMode::Preflight,
                cors_read_token: None,
                csrf_token: None,
                read_was_proven: false,
            },
        }
    }
}
