//! Server-wide configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by every connection a server accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Origins the security gate trusts for `corsReadToken`-mode
    /// credentialed reads.
    pub allowed_origins: Vec<String>,
    /// The `devForceTokenCheck` assertion mode the source left as an open
    /// question: when set, malformed or stale inbound state (an invalid
    /// `setCookieSession`, a security-properties answer for an unknown
    /// question) is treated as a protocol violation instead of being
    /// silently ignored. Intended for test harnesses; production
    /// deployments should leave this off, since the protocol's own retry
    /// loop already recovers from those cases without it.
    pub strict_mode: bool,
}

impl ServerConfig {
    /// A permissive config with no allowed origins and strict mode off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            strict_mode: false,
        }
    }

    /// Layer environment variables under `prefix` (e.g. `RPC_SERVER`, giving
    /// `RPC_SERVER__STRICT_MODE=true`, `RPC_SERVER__ALLOWED_ORIGINS=...`)
    /// over [`ServerConfig::new`]'s defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment carries a value that does not
    /// deserialize into the expected shape (e.g. a non-boolean
    /// `STRICT_MODE`).
    pub fn from_env(prefix: &str) -> rpc_core::Result<Self> {
        let defaults = Self::new();
        let source = config::Config::builder()
            .add_source(
                config::Config::try_from(&defaults)
                    .map_err(|err| rpc_core::Error::protocol_violation(err.to_string()))?,
            )
            .add_source(
                config::Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_origins"),
            )
            .build()
            .map_err(|err| rpc_core::Error::protocol_violation(err.to_string()))?;
        source
            .try_deserialize()
            .map_err(|err| rpc_core::Error::protocol_violation(err.to_string()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `std::env::set_var` mutates process-global state; serialize the tests
    // in this module so they don't race each other's environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_keeps_defaults_with_no_matching_variables() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = ServerConfig::from_env("RPC_SERVER_TEST_UNSET").unwrap();
        assert!(!config.strict_mode);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn from_env_layers_strict_mode_and_allowed_origins() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: serialized by ENV_LOCK; no other thread in this process
        // reads or writes these variables concurrently.
        unsafe {
            std::env::set_var("RPC_SERVER_TEST__STRICT_MODE", "true");
            std::env::set_var(
                "RPC_SERVER_TEST__ALLOWED_ORIGINS",
                "https://a.example,https://b.example",
            );
        }
        let config = ServerConfig::from_env("RPC_SERVER_TEST").unwrap();
        unsafe {
            std::env::remove_var("RPC_SERVER_TEST__STRICT_MODE");
            std::env::remove_var("RPC_SERVER_TEST__ALLOWED_ORIGINS");
        }
        assert!(config.strict_mode);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
