//! The client-side instance registry: one [`Connection`] per URL, built at
//! most once concurrently.
//!
//! Grounded on the same single-flight-keyed-by-identity pattern used for the
//! cookie-session and security-property resyncs in [`crate::connection`]:
//! two callers racing to open the same URL must observe exactly one
//! connection attempt, and a failed attempt must not poison the slot for
//! the next caller.

use std::future::Future;
use std::sync::Arc;

use rpc_core::concurrency::SingleFlightMap;
use rpc_core::Result;
use rpc_transport::DuplexTransport;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::dispatcher;

/// Maps connection URLs to their shared [`Connection`], deduplicating
/// concurrent connects and evicting failed attempts so the next caller gets
/// a fresh try.
pub struct ConnectionRegistry {
    inflight: SingleFlightMap<String, Arc<Connection>, rpc_core::Error>,
}

impl ConnectionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: SingleFlightMap::new(),
        }
    }

    /// Return the connection for `url`, building one with `connect` if this
    /// is the first caller to ask for it. Concurrent callers for the same
    /// `url` share one in-flight attempt; if it fails, the slot is cleared
    /// and the next call to `get_or_connect` tries again from scratch.
    pub async fn get_or_connect<F, Fut>(&self, url: String, connect: F) -> Result<Arc<Connection>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Connection>>>,
    {
        self.inflight.exec(url, connect).await
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Open a transport-backed connection and start its background dispatcher.
/// The usual way to build the `connect` closure passed to
/// [`ConnectionRegistry::get_or_connect`].
#[must_use]
pub fn open(transport: Arc<dyn DuplexTransport>, config: ClientConfig) -> Arc<Connection> {
    let connection = Connection::new(transport, config);
    dispatcher::spawn(connection.clone());
    connection
}
