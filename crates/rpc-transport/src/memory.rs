//! A same-process duplex transport pair, backed by `tokio::mpsc` channels.
//!
//! Used by `rpc-client`/`rpc-server`'s own tests, and by any embedder that
//! wants to exercise the protocol without a real socket (e.g. running a
//! client and server in the same process for an example).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::transport::{DuplexTransport, TransportEvent};

/// One side of an in-memory duplex pair. Construct both sides together
/// with [`pair`].
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    closed: AtomicBool,
    peer_closed_notice: mpsc::UnboundedSender<TransportEvent>,
}

/// Create a connected pair of [`MemoryTransport`]s: frames sent on one are
/// delivered as [`TransportEvent::Message`] on the other, and closing
/// either side delivers [`TransportEvent::Close`] to its peer.
#[must_use]
pub fn pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
    let (a_to_b, b_from_a) = mpsc::unbounded_channel::<String>();
    let (b_to_a, a_from_b) = mpsc::unbounded_channel::<String>();

    let (a_events_tx, a_events_rx) = mpsc::unbounded_channel();
    let (b_events_tx, b_events_rx) = mpsc::unbounded_channel();

    let a = Arc::new(MemoryTransport {
        outbound: a_to_b,
        inbound: Mutex::new(a_events_rx),
        closed: AtomicBool::new(false),
        peer_closed_notice: b_events_tx.clone(),
    });
    let b = Arc::new(MemoryTransport {
        outbound: b_to_a,
        inbound: Mutex::new(b_events_rx),
        closed: AtomicBool::new(false),
        peer_closed_notice: a_events_tx.clone(),
    });

    let _ = a_events_tx.send(TransportEvent::Open);
    let _ = b_events_tx.send(TransportEvent::Open);

    // Pump raw strings from each mpsc channel into the peer's event queue
    // as Message events, preserving send order.
    let a_events_for_pump = a_events_tx.clone();
    tokio::spawn(async move {
        let mut rx = b_from_a;
        while let Some(frame) = rx.recv().await {
            if a_events_for_pump.send(TransportEvent::Message(frame)).is_err() {
                break;
            }
        }
    });
    let b_events_for_pump = b_events_tx;
    tokio::spawn(async move {
        let mut rx = a_from_b;
        while let Some(frame) = rx.recv().await {
            if b_events_for_pump.send(TransportEvent::Message(frame)).is_err() {
                break;
            }
        }
    });

    (a, b)
}

#[async_trait]
impl DuplexTransport for MemoryTransport {
    async fn send(&self, frame: String) -> rpc_core::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(rpc_core::Error::connection_closed());
        }
        self.outbound
            .send(frame)
            .map_err(|_| rpc_core::Error::transport("peer dropped"))
    }

    async fn recv(&self) -> Option<TransportEvent> {
        self.inbound.lock().await.recv().await
    }

    async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self
            .peer_closed_notice
            .send(TransportEvent::Close(reason.to_string()));
    }
}
