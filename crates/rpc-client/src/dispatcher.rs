//! The client's background receive loop: the single consumer of the
//! transport's inbound events, routing each `ServerFrame` to a pending
//! call, a down-call into a locally held callback, or channel-item
//! bookkeeping.
//!
//! Modeled on the single-background-task, `response_waiters`-table pattern
//! used by the duplex dispatcher this crate's design is grounded on: one
//! task owns `transport.recv()` end to end, and every other piece of
//! client code only ever talks to the connection through its tables and
//! deferred results, never the transport directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use rpc_core::Error;
use rpc_protocol::{CallResult, ClientFrame, ServerFrame};
use rpc_transport::TransportEvent;

use crate::connection::Connection;

/// Spawn the background task that drives `connection` until the transport
/// closes or a protocol violation is detected.
///
/// Returns immediately; the task runs on the current Tokio runtime for the
/// life of the connection.
pub fn spawn(connection: Arc<Connection>) {
    tokio::spawn(async move {
        run(connection).await;
    });
}

async fn run(connection: Arc<Connection>) {
    let inbound_sequence = AtomicU64::new(0);

    loop {
        let event = connection.transport.recv().await;
        let Some(event) = event else {
            connection.fail(Error::connection_closed());
            return;
        };

        match event {
            TransportEvent::Open => {
                trace!("client transport open");
            }
            TransportEvent::Close(reason) => {
                debug!(%reason, "client transport closed");
                connection.fail(Error::transport(reason));
                return;
            }
            TransportEvent::Error(message) => {
                warn!(%message, "client transport reported an error");
                connection.fail(Error::transport(message));
                return;
            }
            TransportEvent::Message(raw) => {
                let seq = inbound_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                match serde_json::from_str::<ServerFrame>(&raw) {
                    Ok(frame) => handle_frame(&connection, frame, seq).await,
                    Err(err) => {
                        connection.fail(Error::protocol_violation(format!(
                            "malformed server frame: {err}"
                        )));
                        return;
                    }
                }
            }
        }

        connection.flush_release_notices().await;
    }
}

async fn handle_frame(connection: &Arc<Connection>, frame: ServerFrame, _inbound_sequence: u64) {
    match frame {
        ServerFrame::Init { version } => {
            debug!(version, "received server init");
        }
        ServerFrame::GetVersion { version } => {
            debug!(version, "received server version answer");
        }
        ServerFrame::MethodCallResult { call_id, result } => {
            if let Some((_, deferred)) = connection.pending_calls.remove(&call_id) {
                deferred.resolve(result).await;
            } else {
                trace!(call_id, "result for unknown or already-resolved call id");
            }
        }
        ServerFrame::DownCall {
            down_call_id,
            callback_id,
            args,
        } => {
            let Some(item) = connection.sent_items.get(callback_id) else {
                warn!(callback_id, "down-call for unknown callback id");
                let _ = connection
                    .send(ClientFrame::MethodDownCallResult {
                        sequence_number: connection.next_sequence(),
                        down_call_id,
                        result: CallResult::Error {
                            error: rpc_protocol::call::ErrorPayload::new(
                                "UnknownChannelItem",
                                "callback id is not registered on this connection",
                            ),
                            http_status_code: None,
                        },
                    })
                    .await;
                return;
            };

            let crate::channel_item::ChannelItem::Callback(callback) = item else {
                warn!(callback_id, "down-call targets a readable, not a callback");
                return;
            };

            let connection = connection.clone();
            tokio::spawn(async move {
                let result = callback.call(args).await;
                let sequence_number = connection.next_sequence();
                let _ = connection
                    .send(ClientFrame::MethodDownCallResult {
                        sequence_number,
                        down_call_id,
                        result,
                    })
                    .await;
            });
        }
        ServerFrame::ChannelItemNotUsedAnymore { item_id, time } => {
            match connection.sent_items.handle_release(item_id, time) {
                rpc_channel_items::ReleaseOutcome::Released => {
                    trace!(item_id, "released sent channel item");
                }
                rpc_channel_items::ReleaseOutcome::Kept => {
                    trace!(item_id, "kept channel item re-sent after release decided");
                }
                rpc_channel_items::ReleaseOutcome::UnknownId => {
                    warn!(item_id, "release for unknown sent item id");
                }
            }
        }
        ServerFrame::StreamDataRequest { stream_id } => {
            let Some(crate::channel_item::ChannelItem::Readable(readable)) =
                connection.sent_items.get(stream_id)
            else {
                warn!(stream_id, "stream data request for unknown readable");
                return;
            };
            let connection = connection.clone();
            tokio::spawn(async move {
                let chunk = readable.next_chunk().await;
                let sequence_number = connection.next_sequence();
                let _ = connection
                    .send(ClientFrame::StreamData {
                        sequence_number,
                        stream_id,
                        chunk,
                    })
                    .await;
            });
        }
        ServerFrame::StreamData { stream_id, chunk } => {
            // Delivery to the held `ReceivedItemHandle` happens through
            // whatever sink the caller wired up when it materialized the
            // proxy; the dispatcher's job ends at observing the frame.
            trace!(stream_id, has_data = chunk.is_some(), "received stream chunk");
        }
    }
}
