//! The server's background receive loop, mirroring `rpc-client`'s own
//! dispatcher, and the 9-step `methodCall` receive path it drives (§4.4 of
//! the duplex state machine).
//!
//! One task owns `transport.recv()` for the life of the connection; every
//! other piece of server code only ever talks to it through
//! [`ServerConnection`]'s tables and deferred results.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use rpc_core::Error;
use rpc_core::concurrency::DeferredResult;
use rpc_protocol::call::ErrorPayload;
use rpc_protocol::session::CookieSessionState;
use rpc_protocol::tokens::{
    CookieSessionUpdate, GetCookieSessionQuestion, GetHttpSecurityPropertiesQuestion,
    PURPOSE_COOKIE_SESSION_UPDATE, PURPOSE_GET_COOKIE_SESSION_QUESTION,
    PURPOSE_GET_HTTP_SECURITY_PROPERTIES_QUESTION,
};
use rpc_protocol::{CachedCookieSession, CallResult, ClientFrame, ServerFrame};
use rpc_transport::TransportEvent;

use crate::channel_item::{ChannelItem, MaterializedChannelItems, scan_channel_item_dtos};
use crate::connection::{PROTOCOL_VERSION, ServerConnection};
use crate::dispatch::{DispatchRequest, MethodOutcome};

/// Spawn the background task that drives `connection`: sends the initial
/// handshake frame, then runs the receive loop until the transport closes
/// or a protocol violation is detected.
pub fn spawn(connection: Arc<ServerConnection>) {
    tokio::spawn(async move {
        if connection.send_init().await.is_err() {
            return;
        }
        run(connection).await;
    });
}

async fn run(connection: Arc<ServerConnection>) {
    // Tracks the last `sequence_number` actually carried by a client frame
    // (not a locally minted receive count) — every `ClientFrame` embeds
    // one precisely so the server can both detect reordering/drops and
    // reuse the same number space the client's `SentItems.last_time_sent`
    // was recorded against.
    let mut last_inbound_sequence: u64 = 0;

    loop {
        let event = connection.transport.recv().await;
        let Some(event) = event else {
            connection.fail(Error::connection_closed());
            return;
        };

        match event {
            TransportEvent::Open => {
                trace!("server transport open");
            }
            TransportEvent::Close(reason) => {
                debug!(%reason, "server transport closed");
                connection.fail(Error::transport(reason));
                return;
            }
            TransportEvent::Error(message) => {
                warn!(%message, "server transport reported an error");
                connection.fail(Error::transport(message));
                return;
            }
            TransportEvent::Message(raw) => {
                match serde_json::from_str::<ClientFrame>(&raw) {
                    Ok(frame) => {
                        let seq = frame.sequence_number();
                        let expected = last_inbound_sequence + 1;
                        if seq != expected {
                            connection.fail(Error::protocol_violation(format!(
                                "client frame sequence number out of order: expected {expected}, got {seq}"
                            )));
                            return;
                        }
                        last_inbound_sequence = seq;
                        handle_frame(&connection, frame, seq).await;
                    }
                    Err(err) => {
                        connection.fail(Error::protocol_violation(format!(
                            "malformed client frame: {err}"
                        )));
                        return;
                    }
                }
            }
        }

        connection.flush_release_notices().await;
    }
}

async fn handle_frame(connection: &Arc<ServerConnection>, frame: ClientFrame, inbound_sequence: u64) {
    match frame {
        ClientFrame::GetVersion { .. } => {
            let _ = connection
                .send(ServerFrame::GetVersion {
                    version: PROTOCOL_VERSION,
                })
                .await;
        }

        ClientFrame::MethodCall {
            call_id,
            method,
            args,
            security_group,
            ..
        } => {
            let connection = connection.clone();
            tokio::spawn(async move {
                handle_method_call(
                    &connection,
                    call_id,
                    method,
                    args,
                    security_group,
                    inbound_sequence,
                )
                .await;
            });
        }

        ClientFrame::SetCookieSession {
            session, payload, ..
        } => {
            set_cookie_session(connection, session, payload);
        }

        ClientFrame::UpdateHttpSecurityProperties {
            security_group,
            properties,
            ..
        } => {
            connection
                .security_properties
                .insert(security_group, properties);
        }

        ClientFrame::MethodDownCallResult {
            down_call_id,
            result,
            ..
        } => {
            if let Some((_, deferred)) = connection.pending_down_calls.remove(&down_call_id) {
                deferred.resolve(result).await;
            } else {
                trace!(down_call_id, "down-call result for unknown or already-resolved id");
            }
        }

        ClientFrame::StreamDataRequest { stream_id, .. } => {
            let Some(item) = connection.sent_items.get(stream_id) else {
                warn!(stream_id, "stream data request for unknown readable");
                let _ = connection
                    .send(ServerFrame::StreamData {
                        stream_id,
                        chunk: None,
                    })
                    .await;
                return;
            };
            let Some(readable) = item.as_readable().cloned() else {
                warn!(stream_id, "stream data request targets a callback, not a readable");
                return;
            };
            let connection = connection.clone();
            tokio::spawn(async move {
                let chunk = readable.next_chunk().await;
                let _ = connection
                    .send(ServerFrame::StreamData { stream_id, chunk })
                    .await;
            });
        }

        ClientFrame::ChannelItemNotUsedAnymore { item_id, time, .. } => {
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

        ClientFrame::StreamData {
            stream_id, chunk, ..
        } => {
            if let Some((_, deferred)) = connection.pending_stream_pulls.remove(&stream_id) {
                deferred.resolve(chunk).await;
            } else {
                trace!(stream_id, "stream data for unknown or already-resolved pull");
            }
        }
    }
}

/// The server receive path for one `methodCall`, steps 1-9.
async fn handle_method_call(
    connection: &Arc<ServerConnection>,
    call_id: u64,
    method: String,
    args: serde_json::Value,
    security_group: String,
    inbound_sequence: u64,
) {
    // Step 2: materialize every channel item named in `args`. Keeping each
    // handle alive for the life of this call is what makes a dispatcher's
    // *failure* to retain one the signal that it is no longer needed.
    let mut dtos = Vec::new();
    scan_channel_item_dtos(&args, &mut dtos);
    let mut by_id = HashMap::with_capacity(dtos.len());
    for dto in dtos {
        let item = match dto.kind {
            rpc_protocol::ChannelItemKind::Callback => {
                ChannelItem::Callback(Arc::new(crate::channel_item::RemoteCallback {
                    connection: Arc::downgrade(connection),
                    callback_id: dto.id,
                }))
            }
            rpc_protocol::ChannelItemKind::Readable => {
                ChannelItem::Readable(Arc::new(crate::channel_item::RemoteReadable {
                    connection: Arc::downgrade(connection),
                    stream_id: dto.id,
                }))
            }
        };
        let handle = connection.materialize_received_item(dto.id, item, inbound_sequence);
        by_id.insert(dto.id, handle);
    }
    let lookup = MaterializedChannelItems { by_id };

    // Step 3.
    let cached = connection.cookie_session();
    if matches!(cached, CachedCookieSession::Outdated) {
        reply(connection, call_id, CallResult::DroppedCookieSessionOutdated).await;
        return;
    }

    // Step 4.
    let session = match cached {
        CachedCookieSession::Session(session) => {
            match connection.validator.is_latest(&session.state()).await {
                Ok(true) => Some(session),
                Ok(false) => {
                    *connection.cookie_session.lock() = CachedCookieSession::Outdated;
                    reply(connection, call_id, CallResult::DroppedCookieSessionOutdated).await;
                    return;
                }
                Err(err) => {
                    connection.fail(err);
                    return;
                }
            }
        }
        CachedCookieSession::Uninitialized => None,
        CachedCookieSession::Outdated => unreachable!("handled in step 3 above"),
    };

    // Step 5.
    let Some(mut properties) = connection
        .security_properties
        .get(&security_group)
        .map(|entry| entry.value().clone())
    else {
        let question = match mint_http_security_question(connection, &security_group) {
            Ok(question) => question,
            Err(err) => {
                connection.fail(err);
                return;
            }
        };
        reply(
            connection,
            call_id,
            CallResult::NeedsHttpSecurity {
                question,
                sync_key: security_group,
            },
        )
        .await;
        return;
    };
    properties.read_was_proven = true;

    // Step 6: external dispatch.
    let outcome = connection
        .method_dispatcher
        .dispatch(DispatchRequest {
            method: &method,
            args,
            security_group: &security_group,
            properties: &properties,
            session: session.as_ref(),
            channel_items: &lookup,
        })
        .await;

    match (outcome.modified_session_payload, session) {
        // Step 7: a mutation happened, but no session was established yet.
        (Some(_payload), None) => {
            let question = match mint_cookie_session_question(connection) {
                Ok(question) => question,
                Err(err) => {
                    connection.fail(err);
                    return;
                }
            };
            reply(
                connection,
                call_id,
                CallResult::NeedsInitializedCookieSession { question },
            )
            .await;
        }

        // Step 8: a mutation happened to an established session.
        (Some(payload), Some(session)) => {
            let result = match outcome.outcome {
                MethodOutcome::Ok(result) => result,
                other => {
                    warn!(
                        method = %method,
                        "method reported a session mutation alongside a non-ok outcome; \
                         dropping the mutation since only an ok result ever carries a \
                         do-cookie-session-update"
                    );
                    reply_outcome(connection, call_id, other).await;
                    return;
                }
            };
            let token = match connection.token_box.seal(
                PURPOSE_COOKIE_SESSION_UPDATE,
                &CookieSessionUpdate {
                    state: session.state(),
                    payload,
                },
            ) {
                Ok(token) => token,
                Err(err) => {
                    connection.fail(err);
                    return;
                }
            };
            *connection.cookie_session.lock() = CachedCookieSession::Outdated;
            reply(
                connection,
                call_id,
                CallResult::DoCookieSessionUpdate { token, result },
            )
            .await;
        }

        // Step 9: no session mutation.
        (None, _) => {
            reply_outcome(connection, call_id, outcome.outcome).await;
        }
    }
}

async fn reply(connection: &Arc<ServerConnection>, call_id: u64, result: CallResult) {
    let _ = connection
        .send(ServerFrame::MethodCallResult { call_id, result })
        .await;
}

async fn reply_outcome(connection: &Arc<ServerConnection>, call_id: u64, outcome: MethodOutcome) {
    let result = match outcome {
        MethodOutcome::Ok(result) => CallResult::Ok { result },
        MethodOutcome::ThrownValue(result) => CallResult::ThrownValue { result },
        MethodOutcome::Error(error) => CallResult::Error {
            error,
            http_status_code: None,
        },
    };
    reply(connection, call_id, result).await;
}

/// Apply a `setCookieSession` push from the client. Invalid tokens or
/// version regressions are ignored rather than treated as fatal — the
/// client's own retry loop already recovers from a stale push without our
/// help — unless [`crate::config::ServerConfig::strict_mode`] is set, in
/// which case a regression is treated as a protocol violation.
fn set_cookie_session(
    connection: &Arc<ServerConnection>,
    state: Option<CookieSessionState>,
    payload: Option<serde_json::Value>,
) {
    let Some(state) = state else {
        *connection.cookie_session.lock() = CachedCookieSession::Uninitialized;
        return;
    };
    let Some(payload) = payload else {
        warn!("setCookieSession carried a session state with no payload; ignoring");
        return;
    };

    let mut cached = connection.cookie_session.lock();
    if let CachedCookieSession::Session(current) = &*cached {
        if state.is_outdated_by(&current.state()) {
            if connection.config.strict_mode {
                drop(cached);
                connection.fail(Error::protocol_violation(
                    "setCookieSession presented a version older than the cached session",
                ));
            }
            return;
        }
    }
    *cached = CachedCookieSession::Session(rpc_protocol::CookieSession {
        id: state.id,
        version: state.version,
        payload,
    });
}

fn mint_http_security_question(
    connection: &Arc<ServerConnection>,
    security_group: &str,
) -> rpc_core::Result<String> {
    connection.token_box.seal(
        PURPOSE_GET_HTTP_SECURITY_PROPERTIES_QUESTION,
        &GetHttpSecurityPropertiesQuestion {
            connection_id: connection.id().to_string(),
            security_group: security_group.to_string(),
            nonce: uuid::Uuid::new_v4().to_string(),
        },
    )
}

fn mint_cookie_session_question(connection: &Arc<ServerConnection>) -> rpc_core::Result<String> {
    connection.token_box.seal(
        PURPOSE_GET_COOKIE_SESSION_QUESTION,
        &GetCookieSessionQuestion {
            connection_id: connection.id().to_string(),
            nonce: uuid::Uuid::new_v4().to_string(),
        },
    )
}

/// Invoke a callback the client owns: send `downCall` and await the
/// matching `methodDownCallResult`. Referenced by [`crate::channel_item::RemoteCallback`].
pub(crate) async fn down_call(
    connection: &Arc<ServerConnection>,
    callback_id: u64,
    args: serde_json::Value,
) -> CallResult {
    if let Some(err) = connection.fatal_error() {
        return CallResult::Error {
            error: ErrorPayload::new(err.kind.to_string(), err.message),
            http_status_code: err.http_status_code,
        };
    }

    let down_call_id = connection.next_down_call_id();
    let deferred = Arc::new(DeferredResult::new());
    connection
        .pending_down_calls
        .insert(down_call_id, deferred.clone());

    if let Err(err) = connection
        .send(ServerFrame::DownCall {
            down_call_id,
            callback_id,
            args,
        })
        .await
    {
        connection.pending_down_calls.remove(&down_call_id);
        return CallResult::Error {
            error: ErrorPayload::new(err.kind.to_string(), err.message),
            http_status_code: err.http_status_code,
        };
    }

    match deferred.wait().await {
        Some(result) => result,
        None => CallResult::Error {
            error: ErrorPayload::new(
                "ConnectionClosed",
                "connection closed before the down-call resolved",
            ),
            http_status_code: None,
        },
    }
}

/// Pull the next chunk of a readable the client owns: send
/// `streamDataRequest` and await the matching `streamData`. Referenced by
/// [`crate::channel_item::RemoteReadable`].
pub(crate) async fn pull_stream_chunk(
    connection: &Arc<ServerConnection>,
    stream_id: u64,
) -> Option<Vec<u8>> {
    if connection.fatal_error().is_some() {
        return None;
    }

    let deferred = Arc::new(DeferredResult::new());
    connection
        .pending_stream_pulls
        .insert(stream_id, deferred.clone());

    if connection
        .send(ServerFrame::StreamDataRequest { stream_id })
        .await
        .is_err()
    {
        connection.pending_stream_pulls.remove(&stream_id);
        return None;
    }

    deferred.wait().await.flatten()
}
