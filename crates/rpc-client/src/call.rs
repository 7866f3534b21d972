//! `do_call`: the client's send-path retry loop.
//!
//! Drives one `methodCall` to a terminal outcome, transparently absorbing
//! every recoverable `CallResult` the server can report along the way —
//! an outdated cookie-session cache, a missing HTTP security fetch, an
//! uninitialized session, or a session mutation that needs committing back
//! over HTTP — by running the matching collaborator step and retrying.
//! Only `Ok`, `ThrownValue`, and `Error` ever reach the caller.

use std::sync::Arc;

use rpc_core::concurrency::DeferredResult;
use rpc_core::{Error, Result};
use rpc_protocol::session::CookieSessionState;
use rpc_protocol::{CallResult, ClientFrame};

use crate::channel_item::{embed_channel_items, ChannelItem};
use crate::connection::Connection;
use crate::error::CallOutcome;
use crate::http::HttpSessionCollaborator;

/// Invoke `method` with `args` (any `{"$channelItemIndex": N}` placeholders
/// resolved against `channel_items`), retrying through every recoverable
/// protocol state until the server produces a terminal result.
///
/// `collaborator` supplies the three HTTP-side capabilities the retry loop
/// may need along the way; a deployment with no cookie-session or CSRF
/// requirements can pass one that always errors, since a server that never
/// reports the corresponding `CallResult` variants will never call it.
pub async fn do_call(
    connection: &Arc<Connection>,
    method: &str,
    args: serde_json::Value,
    channel_items: Vec<ChannelItem>,
    collaborator: &dyn HttpSessionCollaborator,
) -> Result<CallOutcome> {
    if let Some(err) = connection.fatal_error() {
        return Err(err);
    }

    let kinds: Vec<_> = channel_items.iter().map(ChannelItem::kind).collect();

    // A server that repeats the exact same recoverable demand after we've
    // already answered it once is violating the protocol — the retry loop
    // would otherwise spin forever running the same HTTP round trip.
    let mut last_http_security_demand: Option<(String, String)> = None;
    let mut last_init_demand: Option<String> = None;

    loop {
        // Never race a resync that is already underway; join it instead of
        // sending a call the server would just bounce again.
        connection.fix_outdated_cookie_session.wait_til_idle().await;

        if connection.is_closed() {
            return Err(connection
                .fatal_error()
                .unwrap_or_else(Error::connection_closed));
        }

        let sequence_number = connection.next_sequence();
        let ids: Vec<u64> = channel_items
            .iter()
            .map(|item| {
                connection
                    .sent_items
                    .record_send(item.identity(), item.clone(), sequence_number)
            })
            .collect();
        let wire_args = embed_channel_items(&args, &kinds, &ids);

        let call_id = connection.next_call_id();
        let deferred = Arc::new(DeferredResult::new());
        connection.pending_calls.insert(call_id, deferred.clone());

        connection
            .send(ClientFrame::MethodCall {
                sequence_number,
                call_id,
                method: method.to_string(),
                args: wire_args,
                security_group: connection.config.security_group.clone(),
            })
            .await?;

        let Some(result) = deferred.wait().await else {
            connection.pending_calls.remove(&call_id);
            return Err(connection
                .fatal_error()
                .unwrap_or_else(Error::connection_closed));
        };

        match result {
            CallResult::Ok { result } => return Ok(CallOutcome::Ok(result)),
            CallResult::ThrownValue { result } => return Ok(CallOutcome::ThrownValue(result)),
            CallResult::Error {
                error,
                http_status_code: _,
            } => return Ok(CallOutcome::Error(error)),

            CallResult::DoCookieSessionUpdate { token, result } => {
                connection.fix_outdated_cookie_session.expect_idle();
                commit_cookie_session_update(connection, collaborator, &token).await?;
                return Ok(CallOutcome::Ok(result));
            }

            CallResult::DroppedCookieSessionOutdated => {
                resync_from_http(connection, collaborator).await?;
                continue;
            }

            CallResult::NeedsInitializedCookieSession { question } => {
                if last_init_demand.as_deref() == Some(question.as_str()) {
                    let err = Error::protocol_violation(
                        "server repeated an identical needs-initialized-cookie-session demand",
                    );
                    connection.fail(err.clone());
                    return Err(err);
                }
                last_init_demand = Some(question.clone());
                connection.fix_outdated_cookie_session.expect_idle();
                initialize_from_http(connection, collaborator, &question).await?;
                continue;
            }

            CallResult::NeedsHttpSecurity { question, sync_key } => {
                let demand = (sync_key.clone(), question.clone());
                if last_http_security_demand.as_ref() == Some(&demand) {
                    let err = Error::protocol_violation(
                        "server repeated an identical needs-http-security demand",
                    );
                    connection.fail(err.clone());
                    return Err(err);
                }
                last_http_security_demand = Some(demand);
                fetch_http_security_properties(connection, collaborator, sync_key, &question)
                    .await?;
                continue;
            }
        }
    }
}

/// Run the `fixOutdatedCookieSession` single-flight to pull the HTTP side's
/// current session (no question token involved) and push it to the server.
async fn resync_from_http(
    connection: &Arc<Connection>,
    collaborator: &dyn HttpSessionCollaborator,
) -> Result<CookieSessionState> {
    let connection = connection.clone();
    connection
        .clone()
        .fix_outdated_cookie_session
        .exec(move || {
            let connection = connection.clone();
            async move {
                let session = collaborator.fetch_current_cookie_session().await?;
                let state = session.state();
                push_cookie_session(&connection, Some(session)).await?;
                Ok(state)
            }
        })
        .await
}

/// Same shape as [`resync_from_http`], but answering a server-minted
/// `GetCookieSessionQuestion` rather than an unprompted resync.
async fn initialize_from_http(
    connection: &Arc<Connection>,
    collaborator: &dyn HttpSessionCollaborator,
    question: &str,
) -> Result<CookieSessionState> {
    let connection = connection.clone();
    let question = question.to_string();
    connection
        .clone()
        .fix_outdated_cookie_session
        .exec(move || {
            let connection = connection.clone();
            async move {
                let answer = collaborator.get_cookie_session(&question).await?;
                let state = answer.session.clone();
                push_cookie_session(
                    &connection,
                    Some(rpc_protocol::session::CookieSession {
                        id: answer.session.id,
                        version: answer.session.version,
                        payload: answer.payload,
                    }),
                )
                .await?;
                Ok(state)
            }
        })
        .await
}

/// Commit a session mutation a method call produced, presenting the
/// server-sealed `CookieSessionUpdate` token to the HTTP side and pushing
/// the result back to the server.
async fn commit_cookie_session_update(
    connection: &Arc<Connection>,
    collaborator: &dyn HttpSessionCollaborator,
    token: &str,
) -> Result<()> {
    let answer = collaborator
        .update_cookie_session(token, &connection.config.initial_security_properties)
        .await?;
    push_cookie_session(
        connection,
        Some(rpc_protocol::session::CookieSession {
            id: answer.session.id,
            version: answer.session.version,
            payload: answer.payload,
        }),
    )
    .await
}

/// Fetch HTTP security properties for one security group, collapsing
/// concurrent fetches for the same `sync_key` into one.
async fn fetch_http_security_properties(
    connection: &Arc<Connection>,
    collaborator: &dyn HttpSessionCollaborator,
    sync_key: String,
    question: &str,
) -> Result<()> {
    let question = question.to_string();
    connection
        .fetch_http_security_properties
        .exec(sync_key, || async {
            let answer = collaborator.get_http_security_properties(&question).await?;
            let sequence_number = connection.next_sequence();
            connection
                .send(ClientFrame::UpdateHttpSecurityProperties {
                    sequence_number,
                    security_group: connection.config.security_group.clone(),
                    properties: answer.properties,
                })
                .await
        })
        .await
}

/// Let the embedder report that the underlying HTTP-side cookie state has
/// changed (e.g. a response set a new `rfSessState` cookie, or the embedder
/// polled it directly) — the generalization of `pollCookieStateCookie` for a
/// host that has no document/cookie jar of its own to poll.
///
/// No-op if `observed` matches what the client last pushed to the server.
/// Hammer prevention: if the last resync left this exact state stale, it is
/// remembered in `last_stale_target` and a repeat report of the same state
/// is skipped rather than re-triggering an HTTP round trip that is known to
/// still be in flight or to have just failed to resolve it.
pub async fn observe_cookie_state(
    connection: &Arc<Connection>,
    collaborator: &dyn HttpSessionCollaborator,
    observed: CookieSessionState,
) -> Result<()> {
    if connection.last_set_on_server.lock().as_ref() == Some(&observed) {
        return Ok(());
    }
    if connection.last_stale_target.lock().as_ref() == Some(&observed) {
        return Ok(());
    }

    let resolved = resync_from_http(connection, collaborator).await?;
    if resolved == observed {
        *connection.last_stale_target.lock() = Some(observed);
    } else {
        *connection.last_stale_target.lock() = None;
    }
    Ok(())
}

/// Push a fresh session snapshot to the server via `setCookieSession`, and
/// update the client's own cache to match once the send succeeds.
async fn push_cookie_session(
    connection: &Arc<Connection>,
    session: Option<rpc_protocol::session::CookieSession>,
) -> Result<()> {
    let sequence_number = connection.next_sequence();
    let (state, payload) = match &session {
        Some(s) => (Some(s.state()), Some(s.payload.clone())),
        None => (None, None),
    };
    connection
        .send(ClientFrame::SetCookieSession {
            sequence_number,
            session: state.clone(),
            payload,
        })
        .await?;

    *connection.last_set_on_server.lock() = state;
    *connection.cookie_session.lock() = match session {
        Some(s) => rpc_protocol::CachedCookieSession::Session(s),
        None => rpc_protocol::CachedCookieSession::Outdated,
    };
    Ok(())
}
