//! Client-side state machine for the duplex RPC session protocol.
//!
//! A [`Connection`] owns one transport for its whole lifetime: the pending-
//! call table that correlates a sent `methodCall` with its eventual
//! `methodCallResult`, the channel-item registries that track callbacks and
//! readable streams crossing in either direction, and the cached view of
//! the cookie session the server's method dispatch depends on.
//!
//! [`call::do_call`] is the crate's single entry point for invoking a
//! method: it drives one call through every recoverable protocol state —
//! an outdated session cache, a missing HTTP security fetch, an
//! uninitialized session — transparently, consulting an
//! [`http::HttpSessionCollaborator`] supplied by the embedder for the HTTP
//! side of each of those recoveries. [`registry::ConnectionRegistry`] sits
//! above that: one [`Connection`] per URL, built at most once even when
//! many callers race to open the same one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod call;
mod channel_item;
mod config;
mod connection;
mod dispatcher;
mod error;
mod http;
mod registry;

pub use call::{do_call, observe_cookie_state};
pub use channel_item::{BoxFuture, Callback, ChannelItem, ChannelItemKey, ReadableSource};
pub use config::ClientConfig;
pub use connection::Connection;
pub use error::CallOutcome;
pub use http::HttpSessionCollaborator;
pub use registry::{open, ConnectionRegistry};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use rpc_protocol::session::{
        CookieSession, CookieSessionState, SecurityPropertiesOfHttpRequest,
    };
    use rpc_protocol::tokens::{GetCookieSessionAnswer, GetHttpSecurityPropertiesAnswer};
    use rpc_protocol::{CallResult, ClientFrame, ServerFrame};
    use rpc_transport::{memory, TransportEvent};

    use super::*;

    struct NoCollaborator;

    #[async_trait]
    impl HttpSessionCollaborator for NoCollaborator {
        async fn get_cookie_session(
            &self,
            _sealed_question: &str,
        ) -> rpc_core::Result<GetCookieSessionAnswer> {
            Err(rpc_core::Error::protocol_violation(
                "no HTTP collaborator wired for this test",
            ))
        }

        async fn fetch_current_cookie_session(&self) -> rpc_core::Result<CookieSession> {
            Err(rpc_core::Error::protocol_violation(
                "no HTTP collaborator wired for this test",
            ))
        }

        async fn get_http_security_properties(
            &self,
            _sealed_question: &str,
        ) -> rpc_core::Result<GetHttpSecurityPropertiesAnswer> {
            Err(rpc_core::Error::protocol_violation(
                "no HTTP collaborator wired for this test",
            ))
        }

        async fn update_cookie_session(
            &self,
            _sealed_token: &str,
            _request_properties: &SecurityPropertiesOfHttpRequest,
        ) -> rpc_core::Result<GetCookieSessionAnswer> {
            Err(rpc_core::Error::protocol_violation(
                "no HTTP collaborator wired for this test",
            ))
        }
    }

    fn read_client_frame(raw: &str) -> ClientFrame {
        serde_json::from_str(raw).expect("valid client frame")
    }

    #[tokio::test]
    async fn ok_result_round_trips_through_do_call() {
        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await; // Open

        let server_side_for_task = server_side.clone();
        tokio::spawn(async move {
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected a methodCall frame");
            };
            let ClientFrame::MethodCall { call_id, .. } = read_client_frame(&raw) else {
                panic!("expected MethodCall");
            };
            let reply = ServerFrame::MethodCallResult {
                call_id,
                result: CallResult::Ok {
                    result: json!({"ok": true}),
                },
            };
            server_side_for_task
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
        });

        let outcome = do_call(
            &connection,
            "widgets.create",
            json!({"name": "a"}),
            Vec::new(),
            &NoCollaborator,
        )
        .await
        .expect("do_call succeeds");

        assert_eq!(outcome.ok(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn thrown_value_is_surfaced_without_retry() {
        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await;

        let server_side_for_task = server_side.clone();
        tokio::spawn(async move {
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected a methodCall frame");
            };
            let ClientFrame::MethodCall { call_id, .. } = read_client_frame(&raw) else {
                panic!("expected MethodCall");
            };
            let reply = ServerFrame::MethodCallResult {
                call_id,
                result: CallResult::ThrownValue {
                    result: json!("denied"),
                },
            };
            server_side_for_task
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
        });

        let outcome = do_call(
            &connection,
            "widgets.create",
            json!(null),
            Vec::new(),
            &NoCollaborator,
        )
        .await
        .unwrap();

        match outcome {
            CallOutcome::ThrownValue(v) => assert_eq!(v, json!("denied")),
            other => panic!("expected ThrownValue, got {other:?}"),
        }
    }

    struct StubCollaborator;

    #[async_trait]
    impl HttpSessionCollaborator for StubCollaborator {
        async fn get_cookie_session(
            &self,
            _sealed_question: &str,
        ) -> rpc_core::Result<GetCookieSessionAnswer> {
            Ok(GetCookieSessionAnswer {
                nonce: "n".into(),
                session: CookieSessionState {
                    id: "s1".into(),
                    version: 1,
                },
                payload: json!({}),
            })
        }

        async fn fetch_current_cookie_session(&self) -> rpc_core::Result<CookieSession> {
            Ok(CookieSession {
                id: "s1".into(),
                version: 2,
                payload: json!({}),
            })
        }

        async fn get_http_security_properties(
            &self,
            _sealed_question: &str,
        ) -> rpc_core::Result<GetHttpSecurityPropertiesAnswer> {
            unreachable!("not exercised by this test")
        }

        async fn update_cookie_session(
            &self,
            _sealed_token: &str,
            _request_properties: &SecurityPropertiesOfHttpRequest,
        ) -> rpc_core::Result<GetCookieSessionAnswer> {
            unreachable!("not exercised by this test")
        }
    }

    #[tokio::test]
    async fn dropped_cookie_session_outdated_resyncs_then_retries() {
        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await;

        let server_side_for_task = server_side.clone();
        tokio::spawn(async move {
            // First attempt: server reports its cache is stale.
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected first methodCall");
            };
            let ClientFrame::MethodCall { call_id, .. } = read_client_frame(&raw) else {
                panic!("expected MethodCall");
            };
            let reply = ServerFrame::MethodCallResult {
                call_id,
                result: CallResult::DroppedCookieSessionOutdated,
            };
            server_side_for_task
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();

            // Client should push a fresh setCookieSession before retrying.
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected setCookieSession");
            };
            assert!(matches!(
                read_client_frame(&raw),
                ClientFrame::SetCookieSession { .. }
            ));

            // Second attempt succeeds.
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected retried methodCall");
            };
            let ClientFrame::MethodCall { call_id, .. } = read_client_frame(&raw) else {
                panic!("expected MethodCall");
            };
            let reply = ServerFrame::MethodCallResult {
                call_id,
                result: CallResult::Ok { result: json!(1) },
            };
            server_side_for_task
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
        });

        let outcome = do_call(
            &connection,
            "widgets.create",
            json!(null),
            Vec::new(),
            &StubCollaborator,
        )
        .await
        .unwrap();

        assert_eq!(outcome.ok(), Some(json!(1)));
    }

    #[tokio::test]
    async fn repeated_identical_http_security_demand_is_a_protocol_violation() {
        struct SecurityCollaborator;

        #[async_trait]
        impl HttpSessionCollaborator for SecurityCollaborator {
            async fn get_cookie_session(
                &self,
                _sealed_question: &str,
            ) -> rpc_core::Result<GetCookieSessionAnswer> {
                unreachable!("not exercised by this test")
            }

            async fn fetch_current_cookie_session(&self) -> rpc_core::Result<CookieSession> {
                unreachable!("not exercised by this test")
            }

            async fn get_http_security_properties(
                &self,
                _sealed_question: &str,
            ) -> rpc_core::Result<GetHttpSecurityPropertiesAnswer> {
                Ok(GetHttpSecurityPropertiesAnswer {
                    nonce: "n".into(),
                    properties: SecurityPropertiesOfHttpRequest {
                        origin: None,
                        destination: "default".into(),
                        could_be_simple_request: false,
                        browser_might_have_security_issue: false,
                        csrf_protection_mode: rpc_protocol::CsrfProtectionMode::Preflight,
                        cors_read_token: None,
                        csrf_token: None,
                        read_was_proven: false,
                    },
                })
            }

            async fn update_cookie_session(
                &self,
                _sealed_token: &str,
                _request_properties: &SecurityPropertiesOfHttpRequest,
            ) -> rpc_core::Result<GetCookieSessionAnswer> {
                unreachable!("not exercised by this test")
            }
        }

        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await;

        let server_side_for_task = server_side.clone();
        tokio::spawn(async move {
            // First attempt: server asks for security properties.
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected first methodCall");
            };
            let ClientFrame::MethodCall { call_id, .. } = read_client_frame(&raw) else {
                panic!("expected MethodCall");
            };
            let reply = ServerFrame::MethodCallResult {
                call_id,
                result: CallResult::NeedsHttpSecurity {
                    question: "question".into(),
                    sync_key: "default".into(),
                },
            };
            server_side_for_task
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();

            // Client answers and retries the call.
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected updateHttpSecurityProperties");
            };
            assert!(matches!(
                read_client_frame(&raw),
                ClientFrame::UpdateHttpSecurityProperties { .. }
            ));
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected retried methodCall");
            };
            let ClientFrame::MethodCall { call_id, .. } = read_client_frame(&raw) else {
                panic!("expected MethodCall");
            };

            // Buggy server repeats the exact same demand instead of
            // proceeding — the client must treat this as fatal rather
            // than loop forever.
            let reply = ServerFrame::MethodCallResult {
                call_id,
                result: CallResult::NeedsHttpSecurity {
                    question: "question".into(),
                    sync_key: "default".into(),
                },
            };
            server_side_for_task
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
        });

        let outcome = do_call(
            &connection,
            "widgets.create",
            json!(null),
            Vec::new(),
            &SecurityCollaborator,
        )
        .await;

        assert!(outcome.is_err());
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn connection_close_fails_pending_calls() {
        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await;

        let call = tokio::spawn({
            let connection = connection.clone();
            async move {
                do_call(
                    &connection,
                    "widgets.create",
                    json!(null),
                    Vec::new(),
                    &NoCollaborator,
                )
                .await
            }
        });

        // Drain the methodCall the background task sent before closing.
        let _ = server_side.recv().await;
        server_side.close("server gone").await;

        let outcome = call.await.unwrap();
        assert!(outcome.is_err());
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn observe_cookie_state_resyncs_when_it_differs_from_last_pushed() {
        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await;

        let server_side_for_task = server_side.clone();
        tokio::spawn(async move {
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected setCookieSession");
            };
            assert!(matches!(
                read_client_frame(&raw),
                ClientFrame::SetCookieSession { .. }
            ));
        });

        call::observe_cookie_state(
            &connection,
            &StubCollaborator,
            CookieSessionState {
                id: "stale".into(),
                version: 0,
            },
        )
        .await
        .unwrap();

        assert_eq!(
            connection.last_set_on_server.lock().as_ref(),
            Some(&CookieSessionState {
                id: "s1".into(),
                version: 2,
            })
        );
    }

    #[tokio::test]
    async fn observe_cookie_state_skips_a_repeated_still_stale_report() {
        let (client_side, server_side) = memory::pair();
        let connection = open(client_side, ClientConfig::new("default"));
        let _ = server_side.recv().await;

        struct StaysStale;

        #[async_trait]
        impl HttpSessionCollaborator for StaysStale {
            async fn get_cookie_session(
                &self,
                _sealed_question: &str,
            ) -> rpc_core::Result<GetCookieSessionAnswer> {
                unreachable!("not exercised by this test")
            }

            async fn fetch_current_cookie_session(&self) -> rpc_core::Result<CookieSession> {
                Ok(CookieSession {
                    id: "same".into(),
                    version: 3,
                    payload: json!({}),
                })
            }

            async fn get_http_security_properties(
                &self,
                _sealed_question: &str,
            ) -> rpc_core::Result<GetHttpSecurityPropertiesAnswer> {
                unreachable!("not exercised by this test")
            }

            async fn update_cookie_session(
                &self,
                _sealed_token: &str,
                _request_properties: &SecurityPropertiesOfHttpRequest,
            ) -> rpc_core::Result<GetCookieSessionAnswer> {
                unreachable!("not exercised by this test")
            }
        }

        let server_side_for_task = server_side.clone();
        tokio::spawn(async move {
            // Only one setCookieSession should ever be sent: the second
            // report of the same stale target must be skipped.
            let Some(TransportEvent::Message(raw)) = server_side_for_task.recv().await else {
                panic!("expected setCookieSession");
            };
            assert!(matches!(
                read_client_frame(&raw),
                ClientFrame::SetCookieSession { .. }
            ));
        });

        let target = CookieSessionState {
            id: "same".into(),
            version: 3,
        };
        call::observe_cookie_state(&connection, &StaysStale, target.clone())
            .await
            .unwrap();
        assert_eq!(connection.last_stale_target.lock().as_ref(), Some(&target));

        // Repeating the same observation must not send a second frame.
        call::observe_cookie_state(&connection, &StaysStale, target)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn registry_reuses_the_connection_for_the_same_url() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry
            .get_or_connect("memory://one".into(), || async {
                let (client_side, _server_side) = memory::pair();
                Ok(open(client_side, ClientConfig::new("default")))
            })
            .await
            .unwrap();
        let b = registry
            .get_or_connect("memory://one".into(), || async {
                panic!("must not build twice for the same url")
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
