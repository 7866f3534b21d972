//! Exercises the client and server state machines together over an
//! in-memory transport: a method call that needs HTTP security properties
//! resolved first, then a method call that establishes a cookie session as
//! a side effect of its return value.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use rpc::prelude::*;
use rpc_protocol::session::CsrfProtectionMode;
use rpc_protocol::tokens::GetHttpSecurityPropertiesQuestion;

struct EchoDispatcher;

#[async_trait]
impl MethodDispatcher for EchoDispatcher {
    async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchOutcome {
        match request.method {
            "widgets.echo" => DispatchOutcome::unmodified(MethodOutcome::Ok(request.args)),
            "widgets.adopt" => DispatchOutcome {
                outcome: MethodOutcome::Ok(json!({"adopted": true})),
                modified_session_payload: Some(json!({"owner": request.args})),
            },
            other => DispatchOutcome::unmodified(MethodOutcome::Error(ErrorPayload::new(
                "NotFound",
                format!("no such method: {other}"),
            ))),
        }
    }
}

struct StubHttpSide {
    token_box: Arc<TokenBox>,
}

#[async_trait]
impl HttpSessionCollaborator for StubHttpSide {
    async fn get_cookie_session(
        &self,
        sealed_question: &str,
    ) -> rpc_core::Result<rpc_protocol::GetCookieSessionAnswer> {
        let question: rpc_protocol::tokens::GetCookieSessionQuestion =
            self.token_box.open(
                rpc_protocol::tokens::PURPOSE_GET_COOKIE_SESSION_QUESTION,
                sealed_question,
            )?;
        Ok(rpc_protocol::GetCookieSessionAnswer {
            nonce: question.nonce,
            session: CookieSessionState {
                id: "session-1".into(),
                version: 1,
            },
            payload: json!({}),
        })
    }

    async fn fetch_current_cookie_session(&self) -> rpc_core::Result<CookieSession> {
        Err(rpc_core::Error::protocol_violation(
            "test never triggers an unprompted resync",
        ))
    }

    async fn get_http_security_properties(
        &self,
        sealed_question: &str,
    ) -> rpc_core::Result<rpc_protocol::tokens::GetHttpSecurityPropertiesAnswer> {
        let question: GetHttpSecurityPropertiesQuestion = self.token_box.open(
            rpc_protocol::tokens::PURPOSE_GET_HTTP_SECURITY_PROPERTIES_QUESTION,
            sealed_question,
        )?;
        Ok(rpc_protocol::tokens::GetHttpSecurityPropertiesAnswer {
            nonce: question.nonce,
            properties: SecurityPropertiesOfHttpRequest {
                origin: None,
                destination: question.security_group,
                could_be_simple_request: false,
                browser_might_have_security_issue: false,
                csrf_protection_mode: CsrfProtectionMode::Preflight,
                cors_read_token: None,
                csrf_token: None,
                read_was_proven: false,
            },
        })
    }

    async fn update_cookie_session(
        &self,
        sealed_token: &str,
        _request_properties: &SecurityPropertiesOfHttpRequest,
    ) -> rpc_core::Result<rpc_protocol::GetCookieSessionAnswer> {
        let update: rpc_protocol::tokens::CookieSessionUpdate = self
            .token_box
            .open(rpc_protocol::tokens::PURPOSE_COOKIE_SESSION_UPDATE, sealed_token)?;
        Ok(rpc_protocol::GetCookieSessionAnswer {
            nonce: "n/a".into(),
            session: CookieSessionState {
                id: update.state.id,
                version: update.state.version + 1,
            },
            payload: update.payload,
        })
    }
}

#[tokio::test]
async fn method_call_resolves_http_security_then_succeeds() {
    let (client_side, server_side) = rpc_transport::memory::pair();
    let token_box = Arc::new(TokenBox::generate().unwrap());

    let _server = accept(
        server_side,
        ServerConfig::new(),
        token_box.clone(),
        Arc::new(AlwaysLatest),
        Arc::new(EchoDispatcher),
    );

    let connection = open(client_side, ClientConfig::new("default"));
    let collaborator = StubHttpSide { token_box };

    let outcome = do_call(
        &connection,
        "widgets.echo",
        json!({"name": "bolt"}),
        Vec::new(),
        &collaborator,
    )
    .await
    .expect("do_call succeeds");

    assert_eq!(outcome.ok(), Some(json!({"name": "bolt"})));
}

#[tokio::test]
async fn a_session_mutating_call_commits_its_update_through_http() {
    let (client_side, server_side) = rpc_transport::memory::pair();
    let token_box = Arc::new(TokenBox::generate().unwrap());

    let _server = accept(
        server_side,
        ServerConfig::new(),
        token_box.clone(),
        Arc::new(AlwaysLatest),
        Arc::new(EchoDispatcher),
    );

    let connection = open(client_side, ClientConfig::new("default"));
    let collaborator = StubHttpSide { token_box };

    let outcome = do_call(
        &connection,
        "widgets.adopt",
        json!("bolt"),
        Vec::new(),
        &collaborator,
    )
    .await
    .expect("do_call succeeds");

    assert_eq!(outcome.ok(), Some(json!({"adopted": true})));
}
