//! `CallResult` — the tagged outcome of a `methodCall` — and the DTOs used
//! to carry callbacks and readable streams across the channel.

use serde::{Deserialize, Serialize};

/// The user-visible shape of an error that crossed the wire, per the
/// protocol's error handling design: name/message plus optional cause and
/// source-location fields, with an optional HTTP status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error class name (e.g. `"Error"`, `"TypeError"`).
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Chained cause, recursively the same shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorPayload>>,
    /// Stack trace, only included when the server's redaction policy
    /// permits it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Source file, only included when the server's redaction policy
    /// permits it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Source line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// Source column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    /// HTTP status code to report alongside this error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
}

impl ErrorPayload {
    /// Build a minimal error payload with just a name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            cause: None,
            stack: None,
            file_name: None,
            line_number: None,
            column_number: None,
            http_status_code: None,
        }
    }

    /// Attach an HTTP status code.
    #[must_use]
    pub fn with_status(mut self, code: u16) -> Self {
        self.http_status_code = Some(code);
        self
    }
}

/// The tagged outcome of a `methodCall`, carried on `methodCallResult`.
///
/// Exactly one variant is ever produced for a given `callId`; the client
/// state machine's retry loop (§4.4) consumes the five "not ok" variants
/// internally and only ever surfaces `Ok`/`ThrownValue`/`Error` to the
/// caller of `do_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CallResult {
    /// The method ran to completion and returned `result`.
    Ok {
        /// The method's return value.
        result: serde_json::Value,
    },
    /// The method threw a legal non-`Error` value, which must be re-thrown
    /// verbatim rather than folded into the error taxonomy.
    ThrownValue {
        /// The thrown value, decoded as-is.
        result: serde_json::Value,
    },
    /// The method raised a structured error.
    Error {
        /// The structured error payload.
        error: ErrorPayload,
        /// HTTP status code to accompany the error, duplicated here for
        /// transports that render it out of band.
        #[serde(skip_serializing_if = "Option::is_none")]
        http_status_code: Option<u16>,
    },
    /// The server needs HTTP security properties for this call's security
    /// group before it can execute the method. Carries an encrypted
    /// question token the client must answer over the HTTP side channel.
    NeedsHttpSecurity {
        /// Encrypted `GetHttpSecurityPropertiesQuestion` envelope.
        question: String,
        /// Single-flight key so concurrent calls to the same group collapse
        /// into one HTTP fetch.
        sync_key: String,
    },
    /// The client must initialize the cookie session over HTTP before this
    /// call's effects can be committed; the method did not run.
    NeedsInitializedCookieSession {
        /// Encrypted `GetCookieSessionQuestion` envelope.
        question: String,
    },
    /// The method ran, modified the session, and the client must commit
    /// the update to HTTP and feed it back via `setCookieSession`. The call
    /// already succeeded, so this is the terminal result a client wraps in
    /// `Ok` once it has finished committing the session update — it is
    /// never retried, only unwrapped.
    DoCookieSessionUpdate {
        /// Encrypted `CookieSessionUpdate` envelope.
        token: String,
        /// The method's return value, to hand back once the session update
        /// has been committed.
        result: serde_json::Value,
    },
    /// The server's cached cookie-session view was outdated; the client
    /// must resync and retry. The method did not run.
    DroppedCookieSessionOutdated,
}

impl CallResult {
    /// `true` for the three variants that are recoverable protocol states
    /// the client's retry loop drives through, rather than final outcomes
    /// handed to the caller.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NeedsHttpSecurity { .. }
                | Self::NeedsInitializedCookieSession { .. }
                | Self::DoCookieSessionUpdate { .. }
                | Self::DroppedCookieSessionOutdated
        )
    }
}

/// Which kind of channel item a [`ChannelItemDto`] stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelItemKind {
    /// A callback function.
    Callback,
    /// A readable byte stream.
    Readable,
}

/// The DTO substituted for a callback or readable stream when it appears
/// inside call arguments or results. `id` is assigned by the sending side
/// the first time the item's identity is sent, and is stable for the life
/// of the item (a second send of the same identity reuses the same id,
/// which is how the release race-fix stays correct — see
/// `rpc_channel_items`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ChannelItemDto")]
pub struct ChannelItemDto {
    /// Which kind of item this DTO stands in for.
    #[serde(rename = "_dtoType")]
    pub kind: ChannelItemKind,
    /// Dense integer id, unique within the owning connection.
    pub id: u64,
}
