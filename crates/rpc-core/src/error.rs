//! Unified error type shared across the duplex RPC session protocol crates.
//!
//! `Error` maps onto the error Kinds of the protocol's error handling design:
//! protocol violations and transport failures are fatal for a connection;
//! session-outdated, security-properties-missing and initialization-required
//! are recoverable states the client state machine drives through, so they
//! are *not* represented here — they are [`crate::Error`]-free branches of
//! `CallResult` in `rpc-protocol`. This type exists for everything that is a
//! genuine failure: decode errors, closed connections, and the method-level
//! `error`/`thrown-value` outcomes once they reach a caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias used throughout the workspace.
pub type Result<T> = core::result::Result<T, Error>;

/// Classification of an [`Error`], mirroring the error Kinds named in the
/// protocol's error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed frame, out-of-order sequence number, or any other violation
    /// that must end the connection.
    ProtocolViolation,
    /// The underlying transport failed (socket closed, write failed, …).
    Transport,
    /// A method call could not be completed because the connection already
    /// holds a fatal error.
    ConnectionClosed,
    /// The codec could not encode or decode a frame.
    Codec,
    /// A channel-item (callback or stream) reference was unknown or stale.
    UnknownChannelItem,
    /// A cryptographic token envelope failed to decrypt or had the wrong
    /// purpose/recipient.
    InvalidToken,
    /// The security gate denied a request.
    SecurityDenied,
    /// The remote method raised a structured error.
    Method,
    /// Internal invariant violation — should never be observed in practice.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProtocolViolation => "protocol violation",
            Self::Transport => "transport error",
            Self::ConnectionClosed => "connection closed",
            Self::Codec => "codec error",
            Self::UnknownChannelItem => "unknown channel item",
            Self::InvalidToken => "invalid token",
            Self::SecurityDenied => "security denied",
            Self::Method => "method error",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// The workspace-wide error type.
///
/// Cloneable so it can be stored once per connection (`fatalError`) and
/// handed out to every pending caller when the connection dies.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Error {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP status code, when the error originated from (or maps to) an
    /// HTTP-side collaborator call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
}

impl Error {
    /// Build a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status_code: None,
        }
    }

    /// Attach an HTTP status code to this error.
    #[must_use]
    pub fn with_status(mut self, code: u16) -> Self {
        self.http_status_code = Some(code);
        self
    }

    /// A protocol violation — always fatal for the owning connection.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }

    /// A transport-level failure — always fatal for the owning connection.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// The connection already holds a fatal error and cannot be used.
    pub fn connection_closed() -> Self {
        Self::new(ErrorKind::ConnectionClosed, "connection closed")
    }

    /// A codec encode/decode failure.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Codec, message)
    }

    /// `true` if this error kind always terminates the owning connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::ProtocolViolation | ErrorKind::Transport)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}
