//! The client-facing outcome of [`crate::call::do_call`].

use rpc_protocol::call::ErrorPayload;

/// What a successful round trip through `do_call` produced.
///
/// `ThrownValue` is kept as its own variant rather than folded into
/// `Error` — the protocol requires a legal non-`Error` throw to be
/// preserved verbatim as a non-error control-flow signal, not coerced into
/// the structured error taxonomy.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// The method ran to completion and returned this value.
    Ok(serde_json::Value),
    /// The method threw a legal non-`Error` value.
    ThrownValue(serde_json::Value),
    /// The method raised a structured error.
    Error(ErrorPayload),
}

impl CallOutcome {
    /// The successful result, or `None` for `ThrownValue`/`Error`.
    #[must_use]
    pub fn ok(self) -> Option<serde_json::Value> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// `true` for [`CallOutcome::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}
