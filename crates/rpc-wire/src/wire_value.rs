//! `WireValue` — the handful of JavaScript-native values that don't
//! round-trip through plain JSON, preserved across a call boundary via an
//! explicit tagged representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value that needs more than plain JSON to round-trip faithfully.
///
/// `Json` is the catch-all for anything that's already representable —
/// most call arguments and results never leave it. The other variants
/// exist because their JavaScript originals either have no JSON
/// representation at all (`undefined`, `BigInt`) or would silently lose
/// type information if flattened to a JSON string or number (`Date`,
/// binary buffers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$wire", content = "value", rename_all = "camelCase")]
pub enum WireValue {
    /// An arbitrary JSON value with no special handling.
    Json(serde_json::Value),
    /// A point in time, serialized as RFC 3339 inside the envelope rather
    /// than collapsed to a plain string so the receiving side can
    /// distinguish "this was a Date" from "this was just a string that
    /// looks like one".
    Date(DateTime<Utc>),
    /// An arbitrary-precision integer, carried as its decimal digits
    /// since JSON numbers cannot represent the full range of a 64-bit
    /// (or larger) JavaScript `BigInt` without precision loss.
    BigInt(String),
    /// JavaScript's `undefined`, distinct from JSON `null`.
    Undefined,
    /// A binary buffer, base64-encoded inside the envelope.
    #[serde(with = "buffer_as_base64")]
    Buffer(Vec<u8>),
}

impl WireValue {
    /// Wrap a plain JSON value with no special handling.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(value)
    }

    /// `true` if this is the `undefined` sentinel.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// View this value as plain JSON, where possible. `Date` collapses to
    /// its RFC 3339 string, `BigInt` to its decimal string, `Buffer` to a
    /// base64 string, and `Undefined` to JSON `null` — each a lossy but
    /// useful fallback for callers that don't care about round-tripping
    /// the exact kind.
    #[must_use]
    pub fn to_json_lossy(&self) -> serde_json::Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Self::BigInt(digits) => serde_json::Value::String(digits.clone()),
            Self::Undefined => serde_json::Value::Null,
            Self::Buffer(bytes) => {
                serde_json::Value::String(base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    bytes,
                ))
            }
        }
    }
}

impl From<serde_json::Value> for WireValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

mod buffer_as_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
