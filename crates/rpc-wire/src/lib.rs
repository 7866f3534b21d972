//! Wire codec and extended-JSON value model for the duplex RPC session
//! protocol.
//!
//! ## Design philosophy
//!
//! - **Wire format**: JSON, with a thin extension (`WireValue`) so the
//!   handful of JavaScript-native values that don't round-trip through
//!   plain JSON — `Date`, `BigInt`, `undefined`, binary buffers — survive a
//!   call boundary intact.
//! - **Pluggable**: codecs are selected through the [`Codec`] trait so a
//!   future binary format can be added without touching call sites.
//!
//! ## Usage
//!
//! ```rust
//! use rpc_wire::{Codec, JsonPlusCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct MyMessage {
//!     id: u32,
//!     method: String,
//! }
//!
//! let codec = JsonPlusCodec::new();
//! let msg = MyMessage { id: 1, method: "test".into() };
//!
//! let bytes = codec.encode(&msg).unwrap();
//! let decoded: MyMessage = codec.decode(&bytes).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod wire_value;

pub use wire_value::WireValue;

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};

/// Wire format codec error.
#[derive(Debug, Clone)]
pub struct CodecError {
    /// Error message.
    pub message: String,
    /// Optional source location or nested cause description.
    pub source: Option<String>,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "codec error: {}", self.message)
    }
}

impl std::error::Error for CodecError {}

impl CodecError {
    /// Create a new codec error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a codec error with source information.
    pub fn with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(format!("encode: {}", message.into()))
    }

    /// Create a decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(format!("decode: {}", message.into()))
    }
}

impl From<CodecError> for rpc_core::Error {
    fn from(err: CodecError) -> Self {
        rpc_core::Error::codec(err.message)
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Wire format codec trait.
///
/// This trait abstracts over serialization format, allowing pluggable
/// encoding/decoding while maintaining type safety at the frame boundary.
///
/// # Implementors
///
/// - [`JsonCodec`] — plain `serde_json`, no extended-value support.
/// - [`JsonPlusCodec`] — the protocol default; identical wire bytes to
///   [`JsonCodec`], documented for use with types that embed [`WireValue`].
pub trait Codec: Send + Sync {
    /// Encode a value to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>>;

    /// Decode bytes to a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T>;

    /// Content type for this codec (e.g. `"application/json"`).
    fn content_type(&self) -> &'static str;

    /// Whether this codec supports incremental/streaming decoding via
    /// [`StreamingJsonDecoder`]-style framing.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Codec name, for debugging and codec-selection-by-name.
    fn name(&self) -> &'static str;
}

/// Plain JSON codec using `serde_json`.
///
/// Produces human-readable JSON with no extended-value handling; types
/// containing a [`WireValue`] still round-trip correctly through this
/// codec since `WireValue` carries its own `Serialize`/`Deserialize` impl,
/// but callers who want that documented explicitly should prefer
/// [`JsonPlusCodec`].
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    /// Pretty-print output (default: `false`).
    pub pretty: bool,
}

impl JsonCodec {
    /// Create a new JSON codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a JSON codec with pretty printing enabled.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|e| CodecError::encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decode(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// The protocol's default codec: JSON framing with [`WireValue`] carrying
/// the Date/BigInt/undefined/Buffer extensions across the boundary.
///
/// Byte-for-byte identical to [`JsonCodec`] — the extension lives entirely
/// in how `WireValue` serializes itself, not in a different wire shape —
/// but types are expected to use `WireValue` wherever the original value
/// might be one of the extended kinds.
#[derive(Debug, Clone, Default)]
pub struct JsonPlusCodec {
    inner: JsonCodec,
}

impl JsonPlusCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Codec for JsonPlusCodec {
    fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        self.inner.encode(value)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        self.inner.decode(bytes)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "json-plus"
    }
}

/// Streaming JSON decoder for newline-delimited frame streams.
#[derive(Debug)]
pub struct StreamingJsonDecoder {
    buffer: Vec<u8>,
}

impl Default for StreamingJsonDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingJsonDecoder {
    /// Create a new streaming decoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create with pre-allocated buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Feed data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete message.
    ///
    /// Returns `Some(T)` if a complete message is available, `None` if
    /// more data is needed.
    pub fn try_decode<T: DeserializeOwned>(&mut self) -> CodecResult<Option<T>> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = &self.buffer[..pos];

        if line.is_empty() || line.iter().all(u8::is_ascii_whitespace) {
            self.buffer.drain(..=pos);
            return Ok(None);
        }

        let result = serde_json::from_slice(line);
        self.buffer.drain(..=pos);

        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(CodecError::decode(e.to_string())),
        }
    }

    /// Clear the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Enum wrapper over the available codecs, for codec selection without
/// `dyn` trait objects.
#[derive(Debug, Clone, Default)]
pub enum AnyCodec {
    /// Plain JSON.
    Json(JsonCodec),
    /// JSON with extended-value support (the default).
    #[default]
    JsonPlus(JsonPlusCodec),
}

impl AnyCodec {
    /// Create a codec by name.
    ///
    /// Supported names: `"json"`, `"json-plus"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json(JsonCodec::new())),
            "json-plus" => Some(Self::JsonPlus(JsonPlusCodec::new())),
            _ => None,
        }
    }

    /// List available codec names.
    pub fn available_names() -> &'static [&'static str] {
        &["json", "json-plus"]
    }

    /// Encode a value to bytes.
    pub fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        match self {
            Self::Json(c) => c.encode(value),
            Self::JsonPlus(c) => c.encode(value),
        }
    }

    /// Decode bytes to a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        match self {
            Self::Json(c) => c.decode(bytes),
            Self::JsonPlus(c) => c.decode(bytes),
        }
    }

    /// Content type.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json(c) => c.content_type(),
            Self::JsonPlus(c) => c.content_type(),
        }
    }

    /// Codec name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Json(c) => c.name(),
            Self::JsonPlus(c) => c.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        id: u32,
        method: String,
        params: Option<serde_json::Value>,
    }

    #[test]
    fn json_codec_roundtrip() {
        let codec = JsonCodec::new();
        let msg = TestMessage {
            id: 42,
            method: "test/method".into(),
            params: Some(serde_json::json!({"key": "value"})),
        };

        let encoded = codec.encode(&msg).unwrap();
        let decoded: TestMessage = codec.decode(&encoded).unwrap();

        assert_eq!(msg, decoded);
    }

    #[test]
    fn json_plus_codec_roundtrip_with_wire_value_field() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct WithExtension {
            id: u32,
            value: WireValue,
        }

        let codec = JsonPlusCodec::new();
        let msg = WithExtension {
            id: 1,
            value: WireValue::BigInt("123456789012345678901234567890".into()),
        };

        let encoded = codec.encode(&msg).unwrap();
        let decoded: WithExtension = codec.decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn streaming_decoder_handles_partial_then_complete() {
        let mut decoder = StreamingJsonDecoder::new();

        decoder.feed(br#"{"id":1,"method":"a","params":null}"#);
        assert!(decoder.try_decode::<TestMessage>().unwrap().is_none());

        decoder.feed(b"\n");
        let msg: TestMessage = decoder.try_decode().unwrap().unwrap();
        assert_eq!(msg.id, 1);
        assert_eq!(msg.method, "a");
    }

    #[test]
    fn streaming_decoder_handles_multiple_messages_at_once() {
        let mut decoder = StreamingJsonDecoder::new();
        decoder.feed(
            br#"{"id":1,"method":"a","params":null}
{"id":2,"method":"b","params":null}
"#,
        );

        let msg1: TestMessage = decoder.try_decode().unwrap().unwrap();
        assert_eq!(msg1.id, 1);
        let msg2: TestMessage = decoder.try_decode().unwrap().unwrap();
        assert_eq!(msg2.id, 2);
        assert!(decoder.try_decode::<TestMessage>().unwrap().is_none());
    }

    #[test]
    fn any_codec_dispatches_by_name() {
        let codec = AnyCodec::from_name("json-plus").unwrap();
        assert_eq!(codec.name(), "json-plus");
        assert!(AnyCodec::from_name("unknown").is_none());
        assert!(AnyCodec::available_names().contains(&"json-plus"));
    }

    #[test]
    fn codec_error_reports_decode_failure() {
        let codec = JsonCodec::new();
        let result: CodecResult<TestMessage> = codec.decode(b"invalid json");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("decode"));
    }
}
