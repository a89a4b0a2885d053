//! Wire format for frames exchanged with the assistant backend.
//!
//! Inbound frames are UTF-8 JSON objects of one of two shapes:
//!
//! - `{"chunk": "<text>"}`: incremental content. The literal `"[DONE]"`
//!   terminates the current turn.
//! - `{"error": "<message>"}`: the backend failed the current turn.
//!
//! Outbound frames carry the user's text as `{"input": "<text>"}`.
//!
//! # Example
//!
//! ```rust
//! use chatstream::wire::{InboundFrame, Terminators};
//!
//! let terminators = Terminators::default();
//! let frame = InboundFrame::decode(r#"{"chunk":"Hel"}"#, &terminators).unwrap();
//! assert_eq!(frame, Some(InboundFrame::Chunk("Hel".to_string())));
//!
//! let done = InboundFrame::decode(r#"{"chunk":"[DONE]"}"#, &terminators).unwrap();
//! assert_eq!(done, Some(InboundFrame::Done));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel chunk value that ends a streamed turn.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A frame that could not be decoded.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is JSON but not an object carrying `chunk` or `error`.
    #[error("frame is not an object with a `chunk` or `error` field")]
    UnknownShape,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Incremental assistant text.
    Chunk(String),
    /// End of the current turn.
    Done,
    /// Backend-reported failure for the current turn.
    Error(String),
}

/// Raw JSON shape of an inbound frame.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl InboundFrame {
    /// Decode a raw transport frame.
    ///
    /// Returns `Ok(None)` for frames that are empty after trimming; those are
    /// keep-alive noise rather than errors.
    pub fn decode(raw: &str, terminators: &Terminators) -> Result<Option<Self>, FrameError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        // Struct deserialization would also accept a positional array.
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(FrameError::UnknownShape);
        }

        let frame: RawFrame = serde_json::from_value(value)?;
        match (frame.chunk, frame.error) {
            // An error field wins over a chunk in the same frame.
            (_, Some(error)) => Ok(Some(Self::Error(error))),
            (Some(chunk), None) if terminators.is_terminator(&chunk) => Ok(Some(Self::Done)),
            (Some(chunk), None) => Ok(Some(Self::Chunk(chunk))),
            (None, None) => Err(FrameError::UnknownShape),
        }
    }
}

/// Outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundFrame {
    /// The user's text, verbatim.
    pub input: String,
}

impl OutboundFrame {
    /// Build a request frame for the given text.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Serialize to the JSON text sent over the transport.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::json!({ "input": self.input }).to_string()
    }
}

/// Set of chunk values that terminate a turn.
///
/// Always contains [`DONE_SENTINEL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminators {
    values: Vec<String>,
}

impl Default for Terminators {
    fn default() -> Self {
        Self {
            values: vec![DONE_SENTINEL.to_string()],
        }
    }
}

impl Terminators {
    /// Build a terminator set from extra sentinels in addition to `[DONE]`.
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for value in extra {
            let value = value.into();
            if !value.is_empty() && !set.values.contains(&value) {
                set.values.push(value);
            }
        }
        set
    }

    /// Whether a chunk value ends the turn.
    #[must_use]
    pub fn is_terminator(&self, chunk: &str) -> bool {
        self.values.iter().any(|v| v == chunk)
    }

    /// All configured sentinels.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }
}
