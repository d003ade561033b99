//! Channel Codec
//!
//! JSON encode/decode for the three backend channels. A frame that fails
//! to decode is a protocol violation: it is logged, counted, and dropped
//! without tearing down the connection.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON codec shared by all three channels.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a frame as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode<T: Serialize>(&self, frame: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }

    /// Decode a JSON text message into a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON for the expected
    /// frame type.
    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}
