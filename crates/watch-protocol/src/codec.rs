//! Codec for encoding and decoding relay messages.
//!
//! Messages travel as JSON text frames, one message per frame.

use thiserror::Error;

use crate::messages::Message;

/// Maximum encoded message size in bytes.
///
/// Matches the relay's read limit; anything larger is dropped by the relay.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error, including unknown message types.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message to a text frame.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a message from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a known message.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Decode a message from a binary frame carrying UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a known message.
pub fn decode_bytes(data: &[u8]) -> Result<Message, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}
