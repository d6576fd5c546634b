//! Text payload codec.
//!
//! Text messages are encoded UTF-8 then base64 so arbitrary content
//! (including newlines and non-ASCII) traverses the JSON-only control
//! path safely.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::ProtocolError;

/// Encodes a text message for the wire.
pub fn encode_text(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Decodes a wire text payload back into the original string.
pub fn decode_text(payload: &str) -> Result<String, ProtocolError> {
    let bytes = STANDARD.decode(payload)?;
    Ok(String::from_utf8(bytes)?)
}
