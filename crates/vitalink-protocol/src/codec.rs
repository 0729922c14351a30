//! Codec for encoding and decoding Vitalink frames.
//!
//! Frames travel as JSON text messages over the WebSocket transport; the
//! transport itself delimits frames, so no length prefix is needed.

use thiserror::Error;

use crate::frames::Frame;

/// Maximum encoded frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a frame to a JSON string.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a frame from a JSON string.
///
/// A decode failure is contained to the offending frame: callers drop it
/// with a warning and keep the connection open.
///
/// # Errors
///
/// Returns an error if the input is too large or not a valid frame.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{codes, Frame, MessageKind};

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = vec![
            Frame::auth("token123", Some("42".to_string())),
            Frame::text_message("Hello, doctor"),
            Frame::Message {
                routing_key: Some("room_1_2".to_string()),
                sender_id: Some("1".to_string()),
                sender_role: Some("patient".to_string()),
                message_type: MessageKind::Media,
                content: "scan result".to_string(),
                media_url: Some("https://cdn.example/scan.png".to_string()),
                timestamp: Some(1_700_000_000_000),
            },
            Frame::heartbeat(),
            Frame::heartbeat_response(1_700_000_000_000),
            Frame::system("peer_joined", 1_700_000_000_000),
            Frame::connected("conn_7", "room_1_2", 1, 30_000),
            Frame::error(codes::PERSIST_FAILED, "store unavailable"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode("not json at all"),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(decode("{}"), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::text_message("x".repeat(MAX_FRAME_SIZE + 1));

        match encode(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {other:?}"),
        }

        let oversized = format!(
            r#"{{"type":"message","content":"{}"}}"#,
            "x".repeat(MAX_FRAME_SIZE)
        );
        match decode(&oversized) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {other:?}"),
        }
    }

    #[test]
    fn test_sender_fields_omitted_when_unset() {
        let encoded = encode(&Frame::text_message("hi")).unwrap();
        assert!(!encoded.contains("sender_id"));
        assert!(!encoded.contains("media_url"));
    }
}
