//! Frame types for the Vitalink protocol.
//!
//! Frames are the fundamental unit of communication between clients and the
//! hub. Each frame is a JSON object tagged by its `type` field, validated
//! once at decode time so internal dispatch is exhaustive.

use serde::{Deserialize, Serialize};

/// Stable error codes carried by [`Frame::Error`].
pub mod codes {
    /// Credential rejected during the handshake.
    pub const AUTH_FAILED: u16 = 4001;
    /// Inbound frame could not be decoded.
    pub const DECODE_FAILED: u16 = 4002;
    /// Message could not be persisted; fan-out was aborted.
    pub const PERSIST_FAILED: u16 = 4003;
    /// Frame kind is not accepted in the current connection state.
    pub const UNSUPPORTED_FRAME: u16 = 4004;
    /// Handshake did not complete within the allowed window.
    pub const HANDSHAKE_TIMEOUT: u16 = 4005;
}

/// Frame kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Auth,
    Message,
    Typing,
    Heartbeat,
    HeartbeatResponse,
    System,
    Connected,
    Error,
}

/// Payload kind of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text content.
    #[default]
    Text,
    /// Content references uploaded media via `media_url`.
    Media,
    /// Transient typing indicator.
    Typing,
    /// Server-generated notification.
    System,
}

impl MessageKind {
    /// Whether messages of this kind are persisted before fan-out.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        !matches!(self, MessageKind::Typing)
    }
}

/// A protocol frame.
///
/// Sender fields on inbound frames are advisory only: the hub overwrites
/// them with the authenticated connection identity before fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// In-band credential presentation, accepted as the first frame of a
    /// connection that did not authenticate at upgrade time.
    #[serde(rename = "auth")]
    Auth {
        /// Opaque credential, verified by the token verifier.
        token: String,
        /// Peer identity (pairwise chat) or consultation id (topic),
        /// when not already supplied at connection establishment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        /// Client clock, milliseconds since the Unix epoch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// A chat payload routed to the other parties under the same key.
    #[serde(rename = "message", alias = "send_message")]
    Message {
        /// Registry key the message was routed under (set by the server).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        routing_key: Option<String>,
        /// Authenticated sender identity (set by the server).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
        /// Authenticated sender role (set by the server).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_role: Option<String>,
        /// Payload kind; defaults to text.
        #[serde(default)]
        message_type: MessageKind,
        /// Message body, or a caption for media payloads.
        content: String,
        /// Location of an uploaded media object.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
        /// Milliseconds since the Unix epoch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Typing indicator, fanned out without persistence.
    #[serde(rename = "typing")]
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Client keepalive probe.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Server answer to a heartbeat, carrying the server clock.
    #[serde(rename = "heartbeat_response")]
    HeartbeatResponse {
        /// Server time, milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// Join and status notifications generated by the hub.
    #[serde(rename = "system")]
    System {
        /// Event name, e.g. `peer_joined`.
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_role: Option<String>,
        /// Event-specific payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        timestamp: u64,
    },

    /// Handshake acknowledgment sent once after registration.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Registry key this connection was admitted under.
        routing_key: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat_ms: u32,
    },

    /// Error surface for auth, persistence, and protocol failures.
    #[serde(rename = "error")]
    Error {
        /// One of [`codes`].
        code: u16,
        /// Human-readable description.
        message: String,
    },
}

impl Frame {
    /// Get the frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Auth { .. } => FrameKind::Auth,
            Frame::Message { .. } => FrameKind::Message,
            Frame::Typing { .. } => FrameKind::Typing,
            Frame::Heartbeat { .. } => FrameKind::Heartbeat,
            Frame::HeartbeatResponse { .. } => FrameKind::HeartbeatResponse,
            Frame::System { .. } => FrameKind::System,
            Frame::Connected { .. } => FrameKind::Connected,
            Frame::Error { .. } => FrameKind::Error,
        }
    }

    /// Create an auth frame.
    #[must_use]
    pub fn auth(token: impl Into<String>, target: Option<String>) -> Self {
        Frame::Auth {
            token: token.into(),
            target,
            timestamp: None,
        }
    }

    /// Create a bare text message frame, sender fields unset.
    #[must_use]
    pub fn text_message(content: impl Into<String>) -> Self {
        Frame::Message {
            routing_key: None,
            sender_id: None,
            sender_role: None,
            message_type: MessageKind::Text,
            content: content.into(),
            media_url: None,
            timestamp: None,
        }
    }

    /// Create a heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Frame::Heartbeat { timestamp: None }
    }

    /// Create a heartbeat response with the server timestamp.
    #[must_use]
    pub fn heartbeat_response(timestamp: u64) -> Self {
        Frame::HeartbeatResponse { timestamp }
    }

    /// Create a system frame.
    #[must_use]
    pub fn system(event: impl Into<String>, timestamp: u64) -> Self {
        Frame::System {
            event: event.into(),
            sender_id: None,
            sender_role: None,
            data: None,
            timestamp,
        }
    }

    /// Create a connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        routing_key: impl Into<String>,
        version: u8,
        heartbeat_ms: u32,
    ) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            routing_key: routing_key.into(),
            version,
            heartbeat_ms,
        }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::heartbeat().kind(), FrameKind::Heartbeat);
        assert_eq!(Frame::text_message("hi").kind(), FrameKind::Message);
        assert_eq!(
            Frame::error(codes::AUTH_FAILED, "bad token").kind(),
            FrameKind::Error
        );
    }

    #[test]
    fn test_message_tag_roundtrip() {
        let frame = Frame::text_message("hello");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"message""#));

        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn test_send_message_alias() {
        // Legacy clients tag chat payloads as "send_message".
        let json = r#"{"type":"send_message","content":"hello","message_type":"text"}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, Frame::Message { ref content, .. } if content == "hello"));
    }

    #[test]
    fn test_message_type_defaults_to_text() {
        let json = r#"{"type":"message","content":"hi"}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::Message { message_type, .. } => assert_eq!(message_type, MessageKind::Text),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"type":"shrug","content":"?"}"#;
        assert!(serde_json::from_str::<Frame>(json).is_err());
    }

    #[test]
    fn test_typing_not_persistent() {
        assert!(!MessageKind::Typing.is_persistent());
        assert!(MessageKind::Text.is_persistent());
        assert!(MessageKind::Media.is_persistent());
    }
}
