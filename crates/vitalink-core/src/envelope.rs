//! Message envelopes built by the hub.
//!
//! An envelope couples a payload with the *authenticated* sender identity.
//! Whatever sender fields a client writes into its frames are discarded;
//! the identity bound to the connection at handshake time is authoritative.

use std::time::{SystemTime, UNIX_EPOCH};

use vitalink_protocol::{Frame, MessageKind};

use crate::identity::Identity;
use crate::routing::RoutingKey;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A routed message, stamped with the authenticated sender and server clock.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    /// Authenticated sender.
    pub sender: Identity,
    /// Registry key the message is routed under.
    pub routing_key: RoutingKey,
    /// Payload kind.
    pub kind: MessageKind,
    /// Message body, or a caption for media payloads.
    pub content: String,
    /// Location of an uploaded media object.
    pub media_url: Option<String>,
    /// Server receive time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl MessageEnvelope {
    /// Build an envelope from an inbound payload, stamped with the server
    /// clock.
    #[must_use]
    pub fn new(
        sender: Identity,
        routing_key: RoutingKey,
        kind: MessageKind,
        content: String,
        media_url: Option<String>,
    ) -> Self {
        Self {
            sender,
            routing_key,
            kind,
            content,
            media_url,
            timestamp_ms: unix_millis(),
        }
    }

    /// Render the envelope as the outbound frame delivered to targets,
    /// with the authoritative sender fields filled in.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::Message {
            routing_key: Some(self.routing_key.to_string()),
            sender_id: Some(self.sender.id.clone()),
            sender_role: Some(self.sender.role.as_str().to_string()),
            message_type: self.kind,
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            timestamp: Some(self.timestamp_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn test_to_frame_carries_authenticated_sender() {
        let envelope = MessageEnvelope::new(
            Identity::new("2", Role::Patient),
            RoutingKey::pairwise("1", "2"),
            MessageKind::Text,
            "hello".to_string(),
            None,
        );

        match envelope.to_frame() {
            Frame::Message {
                routing_key,
                sender_id,
                sender_role,
                content,
                ..
            } => {
                assert_eq!(routing_key.as_deref(), Some("room_1_2"));
                assert_eq!(sender_id.as_deref(), Some("2"));
                assert_eq!(sender_role.as_deref(), Some("patient"));
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
