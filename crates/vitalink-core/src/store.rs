//! Message persistence seam.
//!
//! The hub invokes [`MessageStore::persist`] inline before fan-out, so a
//! message is never delivered that the store did not accept. The platform
//! supplies the real backend; [`MemoryStore`] is the in-process default
//! used by the server binary and by tests.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::envelope::MessageEnvelope;
use crate::routing::RoutingKey;

/// A persisted message identifier.
pub type MessageId = u64;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend rejected or failed the operation.
    #[error("message store failure: {0}")]
    Backend(String),
}

/// A message as returned from history queries.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub routing_key: String,
    pub sender_id: String,
    pub sender_role: String,
    pub message_type: vitalink_protocol::MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub timestamp_ms: u64,
}

impl StoredMessage {
    fn from_envelope(id: MessageId, envelope: &MessageEnvelope) -> Self {
        Self {
            id,
            routing_key: envelope.routing_key.to_string(),
            sender_id: envelope.sender.id.clone(),
            sender_role: envelope.sender.role.as_str().to_string(),
            message_type: envelope.kind,
            content: envelope.content.clone(),
            media_url: envelope.media_url.clone(),
            timestamp_ms: envelope.timestamp_ms,
        }
    }
}

/// One page of history, chronological order.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<StoredMessage>,
    /// Total number of messages under the routing key.
    pub total: u64,
}

/// Collaborator seam: durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, returning its assigned id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails; the hub then aborts
    /// fan-out for this message and surfaces an error frame to the sender.
    async fn persist(&self, envelope: &MessageEnvelope) -> Result<MessageId, StoreError>;

    /// Fetch one page of history for a routing key. `page` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails.
    async fn list_history(
        &self,
        routing_key: &RoutingKey,
        page: u64,
        page_size: u64,
    ) -> Result<HistoryPage, StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    next_id: MessageId,
    by_key: HashMap<String, Vec<StoredMessage>>,
}

/// In-process message store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(&self, envelope: &MessageEnvelope) -> Result<MessageId, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))?;

        inner.next_id += 1;
        let id = inner.next_id;
        let stored = StoredMessage::from_envelope(id, envelope);
        inner
            .by_key
            .entry(stored.routing_key.clone())
            .or_default()
            .push(stored);

        Ok(id)
    }

    async fn list_history(
        &self,
        routing_key: &RoutingKey,
        page: u64,
        page_size: u64,
    ) -> Result<HistoryPage, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))?;

        let key = routing_key.to_string();
        let all = inner.by_key.get(&key).map(Vec::as_slice).unwrap_or_default();
        let total = all.len() as u64;

        let page = page.max(1);
        let start = ((page - 1) * page_size) as usize;
        let messages = all
            .iter()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(HistoryPage { messages, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, Role};
    use vitalink_protocol::MessageKind;

    fn envelope(content: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            Identity::new("2", Role::Patient),
            RoutingKey::pairwise("1", "2"),
            MessageKind::Text,
            content.to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn test_persist_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let first = store.persist(&envelope("one")).await.unwrap();
        let second = store.persist(&envelope("two")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.persist(&envelope(&format!("m{i}"))).await.unwrap();
        }

        let key = RoutingKey::pairwise("1", "2");
        let page1 = store.list_history(&key, 1, 2).await.unwrap();
        assert_eq!(page1.total, 5);
        assert_eq!(page1.messages.len(), 2);
        assert_eq!(page1.messages[0].content, "m0");

        let page3 = store.list_history(&key, 3, 2).await.unwrap();
        assert_eq!(page3.messages.len(), 1);
        assert_eq!(page3.messages[0].content, "m4");

        let past_end = store.list_history(&key, 9, 2).await.unwrap();
        assert!(past_end.messages.is_empty());
        assert_eq!(past_end.total, 5);
    }

    #[tokio::test]
    async fn test_history_unknown_key_is_empty() {
        let store = MemoryStore::new();
        let page = store
            .list_history(&RoutingKey::topic("none"), 1, 10)
            .await
            .unwrap();
        assert!(page.messages.is_empty());
        assert_eq!(page.total, 0);
    }
}
