//! One accepted connection: identity, routing key, and outbound mailbox.
//!
//! The mailbox is a bounded FIFO of already-encoded frames, drained by the
//! connection's writer task. Enqueueing never blocks: a full mailbox marks
//! the connection dead and the hub removes it (drop the slow reader, never
//! the message stream for everyone else).
//!
//! Closing is explicit and idempotent: both pump tasks observe a single
//! close signal owned by the connection, so "connection closed" has one
//! authoritative trigger.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::trace;
use vitalink_protocol::{codec, Frame};

use crate::identity::Identity;
use crate::routing::RoutingKey;

/// An encoded frame, shared across fan-out targets without re-encoding.
pub type WireFrame = Arc<str>;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Receiver half of a connection, owned by its writer task.
pub struct MailboxReceiver {
    /// Encoded frames awaiting delivery.
    pub frames: mpsc::Receiver<WireFrame>,
    /// Becomes `true` when the connection is closed.
    pub closed: watch::Receiver<bool>,
}

/// Constructor namespace for connections.
pub struct Connection;

impl Connection {
    /// Create a connection with a bounded mailbox.
    ///
    /// Returns the handle (held by the hub and the reader task) and the
    /// mailbox receiver (held by the writer task).
    #[must_use]
    pub fn new(
        identity: Identity,
        routing_key: RoutingKey,
        mailbox_capacity: usize,
    ) -> (ConnectionHandle, MailboxReceiver) {
        let (frames_tx, frames_rx) = mpsc::channel(mailbox_capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = ConnectionHandle {
            id: ConnectionId::next(),
            identity,
            routing_key,
            outbox: frames_tx,
            closed: Arc::new(closed_tx),
        };
        let mailbox = MailboxReceiver {
            frames: frames_rx,
            closed: closed_rx,
        };

        (handle, mailbox)
    }
}

/// Handle to a live connection.
///
/// Cloneable; the hub keeps one in the registry and the reader task keeps
/// one for direct replies (heartbeat responses).
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    routing_key: RoutingKey,
    outbox: mpsc::Sender<WireFrame>,
    closed: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Get the connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get the routing key this connection registered under.
    #[must_use]
    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// Enqueue an already-encoded frame without blocking.
    ///
    /// Returns `false` if the mailbox is full or closed; the caller must
    /// then treat this connection as dead.
    #[must_use]
    pub fn send_wire(&self, wire: WireFrame) -> bool {
        match self.outbox.try_send(wire) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(connection = %self.id, "Mailbox full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Encode a frame and enqueue it without blocking.
    ///
    /// Returns `false` if encoding fails or the mailbox rejects the frame.
    #[must_use]
    pub fn send(&self, frame: &Frame) -> bool {
        match codec::encode(frame) {
            Ok(text) => self.send_wire(WireFrame::from(text)),
            Err(_) => false,
        }
    }

    /// Trip the close signal. Idempotent; both pump tasks observe it.
    pub fn close(&self) {
        // send_replace avoids an error on an already-dropped receiver
        let _ = self.closed.send_replace(true);
    }

    /// Whether the close signal has been tripped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("routing_key", &self.routing_key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    fn handle(capacity: usize) -> (ConnectionHandle, MailboxReceiver) {
        Connection::new(
            Identity::new("1", Role::Doctor),
            RoutingKey::pairwise("1", "2"),
            capacity,
        )
    }

    #[test]
    fn test_connection_ids_unique() {
        let (a, _rx_a) = handle(4);
        let (b, _rx_b) = handle(4);
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_send_and_drain() {
        let (handle, mut mailbox) = handle(4);
        assert!(handle.send(&Frame::heartbeat_response(7)));

        let wire = mailbox.frames.recv().await.unwrap();
        let frame = codec::decode(&wire).unwrap();
        assert_eq!(frame, Frame::heartbeat_response(7));
    }

    #[tokio::test]
    async fn test_full_mailbox_rejects() {
        let (handle, _mailbox) = handle(1);
        assert!(handle.send(&Frame::heartbeat()));
        // Capacity exhausted and nothing drains; the next send must fail.
        assert!(!handle.send(&Frame::heartbeat()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_observed() {
        let (handle, mut mailbox) = handle(4);
        assert!(!handle.is_closed());

        handle.close();
        handle.close();
        assert!(handle.is_closed());

        mailbox.closed.changed().await.unwrap();
        assert!(*mailbox.closed.borrow());
    }
}
