//! The hub: a serialized event loop owning the connection registry.
//!
//! Every pump task talks to the hub through one bounded event queue, so
//! register/unregister/inbound events are processed strictly in arrival
//! order and the registry needs no lock. Persistence runs inline before
//! fan-out; the loop stalls for the store call, trading throughput for a
//! total order of persist-then-broadcast.
//!
//! Failure containment: a bad frame is dropped with a warning, a full
//! mailbox kills only its own connection, and a store failure aborts
//! fan-out for that one message. Nothing a single connection does can stop
//! the loop.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use vitalink_protocol::{codec, codes, Frame, MessageKind, PROTOCOL_VERSION};

use crate::connection::{ConnectionHandle, ConnectionId, WireFrame};
use crate::envelope::{unix_millis, MessageEnvelope};
use crate::identity::IdentityId;
use crate::routing::RoutingKey;
use crate::store::MessageStore;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the inbound event queue.
    pub event_capacity: usize,
    /// Heartbeat interval advertised to clients in the `connected` frame.
    pub heartbeat_ms: u32,
    /// Whether a sender receives its own broadcast back. Off by default
    /// (one-to-one chat semantics); topic deployments may enable it.
    pub echo_to_sender: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            heartbeat_ms: 30_000,
            echo_to_sender: false,
        }
    }
}

/// Events consumed by the hub, in strict arrival order.
#[derive(Debug)]
pub enum HubEvent {
    /// Admit an authenticated connection into the registry.
    Register(ConnectionHandle),
    /// Remove a connection; idempotent.
    Unregister(ConnectionId),
    /// A decoded frame from a registered connection.
    Inbound(ConnectionId, Frame),
    /// Registry snapshot for observability and tests.
    Stats(oneshot::Sender<HubStats>),
}

/// Registry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of occupied routing-key slots.
    pub slots: usize,
    /// Number of live connections.
    pub connections: usize,
}

/// Cloneable sender half used by pump tasks and the server.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Submit a register event.
    pub async fn register(&self, connection: ConnectionHandle) {
        if self.events.send(HubEvent::Register(connection)).await.is_err() {
            warn!("Hub event loop is gone; register dropped");
        }
    }

    /// Submit an unregister event.
    pub async fn unregister(&self, connection: ConnectionId) {
        if self.events.send(HubEvent::Unregister(connection)).await.is_err() {
            warn!("Hub event loop is gone; unregister dropped");
        }
    }

    /// Submit an inbound frame.
    pub async fn inbound(&self, connection: ConnectionId, frame: Frame) {
        if self.events.send(HubEvent::Inbound(connection, frame)).await.is_err() {
            warn!("Hub event loop is gone; inbound frame dropped");
        }
    }

    /// Fetch a registry snapshot. Also acts as a barrier: the reply proves
    /// all previously submitted events were processed.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        if self.events.send(HubEvent::Stats(reply)).await.is_err() {
            return None;
        }
        rx.await.ok()
    }
}

/// The hub event loop. Owns the registry exclusively; runs on one task.
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    /// routing key -> identity -> connection. A key never maps to an
    /// empty slot; empty slots are deleted immediately.
    registry: HashMap<RoutingKey, HashMap<IdentityId, ConnectionHandle>>,
    /// Reverse index for unregister and inbound lookups.
    index: HashMap<ConnectionId, (RoutingKey, IdentityId)>,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and its handle.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, config: HubConfig) -> (Self, HubHandle) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Self {
            events: events_rx,
            registry: HashMap::new(),
            index: HashMap::new(),
            store,
            config,
        };
        (hub, HubHandle { events: events_tx })
    }

    /// Run the event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!("Hub event loop started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register(connection) => self.register(connection),
                HubEvent::Unregister(id) => self.unregister(id),
                HubEvent::Inbound(id, frame) => self.inbound(id, frame).await,
                HubEvent::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
            }
        }
        info!("Hub event loop stopped");
    }

    fn stats(&self) -> HubStats {
        HubStats {
            slots: self.registry.len(),
            connections: self.index.len(),
        }
    }

    fn register(&mut self, connection: ConnectionHandle) {
        let id = connection.id();
        let key = connection.routing_key().clone();
        let identity = connection.identity().clone();

        let connected = Frame::connected(
            id.to_string(),
            key.to_string(),
            PROTOCOL_VERSION.major,
            self.config.heartbeat_ms,
        );
        if !connection.send(&connected) {
            warn!(connection = %id, "Connection unwritable at registration, dropped");
            connection.close();
            return;
        }

        let slot = self.registry.entry(key.clone()).or_default();

        // One live connection per identity under a key: a newer session
        // replaces and closes the stale one.
        if let Some(prev) = slot.remove(&identity.id) {
            info!(
                connection = %prev.id(),
                replacement = %id,
                identity = %identity.id,
                key = %key,
                "Replaced stale session"
            );
            self.index.remove(&prev.id());
            prev.close();
        }

        let peers: Vec<ConnectionHandle> = slot.values().cloned().collect();
        slot.insert(identity.id.clone(), connection);
        let participants = slot.len();
        self.index.insert(id, (key.clone(), identity.id.clone()));

        debug!(
            connection = %id,
            identity = %identity.id,
            key = %key,
            participants,
            "Registered"
        );

        if peers.is_empty() {
            return;
        }

        let joined = Frame::System {
            event: "peer_joined".to_string(),
            sender_id: Some(identity.id),
            sender_role: Some(identity.role.as_str().to_string()),
            data: None,
            timestamp: unix_millis(),
        };
        match codec::encode(&joined) {
            Ok(text) => self.deliver(peers, &WireFrame::from(text)),
            Err(error) => warn!(error = %error, "Failed to encode join notification"),
        }
    }

    fn unregister(&mut self, id: ConnectionId) {
        let Some((key, identity_id)) = self.index.remove(&id) else {
            trace!(connection = %id, "Unregister for already-removed connection");
            return;
        };

        let mut now_empty = false;
        if let Some(slot) = self.registry.get_mut(&key) {
            if let Some(connection) = slot.remove(&identity_id) {
                connection.close();
            }
            now_empty = slot.is_empty();
        }
        if now_empty {
            self.registry.remove(&key);
        }

        debug!(connection = %id, key = %key, slot_deleted = now_empty, "Unregistered");
    }

    async fn inbound(&mut self, id: ConnectionId, frame: Frame) {
        let Some((key, identity_id)) = self.index.get(&id).cloned() else {
            trace!(connection = %id, "Frame from unregistered connection dropped");
            return;
        };
        let Some(sender) = self
            .registry
            .get(&key)
            .and_then(|slot| slot.get(&identity_id))
            .cloned()
        else {
            return;
        };

        match frame {
            Frame::Message {
                message_type,
                content,
                media_url,
                ..
            } => {
                self.route_message(sender, key, message_type, content, media_url)
                    .await;
            }
            Frame::Typing { .. } => self.route_typing(&sender, &key),
            Frame::Heartbeat { .. } => {
                // Answered at the transport layer; only the presence touch
                // mattered.
                trace!(connection = %id, "Heartbeat");
            }
            Frame::Auth { .. } => {
                debug!(connection = %id, "Auth frame after registration");
                if !sender.send(&Frame::error(codes::UNSUPPORTED_FRAME, "already authenticated")) {
                    self.unregister(id);
                }
            }
            other => {
                warn!(connection = %id, kind = ?other.kind(), "Unexpected frame kind dropped");
            }
        }
    }

    /// Persist a message, then fan it out to the other parties under the
    /// sender's routing key. Store failure aborts fan-out and surfaces an
    /// error frame to the sender only.
    async fn route_message(
        &mut self,
        sender: ConnectionHandle,
        key: RoutingKey,
        kind: MessageKind,
        content: String,
        media_url: Option<String>,
    ) {
        let envelope = MessageEnvelope::new(
            sender.identity().clone(),
            key.clone(),
            kind,
            content,
            media_url,
        );

        if kind.is_persistent() {
            if let Err(error) = self.store.persist(&envelope).await {
                warn!(
                    connection = %sender.id(),
                    key = %key,
                    error = %error,
                    "Persist failed, fan-out aborted"
                );
                if !sender.send(&Frame::error(codes::PERSIST_FAILED, error.to_string())) {
                    self.unregister(sender.id());
                }
                return;
            }
        }

        let wire = match codec::encode(&envelope.to_frame()) {
            Ok(text) => WireFrame::from(text),
            Err(error) => {
                warn!(error = %error, "Failed to encode outbound message");
                return;
            }
        };

        let exclude = if self.config.echo_to_sender {
            None
        } else {
            Some(sender.id())
        };
        let targets = self.slot_snapshot(&key, exclude);
        trace!(key = %key, recipients = targets.len(), "Fanning out message");
        self.deliver(targets, &wire);
    }

    /// Typing indicators fan out without persistence and never echo.
    fn route_typing(&mut self, sender: &ConnectionHandle, key: &RoutingKey) {
        let typing = Frame::Typing {
            sender_id: Some(sender.identity().id.clone()),
            sender_role: Some(sender.identity().role.as_str().to_string()),
            timestamp: Some(unix_millis()),
        };
        let wire = match codec::encode(&typing) {
            Ok(text) => WireFrame::from(text),
            Err(error) => {
                warn!(error = %error, "Failed to encode typing frame");
                return;
            }
        };

        let targets = self.slot_snapshot(key, Some(sender.id()));
        self.deliver(targets, &wire);
    }

    /// Best-effort snapshot of a slot's connections. A missing slot yields
    /// an empty snapshot: messages to a key with no peers are a no-op.
    fn slot_snapshot(
        &self,
        key: &RoutingKey,
        exclude: Option<ConnectionId>,
    ) -> Vec<ConnectionHandle> {
        self.registry
            .get(key)
            .map(|slot| {
                slot.values()
                    .filter(|c| exclude != Some(c.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver one encoded frame to each target independently. A full or
    /// closed mailbox kills that target and never blocks the rest.
    fn deliver(&mut self, targets: Vec<ConnectionHandle>, wire: &WireFrame) {
        for target in targets {
            if !target.send_wire(wire.clone()) {
                warn!(
                    connection = %target.id(),
                    "Mailbox overflow, dropping slow connection"
                );
                self.unregister(target.id());
            }
        }
    }
}
