//! The per-connection pump pair.
//!
//! Every accepted connection runs exactly two tasks for its whole lifetime:
//! a reader that decodes inbound frames and forwards them to the hub, and a
//! writer that drains the mailbox onto the wire and emits keepalive probes.
//! Both observe the connection's close signal, so any termination cause
//! (transport error, idle timeout, hub eviction, write failure) winds down
//! the pair through the same path, and unregistration runs exactly once
//! from the reader's teardown.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};
use vitalink_core::{unix_millis, ConnectionHandle, HubHandle, MailboxReceiver, PresenceTracker};
use vitalink_protocol::{codec, Frame};

use crate::metrics;

/// Inbound half: decode frames, touch presence, forward to the hub.
///
/// Terminates on transport error, stream end, idle timeout, or the
/// connection's close signal. Teardown evicts the presence record and
/// emits the unregister event; both are idempotent.
pub async fn reader_task(
    mut stream: SplitStream<WebSocket>,
    mut closed: watch::Receiver<bool>,
    connection: ConnectionHandle,
    hub: HubHandle,
    presence: Arc<PresenceTracker>,
    idle_timeout: Duration,
) {
    loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    debug!(connection = %connection.id(), "Reader observed close signal");
                    break;
                }
            }

            next = timeout(idle_timeout, stream.next()) => {
                match next {
                    Err(_) => {
                        warn!(connection = %connection.id(), "Idle timeout, dropping connection");
                        break;
                    }
                    Ok(None) => {
                        debug!(connection = %connection.id(), "WebSocket stream ended");
                        break;
                    }
                    Ok(Some(Err(error))) => {
                        warn!(connection = %connection.id(), error = %error, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if !handle_text(&text, &connection, &hub, &presence).await {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        match String::from_utf8(data) {
                            Ok(text) => {
                                if !handle_text(&text, &connection, &hub, &presence).await {
                                    break;
                                }
                            }
                            Err(_) => {
                                warn!(connection = %connection.id(), "Dropping non-UTF-8 binary frame");
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {
                        // Keepalive traffic; it reset the idle window above.
                    }
                    Ok(Some(Ok(Message::Close(_)))) => {
                        debug!(connection = %connection.id(), "Received close frame");
                        break;
                    }
                }
            }
        }
    }

    presence.remove(&connection.identity().id);
    connection.close();
    hub.unregister(connection.id()).await;
    debug!(connection = %connection.id(), "Reader stopped");
}

/// Process one decoded inbound frame. Returns `false` to stop the reader.
async fn handle_text(
    text: &str,
    connection: &ConnectionHandle,
    hub: &HubHandle,
    presence: &PresenceTracker,
) -> bool {
    let started = Instant::now();

    match codec::decode(text) {
        Ok(frame) => {
            presence.touch(connection.identity().id.clone());
            metrics::record_message(text.len(), "inbound");

            match frame {
                Frame::Heartbeat { .. } => {
                    // Answered here, not routed: the hub never sees probes.
                    let response = Frame::heartbeat_response(unix_millis());
                    if !connection.send(&response) {
                        warn!(
                            connection = %connection.id(),
                            "Mailbox rejected heartbeat response, dropping connection"
                        );
                        return false;
                    }
                }
                other => hub.inbound(connection.id(), other).await,
            }

            metrics::record_latency(started.elapsed().as_secs_f64());
        }
        Err(error) => {
            // Contained: the frame is dropped, the connection stays open.
            warn!(connection = %connection.id(), error = %error, "Dropping undecodable frame");
            metrics::record_error("decode");
        }
    }

    true
}

/// Outbound half: drain the mailbox onto the wire, probe on idle.
///
/// Terminates on mailbox closure, the close signal, or a write error; in
/// every case it trips the close signal so the reader winds down too, then
/// sends a best-effort close frame.
pub async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: MailboxReceiver,
    connection: ConnectionHandle,
    keepalive: Duration,
) {
    let mut ticker = interval(keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = mailbox.closed.changed() => {
                if changed.is_err() || *mailbox.closed.borrow() {
                    debug!(connection = %connection.id(), "Writer observed close signal");
                    break;
                }
            }

            maybe_wire = mailbox.frames.recv() => {
                match maybe_wire {
                    Some(wire) => {
                        metrics::record_message(wire.len(), "outbound");
                        if sink.send(Message::Text(wire.to_string())).await.is_err() {
                            warn!(connection = %connection.id(), "Write failed");
                            metrics::record_error("websocket");
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %connection.id(), "Mailbox closed");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!(connection = %connection.id(), "Keepalive write failed");
                    break;
                }
            }
        }
    }

    connection.close();
    let _ = sink.send(Message::Close(None)).await;
    debug!(connection = %connection.id(), "Writer stopped");
}
