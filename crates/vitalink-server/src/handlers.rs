//! Connection handshake and HTTP surface for the Vitalink server.
//!
//! A credential arrives either as a `token` query parameter (verified
//! before the upgrade completes) or as a first in-band `auth` frame within
//! the handshake window. Either way, a connection only reaches the hub's
//! register event with an authenticated identity and a resolved routing
//! key; a failed handshake closes the transport and is never retried.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use vitalink_core::{
    validate_party, Connection, Hub, HubConfig, HubHandle, Identity, MemoryStore, MessageStore,
    PresenceTracker, RoutingKey, TokenVerifier,
};
use vitalink_protocol::{codec, codes, Frame};

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::{metrics, pump};

/// Shared server state.
pub struct AppState {
    /// Handle to the hub event loop.
    pub hub: HubHandle,
    /// Presence tracker, shared with every reader task and the sweeper.
    pub presence: Arc<PresenceTracker>,
    /// Credential verifier.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Message store, used by the hub and the history endpoint.
    pub store: Arc<dyn MessageStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Build the state and the hub it feeds.
    ///
    /// The hub is returned unstarted so the caller controls its task.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(config: Config) -> Result<(Arc<Self>, Hub)> {
        if config.auth.jwt_secret.is_empty() {
            warn!("JWT secret is empty; set VITALINK_JWT_SECRET outside of development");
        }

        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());
        let hub_config = HubConfig {
            event_capacity: config.hub.event_capacity,
            heartbeat_ms: config.heartbeat.interval_ms.min(u64::from(u32::MAX)) as u32,
            echo_to_sender: config.hub.echo_to_sender,
        };
        let (hub, handle) = Hub::new(Arc::clone(&store), hub_config);

        let presence = Arc::new(config.presence_tracker()?);
        let verifier: Arc<dyn TokenVerifier> =
            Arc::new(JwtVerifier::new(config.auth.jwt_secret.as_bytes()));

        let state = Arc::new(Self {
            hub: handle,
            presence,
            verifier,
            store,
            config,
        });
        Ok((state, hub))
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (state, hub) = AppState::build(config.clone())?;
    tokio::spawn(hub.run());
    let _sweeper = state.presence.spawn_sweeper();

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.chat_path, get(chat_ws_handler))
        .route(&config.transport.consultation_path, get(consultation_ws_handler))
        .route("/health", get(health_handler))
        .route("/presence", get(presence_list_handler))
        .route("/presence/:identity", get(presence_get_handler))
        .route("/history", get(history_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Vitalink server listening on {}", addr);
    info!("Chat endpoint: ws://{}{}", addr, config.transport.chat_path);
    info!(
        "Consultation endpoint: ws://{}{}",
        addr, config.transport.consultation_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Presence snapshot for the rest of the platform.
async fn presence_list_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "online": state.presence.list_online() }))
}

/// Presence query for a single identity.
async fn presence_get_handler(
    Path(identity): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "identity": identity,
        "online": state.presence.is_online(&identity),
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    consultation_id: Option<String>,
    peer_a: Option<String>,
    peer_b: Option<String>,
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_page_size")]
    page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

/// Paged message history for a routing key.
async fn history_handler(
    Query(params): Query<HistoryParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let key = if let Some(topic) = params.consultation_id {
        RoutingKey::topic(topic)
    } else if let (Some(a), Some(b)) = (params.peer_a, params.peer_b) {
        RoutingKey::pairwise(a, b)
    } else {
        return (
            StatusCode::BAD_REQUEST,
            "consultation_id or peer_a and peer_b required",
        )
            .into_response();
    };

    match state
        .store
        .list_history(&key, params.page, params.page_size)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => {
            error!(key = %key, error = %err, "History query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
    target_id: Option<String>,
    consultation_id: Option<String>,
}

/// How the routing key is derived for a connection.
#[derive(Debug, Clone)]
enum RouteMode {
    /// One-to-one chat; the key pairs the caller with `target`.
    Chat { target: Option<String> },
    /// Consultation broadcast; the key is the shared topic.
    Consultation { topic: Option<String> },
}

/// WebSocket upgrade handler for one-to-one chat.
async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mode = RouteMode::Chat {
        target: params.target_id.clone(),
    };
    upgrade_with_auth(ws, state, mode, params.token)
}

/// WebSocket upgrade handler for consultation broadcast.
async fn consultation_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mode = RouteMode::Consultation {
        topic: params.consultation_id.clone(),
    };
    upgrade_with_auth(ws, state, mode, params.token)
}

/// Verify a query-parameter credential before upgrading, or defer to the
/// in-band handshake when none was supplied.
fn upgrade_with_auth(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    mode: RouteMode,
    token: Option<String>,
) -> Response {
    let pre_auth = match token {
        Some(token) => match state.verifier.verify(&token) {
            Ok(identity) => match resolve_key(&mode, &identity, None) {
                Ok(key) => Some((identity, key)),
                Err(reason) => {
                    metrics::record_handshake_failure();
                    return (StatusCode::BAD_REQUEST, reason).into_response();
                }
            },
            Err(err) => {
                metrics::record_handshake_failure();
                warn!(error = %err, "Connection refused");
                return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, mode, pre_auth))
}

/// Derive the routing key from the route mode, the authenticated identity,
/// and an optional in-band target.
fn resolve_key(
    mode: &RouteMode,
    identity: &Identity,
    inband_target: Option<String>,
) -> Result<RoutingKey, &'static str> {
    validate_party(&identity.id)?;

    match mode {
        RouteMode::Chat { target } => {
            let target = inband_target
                .or_else(|| target.clone())
                .ok_or("target_id is required")?;
            validate_party(&target)?;
            Ok(RoutingKey::pairwise(identity.id.clone(), target))
        }
        RouteMode::Consultation { topic } => {
            let topic = inband_target
                .or_else(|| topic.clone())
                .ok_or("consultation_id is required")?;
            validate_party(&topic)?;
            Ok(RoutingKey::topic(topic))
        }
    }
}

/// Drive one accepted WebSocket: finish the handshake, register with the
/// hub, and run the pump pair until the connection winds down.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    mode: RouteMode,
    pre_auth: Option<(Identity, RoutingKey)>,
) {
    let _metrics_guard = metrics::ConnectionMetricsGuard::new();
    let (mut sink, mut stream) = socket.split();

    let (identity, routing_key) = match pre_auth {
        Some(resolved) => resolved,
        None => match await_inband_auth(&mut sink, &mut stream, &state, &mode).await {
            Some(resolved) => resolved,
            None => return,
        },
    };

    debug!(identity = %identity, key = %routing_key, "WebSocket authenticated");

    let (connection, mailbox) = Connection::new(
        identity.clone(),
        routing_key,
        state.config.limits.mailbox_capacity,
    );
    let reader_closed = mailbox.closed.clone();

    state.presence.touch(identity.id.clone());
    state.hub.register(connection.clone()).await;

    let keepalive = Duration::from_millis(state.config.heartbeat.interval_ms);
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);

    let writer = tokio::spawn(pump::writer_task(
        sink,
        mailbox,
        connection.clone(),
        keepalive,
    ));

    pump::reader_task(
        stream,
        reader_closed,
        connection.clone(),
        state.hub.clone(),
        Arc::clone(&state.presence),
        idle_timeout,
    )
    .await;

    // The reader already unregistered; make sure the writer unblocks.
    connection.close();
    let _ = writer.await;

    if let Some(stats) = state.hub.stats().await {
        metrics::set_active_slots(stats.slots);
    }

    debug!(connection = %connection.id(), "WebSocket disconnected");
}

/// Wait for the first in-band `auth` frame and verify it.
///
/// One attempt only: a timeout, an undecodable frame, a non-auth frame, or
/// a rejected credential each send an error frame and give up.
async fn await_inband_auth(
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
    mode: &RouteMode,
) -> Option<(Identity, RoutingKey)> {
    let window = Duration::from_millis(state.config.auth.handshake_timeout_ms);

    let text = match tokio::time::timeout(window, first_text_frame(stream)).await {
        Err(_) => {
            metrics::record_handshake_failure();
            let _ = send_frame(
                sink,
                &Frame::error(codes::HANDSHAKE_TIMEOUT, "authentication window elapsed"),
            )
            .await;
            return None;
        }
        Ok(None) => return None,
        Ok(Some(text)) => text,
    };

    let frame = match codec::decode(&text) {
        Ok(frame) => frame,
        Err(err) => {
            metrics::record_handshake_failure();
            warn!(error = %err, "Undecodable handshake frame");
            let _ = send_frame(sink, &Frame::error(codes::DECODE_FAILED, "malformed auth frame"))
                .await;
            return None;
        }
    };

    let Frame::Auth { token, target, .. } = frame else {
        metrics::record_handshake_failure();
        let _ = send_frame(sink, &Frame::error(codes::AUTH_FAILED, "expected auth frame")).await;
        return None;
    };

    let identity = match state.verifier.verify(&token) {
        Ok(identity) => identity,
        Err(err) => {
            metrics::record_handshake_failure();
            warn!(error = %err, "Handshake rejected");
            let _ = send_frame(sink, &Frame::error(codes::AUTH_FAILED, err.to_string())).await;
            return None;
        }
    };

    match resolve_key(mode, &identity, target) {
        Ok(key) => Some((identity, key)),
        Err(reason) => {
            metrics::record_handshake_failure();
            let _ = send_frame(sink, &Frame::error(codes::AUTH_FAILED, reason)).await;
            None
        }
    }
}

/// Read until the first data frame, skipping keepalive traffic.
async fn first_text_frame(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(data)) => return String::from_utf8(data).ok(),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
    None
}

/// Send a frame to the WebSocket.
async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let text = codec::encode(frame)?;
    metrics::record_message(text.len(), "outbound");
    sink.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitalink_core::Role;

    #[test]
    fn test_resolve_key_pairwise_commutative() {
        let doctor = Identity::new("1", Role::Doctor);
        let patient = Identity::new("2", Role::Patient);

        let from_doctor = resolve_key(
            &RouteMode::Chat {
                target: Some("2".to_string()),
            },
            &doctor,
            None,
        )
        .unwrap();
        let from_patient = resolve_key(
            &RouteMode::Chat {
                target: Some("1".to_string()),
            },
            &patient,
            None,
        )
        .unwrap();

        assert_eq!(from_doctor, from_patient);
        assert_eq!(from_doctor.to_string(), "room_1_2");
    }

    #[test]
    fn test_resolve_key_inband_target_wins() {
        let identity = Identity::new("1", Role::Doctor);
        let key = resolve_key(
            &RouteMode::Chat { target: None },
            &identity,
            Some("9".to_string()),
        )
        .unwrap();
        assert_eq!(key, RoutingKey::pairwise("1", "9"));
    }

    #[test]
    fn test_resolve_key_requires_target() {
        let identity = Identity::new("1", Role::Doctor);
        assert!(resolve_key(&RouteMode::Chat { target: None }, &identity, None).is_err());
        assert!(resolve_key(&RouteMode::Consultation { topic: None }, &identity, None).is_err());
    }

    #[test]
    fn test_resolve_key_topic() {
        let identity = Identity::new("1", Role::Patient);
        let key = resolve_key(
            &RouteMode::Consultation {
                topic: Some("88".to_string()),
            },
            &identity,
            None,
        )
        .unwrap();
        assert_eq!(key.to_string(), "consultation_88");
    }
}
