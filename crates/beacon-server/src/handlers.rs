//! Connection handlers for Beacon server.
//!
//! This module handles the WebSocket connection lifecycle: identity
//! resolution at upgrade time, registration with the presence service,
//! forwarding queued frames to the socket, and cleanup on close.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use beacon_core::{
    ConnectionId, HandshakeParams, Presence, QueryParamResolver, Session, UserId,
};
use beacon_protocol::{
    codec, error_codes, Encoded, Frame, ProtocolError, Version, WireFormat, PROTOCOL_VERSION,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

type WsSink = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// The presence service.
    pub presence: Presence,
    /// Server configuration.
    pub config: Config,
    /// Connection slots taken, counted from upgrade until the socket task ends.
    slots: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let resolver = QueryParamResolver::new(config.identity.query_param.clone());
        Self {
            presence: Presence::with_resolver(Arc::new(resolver)),
            config,
            slots: AtomicUsize::new(0),
        }
    }

    /// Connection slots currently taken.
    #[must_use]
    pub fn slots_in_use(&self) -> usize {
        self.slots.load(Ordering::Acquire)
    }

    /// Take a connection slot unless `limits.max_connections` are in use.
    fn reserve_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let limit = self.config.limits.max_connections;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            state: Arc::clone(self),
        })
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.slots.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP/WebSocket router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/presence", get(api::roster))
        .route("/api/presence/:user_id", get(api::user_presence))
        .route("/api/messages/:recipient", post(api::push_message))
        .with_state(state)
}

/// Serve the app on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// Handshake query parameters carry the identity hint, an optional wire
/// format (`format=json|msgpack`) and an optional protocol version (`v`).
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let format = match params.get("format") {
        Some(name) => match WireFormat::from_name(name) {
            Some(format) => format,
            None => {
                return (StatusCode::BAD_REQUEST, "Unsupported wire format").into_response();
            }
        },
        None => state.config.transport.default_format,
    };

    if let Some(requested) = params.get("v") {
        match Version::parse(requested) {
            Some(version) if version.is_compatible_with(&PROTOCOL_VERSION) => {}
            _ => {
                debug!(requested = %requested, "Incompatible protocol version");
                return (StatusCode::BAD_REQUEST, "Unsupported protocol version").into_response();
            }
        }
    }

    // The slot is held from here until the socket task ends, or released
    // right away if the upgrade never completes.
    let Some(slot) = state.reserve_slot() else {
        warn!("Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            handle_websocket(socket, state, params, format).await;
            drop(slot);
        })
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    params: HandshakeParams,
    format: WireFormat,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (session, mut outbox) = state.presence.connect(ConnectionId::generate(), &params);
    metrics::record_presence(&state.presence.stats());
    let connection_id = session.connection_id.clone();

    debug!(
        connection = %connection_id,
        user = ?session.user_id,
        wire = ?format,
        "WebSocket connected"
    );

    let (mut sender, mut receiver) = socket.split();

    let heartbeat = &state.config.heartbeat;
    let connected = Frame::connected(
        connection_id.as_str(),
        session.user_id.as_ref().map(|u| u.as_str().to_string()),
        PROTOCOL_VERSION.major,
        u32::try_from(heartbeat.interval_ms).unwrap_or(u32::MAX),
    );

    if send_frame(&mut sender, &connected, format).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
    } else {
        run_connection(&mut sender, &mut receiver, &mut outbox, &session, &state, format).await;
    }

    // Cleanup: deregister (if still the owner) and detach from the hub
    if state.presence.disconnect(&session) {
        debug!(connection = %connection_id, user = ?session.user_id, "User went offline");
    }
    metrics::record_presence(&state.presence.stats());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Pump frames in both directions until the connection ends.
async fn run_connection(
    sender: &mut WsSink,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    outbox: &mut beacon_core::Outbox,
    session: &Session,
    state: &AppState,
    format: WireFormat,
) {
    let connection_id = &session.connection_id;
    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = tokio::time::interval(Duration::from_millis(
        state.config.heartbeat.interval_ms.max(1),
    ));
    heartbeat.reset();
    let mut last_seen = Instant::now();

    // Read buffer for partial MessagePack frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Frames queued by presence broadcasts and message pushes
            Some(frame) = outbox.recv() => {
                if let Err(e) = send_frame(sender, &frame, format).await {
                    debug!(connection = %connection_id, error = %e, "Outbound send failed");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        let start = Instant::now();
                        metrics::record_frame(text.len(), "inbound");

                        let result = match codec::decode_json(&text) {
                            Ok(frame) => handle_frame(frame, session, state, sender, format).await,
                            Err(e) => reject_invalid(sender, connection_id, &e, format).await,
                        };
                        if result.is_err() {
                            break;
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        let start = Instant::now();
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        if handle_binary(&mut read_buffer, session, state, sender, format)
                            .await
                            .is_err()
                        {
                            break;
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // axum answers pings on its own
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > timeout {
                    debug!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Decode and handle every complete MessagePack frame in the buffer.
///
/// A frame declaring more than `limits.max_message_size` bytes ends the
/// connection, even when it arrives split across several small messages.
async fn handle_binary(
    read_buffer: &mut BytesMut,
    session: &Session,
    state: &AppState,
    sender: &mut WsSink,
    format: WireFormat,
) -> Result<()> {
    let max_size = state.config.limits.max_message_size;
    loop {
        match codec::decode_from_limited(read_buffer, max_size) {
            Ok(Some(frame)) => handle_frame(frame, session, state, sender, format).await?,
            Ok(None) => return Ok(()),
            Err(e @ ProtocolError::FrameTooLarge(_)) => {
                read_buffer.clear();
                metrics::record_error("frame_too_large");
                reject_invalid(sender, &session.connection_id, &e, format).await?;
                return Err(e.into());
            }
            Err(e) => {
                // The stream cannot be resynchronized after a bad frame.
                read_buffer.clear();
                return reject_invalid(sender, &session.connection_id, &e, format).await;
            }
        }
    }
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    session: &Session,
    state: &AppState,
    sender: &mut WsSink,
    format: WireFormat,
) -> Result<()> {
    let connection_id = &session.connection_id;
    trace!(connection = %connection_id, frame_type = ?frame.frame_type(), "Frame received");

    match frame {
        Frame::Send { id, to, payload } => {
            let Some(from) = session.user_id.as_ref() else {
                let response = Frame::error(
                    id.unwrap_or(0),
                    error_codes::UNAUTHENTICATED,
                    "Anonymous connections cannot send messages",
                );
                return send_frame(sender, &response, format).await;
            };

            let Some(recipient) = UserId::parse(&to) else {
                let response = Frame::error(
                    id.unwrap_or(0),
                    error_codes::INVALID_RECIPIENT,
                    "Invalid recipient",
                );
                return send_frame(sender, &response, format).await;
            };

            let delivery = state.presence.deliver(Some(from), &recipient, payload);
            metrics::record_delivery(&delivery);
            debug!(
                connection = %connection_id,
                recipient = %recipient,
                live = delivery.is_live(),
                "Message routed"
            );

            // The sender is acknowledged the same way whether or not the
            // recipient was online.
            if let Some(req_id) = id {
                send_frame(sender, &Frame::ack(req_id), format).await?;
            }
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(timestamp), format).await?;
        }

        Frame::Pong { .. } => {}

        other => {
            warn!(
                connection = %connection_id,
                frame_type = ?other.frame_type(),
                "Unexpected frame type"
            );
            let response = Frame::error(0, error_codes::UNEXPECTED_FRAME, "Unexpected frame type");
            send_frame(sender, &response, format).await?;
        }
    }

    Ok(())
}

/// Answer undecodable input with an error frame.
async fn reject_invalid(
    sender: &mut WsSink,
    connection_id: &ConnectionId,
    error: &ProtocolError,
    format: WireFormat,
) -> Result<()> {
    warn!(connection = %connection_id, error = %error, "Invalid frame");
    metrics::record_error("invalid_frame");
    let response = Frame::error(0, error_codes::INVALID_FRAME, error.to_string());
    send_frame(sender, &response, format).await
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut WsSink, frame: &Frame, format: WireFormat) -> Result<()> {
    let message = match format.encode(frame)? {
        Encoded::Text(text) => {
            metrics::record_frame(text.len(), "outbound");
            Message::Text(text)
        }
        Encoded::Binary(data) => {
            metrics::record_frame(data.len(), "outbound");
            Message::Binary(data.to_vec())
        }
    };
    sender.send(message).await?;
    Ok(())
}
