//! HTTP endpoints for page loads and for the messaging service.
//!
//! The messaging service owns persistence. After storing a message it asks
//! Beacon to push a live copy; when the recipient is offline nothing else
//! happens and the message is picked up from history later.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_core::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Current roster.
#[derive(Debug, Serialize, Deserialize)]
pub struct RosterResponse {
    pub users: Vec<String>,
}

/// Presence of a single user.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserPresenceResponse {
    pub user_id: String,
    pub online: bool,
}

/// Live push request from the messaging service.
#[derive(Debug, Serialize, Deserialize)]
pub struct PushRequest {
    /// Sender user id.
    #[serde(default)]
    pub from: Option<String>,
    /// Opaque message body forwarded to the recipient as-is.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outcome of a push request.
#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    /// `"live"` or `"deferred"`.
    pub delivered: String,
}

/// `GET /api/presence`
pub async fn roster(State(state): State<Arc<AppState>>) -> Json<RosterResponse> {
    Json(RosterResponse {
        users: state.presence.roster().to_strings(),
    })
}

/// `GET /api/presence/:user_id`
pub async fn user_presence(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<UserPresenceResponse> {
    match UserId::parse(&user_id) {
        Some(user) => Json(UserPresenceResponse {
            online: state.presence.is_online(&user),
            user_id: user.into_inner(),
        }),
        None => Json(UserPresenceResponse {
            user_id,
            online: false,
        }),
    }
}

/// `POST /api/messages/:recipient`
pub async fn push_message(
    State(state): State<Arc<AppState>>,
    Path(recipient): Path<String>,
    Json(request): Json<PushRequest>,
) -> Response {
    let Some(recipient) = UserId::parse(&recipient) else {
        return (StatusCode::BAD_REQUEST, "Invalid recipient").into_response();
    };
    let from = request.from.as_deref().and_then(UserId::parse);

    let delivery = state
        .presence
        .deliver(from.as_ref(), &recipient, request.payload);
    metrics::record_delivery(&delivery);
    debug!(recipient = %recipient, live = delivery.is_live(), "Push requested over HTTP");

    let delivered = if delivery.is_live() { "live" } else { "deferred" };
    (
        StatusCode::ACCEPTED,
        Json(PushResponse {
            delivered: delivered.to_string(),
        }),
    )
        .into_response()
}
