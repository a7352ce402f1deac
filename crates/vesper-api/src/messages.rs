use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use vesper_db::models::MessageRow;
use vesper_types::api::{
    AutoDeleteRequest, ChatMessagesResponse, Claims, MessageResponse, SendMessageRequest,
    SendMessageResponse,
};

use crate::auth::AppState;
use crate::status_for;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Only messages created strictly after this unix-millisecond timestamp.
    pub since: Option<i64>,
    pub limit: Option<u32>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let ciphertext = B64.decode(&req.ciphertext).map_err(|_| StatusCode::BAD_REQUEST)?;
    let iv = B64.decode(&req.iv).map_err(|_| StatusCode::BAD_REQUEST)?;
    if req.message_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Run blocking DB work off the async runtime
    let svc = state.messages.clone();
    let row = tokio::task::spawn_blocking(move || {
        svc.send(claims.sub, req.recipient_id, req.chat_id, ciphertext, iv, &req.message_id)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(status_for)?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            id: parse_uuid(&row.id, "message row id"),
            message_id: row.message_id,
            chat_id: parse_uuid(&row.chat_id, "chat_id"),
            created_at: row.created_at,
        }),
    ))
}

pub async fn get_chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.messages.clone();
    let limit = query.limit.map(|l| l.min(200));

    let page = tokio::task::spawn_blocking(move || {
        svc.list_for_chat(chat_id, claims.sub, query.since, limit)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(status_for)?;

    Ok(Json(ChatMessagesResponse {
        messages: page.messages.into_iter().map(to_message_response).collect(),
        newly_read: page.newly_read,
    }))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.messages.clone();
    tokio::task::spawn_blocking(move || svc.mark_delivered(&message_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.messages.clone();
    tokio::task::spawn_blocking(move || svc.mark_read(&message_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Local delete: hides the message for whichever side the caller occupies.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.messages.clone();
    tokio::task::spawn_blocking(move || svc.delete_local(&message_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remote delete: sender-only logical purge for both sides.
pub async fn delete_message_remote(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.messages.clone();
    tokio::task::spawn_blocking(move || {
        svc.delete_remote(&message_id, vesper_core::Actor::User(claims.sub))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_auto_delete(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AutoDeleteRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.messages.clone();
    tokio::task::spawn_blocking(move || svc.set_auto_delete(&message_id, claims.sub, req.seconds))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn to_message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message row id"),
        message_id: row.message_id,
        chat_id: parse_uuid(&row.chat_id, "chat_id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        recipient_id: parse_uuid(&row.recipient_id, "recipient_id"),
        ciphertext: B64.encode(&row.ciphertext),
        iv: B64.encode(&row.iv),
        delivery_state: row.delivery_state,
        ttl_seconds: row.ttl_seconds,
        scheduled_deletion_at: row.scheduled_deletion_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}
