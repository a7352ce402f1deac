use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use vesper_db::models::ChatRow;
use vesper_types::api::{AutoDeleteRequest, ChatResponse, Claims, CreateChatRequest};

use crate::auth::AppState;
use crate::messages::parse_uuid;
use crate::status_for;

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // The caller is always part of the set it creates
    if !req.participants.contains(&claims.sub) {
        return Err(StatusCode::FORBIDDEN);
    }

    let svc = state.chats.clone();
    let chat = tokio::task::spawn_blocking(move || svc.find_or_create(&req.participants))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;

    Ok((StatusCode::CREATED, Json(to_chat_response(chat))))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.chats.clone();
    let chats = tokio::task::spawn_blocking(move || svc.list_for_user(claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;

    Ok(Json(chats.into_iter().map(to_chat_response).collect::<Vec<_>>()))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.chats.clone();
    let chat = tokio::task::spawn_blocking(move || svc.get(chat_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;

    Ok(Json(to_chat_response(chat)))
}

/// Hide every message the caller sent in this chat (their side only).
pub async fn delete_chat_local(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.chats.clone();
    tokio::task::spawn_blocking(move || svc.delete_local_for_user(chat_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cascade: purge all messages, then remove the chat, for every participant.
pub async fn delete_chat_full(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.chats.clone();
    tokio::task::spawn_blocking(move || {
        svc.delete_full(chat_id, vesper_core::Actor::User(claims.sub))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_auto_delete(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AutoDeleteRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let svc = state.chats.clone();
    tokio::task::spawn_blocking(move || {
        svc.set_auto_delete_policy(chat_id, claims.sub, req.seconds)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

fn to_chat_response(chat: ChatRow) -> ChatResponse {
    ChatResponse {
        id: parse_uuid(&chat.id, "chat id"),
        participants: chat
            .participant_ids()
            .iter()
            .map(|p| parse_uuid(p, "participant id"))
            .collect(),
        auto_delete_seconds: chat.auto_delete_seconds,
        last_message_id: chat.last_message_id.as_deref().map(|id| parse_uuid(id, "last_message_id")),
        last_activity_at: chat.last_activity_at,
        created_at: chat.created_at,
        updated_at: chat.updated_at,
    }
}
