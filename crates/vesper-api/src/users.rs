use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use vesper_types::api::{Claims, UserResponse};

use crate::auth::AppState;
use crate::messages::parse_uuid;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if params.query.len() < 3 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || {
        db.search_users(&params.query, &claims.sub.to_string(), 20)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let users: Vec<UserResponse> = rows
        .into_iter()
        .map(|row| UserResponse {
            id: parse_uuid(&row.id, "user id"),
            username: row.username,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let row = tokio::task::spawn_blocking(move || db.get_user_by_id(&user_id.to_string()))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(UserResponse {
        id: parse_uuid(&row.id, "user id"),
        username: row.username,
        created_at: row.created_at,
    }))
}
