use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::models::{BroadcastStatus, CreateBroadcast};
use crate::error::AppResult;
use crate::services::broadcasts::{BroadcastProgress, BroadcastService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_broadcast))
        .route("/:id", get(get_progress))
        .route("/:id/confirm", post(confirm_broadcast))
}

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub broadcast_id: i64,
    /// Audience estimate at draft time; re-snapshotted on confirm.
    pub total_count: i64,
    pub status: BroadcastStatus,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub id: i64,
    pub status: BroadcastStatus,
    pub total_count: i64,
}

async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBroadcast>,
) -> AppResult<(StatusCode, Json<DraftResponse>)> {
    let draft = BroadcastService::new(state.db.clone()).create(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(DraftResponse {
            broadcast_id: draft.id,
            total_count: draft.total_count,
            status: draft.status,
        }),
    ))
}

/// Queue a draft for delivery. Repeating the call returns the current state.
async fn confirm_broadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ConfirmResponse>> {
    let broadcast = BroadcastService::new(state.db.clone()).confirm(id).await?;

    Ok(Json(ConfirmResponse {
        id: broadcast.id,
        status: broadcast.status,
        total_count: broadcast.total_count,
    }))
}

async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<BroadcastProgress>> {
    Ok(Json(BroadcastService::new(state.db.clone()).progress(id).await?))
}
