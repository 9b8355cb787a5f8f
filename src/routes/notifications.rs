use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::db::models::{DeliveryStatus, MessageType, QueuedMessage};
use crate::error::AppResult;
use crate::services::notifications::{NotificationService, TaskAssignmentRequest};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/task-assignments", post(enqueue_task_assignment))
        .route("/:id", get(get_notification))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub id: i64,
    pub status: DeliveryStatus,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: i64,
    pub message_type: MessageType,
    pub recipient_id: Option<String>,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub last_error_code: Option<i32>,
    pub last_error_message: Option<String>,
    pub next_attempt_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<QueuedMessage> for NotificationResponse {
    fn from(m: QueuedMessage) -> Self {
        Self {
            id: m.id,
            message_type: m.message_type,
            recipient_id: m.recipient_id,
            status: m.status,
            attempts: m.attempts,
            last_error_code: m.last_error_code,
            last_error_message: m.last_error_message,
            next_attempt_at: m.next_attempt_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a task-assignment notice; delivery happens asynchronously.
async fn enqueue_task_assignment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TaskAssignmentRequest>,
) -> AppResult<(StatusCode, Json<EnqueuedResponse>)> {
    let message = NotificationService::new(state.db.clone())
        .enqueue_task_assignment(request)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedResponse {
            id: message.id,
            status: message.status,
        }),
    ))
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<NotificationResponse>> {
    let message = NotificationService::new(state.db.clone()).find(id).await?;
    Ok(Json(message.into()))
}
