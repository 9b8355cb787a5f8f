use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::error::{AppError, AppResult};
use crate::routes::notifications::EnqueuedResponse;
use crate::services::drafts::TaskDraft;
use crate::services::notifications::NotificationService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:admin_id", get(get_draft).put(update_draft))
        .route("/:admin_id/submit", post(submit_draft))
}

async fn get_draft(
    State(state): State<Arc<AppState>>,
    Path(admin_id): Path<String>,
) -> AppResult<Json<TaskDraft>> {
    state
        .drafts
        .get(&admin_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("draft for {}", admin_id)))
}

/// Merge the supplied fields into the admin's draft and restart its TTL.
async fn update_draft(
    State(state): State<Arc<AppState>>,
    Path(admin_id): Path<String>,
    Json(patch): Json<TaskDraft>,
) -> AppResult<Json<TaskDraft>> {
    let mut draft = state.drafts.get(&admin_id).await.unwrap_or_default();
    draft.merge(patch);
    state.drafts.put(&admin_id, draft.clone()).await;
    Ok(Json(draft))
}

/// Enqueue the draft as a task-assignment notice. The draft is taken out of
/// the store for the duration of the submit, so a concurrent submit sees 404
/// instead of queueing a duplicate. It is put back if queueing fails.
async fn submit_draft(
    State(state): State<Arc<AppState>>,
    Path(admin_id): Path<String>,
) -> AppResult<(StatusCode, Json<EnqueuedResponse>)> {
    let draft = state
        .drafts
        .take(&admin_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("draft for {}", admin_id)))?;

    let enqueued = match draft.clone().into_request() {
        Ok(request) => {
            NotificationService::new(state.db.clone())
                .enqueue_task_assignment(request)
                .await
        }
        Err(e) => Err(e),
    };
    let message = match enqueued {
        Ok(message) => message,
        Err(e) => {
            state.drafts.put(&admin_id, draft).await;
            return Err(e);
        }
    };

    tracing::info!(admin_id = %admin_id, message_id = message.id, "drafts.submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedResponse {
            id: message.id,
            status: message.status,
        }),
    ))
}
