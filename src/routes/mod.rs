use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub mod broadcasts;
pub mod drafts;
pub mod health;
pub mod notifications;

/// Collaborator API, mounted under `/api`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/notifications", notifications::router())
        .nest("/broadcasts", broadcasts::router())
        .nest("/drafts", drafts::router())
}
