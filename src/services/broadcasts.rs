use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::models::{Broadcast, BroadcastMode, BroadcastStatus, CreateBroadcast};
use crate::db::{BroadcastRepository, RecipientRepository};
use crate::error::{AppError, AppResult};
use crate::services::notifications::{validate_text, MAX_MESSAGE_LEN};

/// Telegram's limit for a media caption.
pub const MAX_CAPTION_LEN: usize = 1024;

/// Progress snapshot returned to collaborators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BroadcastProgress {
    pub id: i64,
    pub status: BroadcastStatus,
    pub total_count: i64,
    pub sent_count: i64,
    pub failed_count: i64,
}

impl From<&Broadcast> for BroadcastProgress {
    fn from(b: &Broadcast) -> Self {
        Self {
            id: b.id,
            status: b.status,
            total_count: b.total_count,
            sent_count: b.sent_count,
            failed_count: b.failed_count,
        }
    }
}

/// Draft, confirm and track mass sends. Delivery itself belongs to the dispatcher.
pub struct BroadcastService {
    pool: SqlitePool,
}

impl BroadcastService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a draft and estimate its audience from the current recipient set.
    pub async fn create(&self, request: CreateBroadcast) -> AppResult<Broadcast> {
        if request.admin_id.trim().is_empty() {
            return Err(AppError::Validation("admin_id is required".to_string()));
        }

        if request.mode == BroadcastMode::Copy {
            match &request.media_ref {
                Some(media) if !media.trim().is_empty() => {
                    if request.text.chars().count() > MAX_CAPTION_LEN {
                        return Err(AppError::Validation(format!(
                            "caption exceeds {} characters",
                            MAX_CAPTION_LEN
                        )));
                    }
                }
                _ => validate_text(&request.text)?,
            }
        } else if request.text.chars().count() > MAX_MESSAGE_LEN {
            return Err(AppError::Validation(format!(
                "text exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let estimated = RecipientRepository::count_broadcast_eligible(&self.pool).await?;
        let broadcast = BroadcastRepository::create(&self.pool, request, estimated).await?;

        tracing::info!(
            broadcast_id = broadcast.id,
            correlation_id = %broadcast.correlation_id,
            estimated_total = estimated,
            "broadcast.drafted"
        );

        Ok(broadcast)
    }

    /// Queue a draft for delivery.
    ///
    /// Confirming anything that is no longer a draft returns its current
    /// state unchanged, so a double submit fans out only once.
    pub async fn confirm(&self, id: i64) -> AppResult<Broadcast> {
        let broadcast = self.get(id).await?;

        if broadcast.status != BroadcastStatus::Draft {
            tracing::debug!(
                broadcast_id = id,
                status = broadcast.status.as_str(),
                "Broadcast already confirmed; ignoring repeated confirm"
            );
            return Ok(broadcast);
        }

        if broadcast.mode == BroadcastMode::Forward && broadcast.source_message().is_none() {
            return Err(AppError::Validation(
                "forward broadcasts require source_chat_id and source_message_id".to_string(),
            ));
        }

        BroadcastRepository::confirm_and_fan_out(&self.pool, id).await?;
        self.get(id).await
    }

    pub async fn progress(&self, id: i64) -> AppResult<BroadcastProgress> {
        let broadcast = self.get(id).await?;
        Ok(BroadcastProgress::from(&broadcast))
    }

    async fn get(&self, id: i64) -> AppResult<Broadcast> {
        BroadcastRepository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("broadcast {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ApplicationStatus, BotStatus};
    use crate::test_support::{insert_recipient, test_pool};

    fn request(mode: BroadcastMode) -> CreateBroadcast {
        CreateBroadcast {
            admin_id: "admin-1".to_string(),
            text: "Team meeting at 5".to_string(),
            media_ref: None,
            mode,
            source_chat_id: None,
            source_message_id: None,
        }
    }

    #[tokio::test]
    async fn create_estimates_audience() {
        let pool = test_pool().await;
        insert_recipient(&pool, "a", Some("1"), ApplicationStatus::Approved, BotStatus::Active).await;
        insert_recipient(&pool, "b", Some("2"), ApplicationStatus::Approved, BotStatus::Inactive).await;

        let service = BroadcastService::new(pool);
        let draft = service.create(request(BroadcastMode::Copy)).await.unwrap();
        assert_eq!(draft.status, BroadcastStatus::Draft);
        assert_eq!(draft.total_count, 1);
    }

    #[tokio::test]
    async fn copy_without_content_is_rejected() {
        let pool = test_pool().await;
        let service = BroadcastService::new(pool);

        let mut req = request(BroadcastMode::Copy);
        req.text = String::new();
        assert!(matches!(service.create(req).await, Err(AppError::Validation(_))));

        let mut with_media = request(BroadcastMode::Copy);
        with_media.text = String::new();
        with_media.media_ref = Some("AgACAgIAAxkBAAIB".to_string());
        assert!(service.create(with_media).await.is_ok());
    }

    #[tokio::test]
    async fn forward_without_source_never_reaches_queued() {
        let pool = test_pool().await;
        insert_recipient(&pool, "a", Some("1"), ApplicationStatus::Approved, BotStatus::Active).await;
        let service = BroadcastService::new(pool.clone());

        let draft = service.create(request(BroadcastMode::Forward)).await.unwrap();
        assert!(matches!(
            service.confirm(draft.id).await,
            Err(AppError::Validation(_))
        ));

        let progress = service.progress(draft.id).await.unwrap();
        assert_eq!(progress.status, BroadcastStatus::Draft);
        assert!(BroadcastRepository::list_logs(&pool, draft.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn double_confirm_is_idempotent() {
        let pool = test_pool().await;
        for i in 0..4 {
            insert_recipient(
                &pool,
                &format!("r{}", i),
                Some(&i.to_string()),
                ApplicationStatus::Approved,
                BotStatus::Active,
            )
            .await;
        }
        let service = BroadcastService::new(pool.clone());
        let draft = service.create(request(BroadcastMode::Copy)).await.unwrap();

        let first = service.confirm(draft.id).await.unwrap();
        let second = service.confirm(draft.id).await.unwrap();
        assert_eq!(first.status, BroadcastStatus::Queued);
        assert_eq!(second.status, BroadcastStatus::Queued);
        assert_eq!(first.total_count, 4);
        assert_eq!(second.total_count, 4);
        assert_eq!(BroadcastRepository::list_logs(&pool, draft.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn confirm_resnapshots_audience() {
        let pool = test_pool().await;
        insert_recipient(&pool, "a", Some("1"), ApplicationStatus::Approved, BotStatus::Active).await;
        let service = BroadcastService::new(pool.clone());
        let draft = service.create(request(BroadcastMode::Copy)).await.unwrap();
        assert_eq!(draft.total_count, 1);

        insert_recipient(&pool, "b", Some("2"), ApplicationStatus::Approved, BotStatus::Active).await;
        let confirmed = service.confirm(draft.id).await.unwrap();
        assert_eq!(confirmed.total_count, 2);
    }

    #[tokio::test]
    async fn unknown_broadcast_is_not_found() {
        let pool = test_pool().await;
        let service = BroadcastService::new(pool);
        assert!(matches!(service.progress(99).await, Err(AppError::NotFound(_))));
    }
}
