use chrono::{NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Broadcast, BroadcastCounts, BroadcastLog, CreateBroadcast};
use crate::db::repository::delivery::{apply_delivery_update, DeliveryTable, DeliveryUpdate};
use crate::db::repository::RecipientRepository;
use crate::error::{AppError, AppResult};

/// Rows per INSERT statement during fan-out.
pub const FAN_OUT_CHUNK_SIZE: usize = 500;

const BROADCAST_COLUMNS: &str = r#"
    id, admin_id, text, media_ref, mode,
    source_chat_id, source_message_id, status,
    total_count, sent_count, failed_count,
    started_at, finished_at, correlation_id,
    created_at, updated_at
"#;

const LOG_COLUMNS: &str = r#"
    id, broadcast_id, recipient_id, chat_id, status, attempts,
    last_error_code, last_error_message, next_attempt_at,
    created_at, updated_at
"#;

// ============================================================================
// Broadcast Repository
// ============================================================================

pub struct BroadcastRepository;

impl BroadcastRepository {
    /// Insert a `draft` broadcast with a previewed audience size.
    pub async fn create(
        pool: &SqlitePool,
        broadcast: CreateBroadcast,
        estimated_total: i64,
    ) -> AppResult<Broadcast> {
        let now = Utc::now().naive_utc();
        let correlation_id = Uuid::new_v4().to_string();

        let sql = format!(
            r#"
            INSERT INTO broadcasts (
                admin_id, text, media_ref, mode,
                source_chat_id, source_message_id, status,
                total_count, sent_count, failed_count,
                correlation_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'draft', ?, 0, 0, ?, ?, ?)
            RETURNING {}
            "#,
            BROADCAST_COLUMNS
        );

        let row = sqlx::query_as::<_, Broadcast>(&sql)
            .bind(broadcast.admin_id)
            .bind(broadcast.text)
            .bind(broadcast.media_ref)
            .bind(broadcast.mode)
            .bind(broadcast.source_chat_id)
            .bind(broadcast.source_message_id)
            .bind(estimated_total)
            .bind(correlation_id)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<Broadcast>> {
        let sql = format!("SELECT {} FROM broadcasts WHERE id = ?", BROADCAST_COLUMNS);
        let row = sqlx::query_as::<_, Broadcast>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Flip a draft to `queued` and materialize one log row per eligible
    /// recipient, all in one transaction.
    ///
    /// Returns `false` without touching anything when the broadcast is no
    /// longer a draft, which makes repeated confirms a no-op.
    pub async fn confirm_and_fan_out(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        let flipped = sqlx::query(
            r#"
            UPDATE broadcasts
            SET status = 'queued', updated_at = ?
            WHERE id = ? AND status = 'draft'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await.map_err(AppError::Database)?;
            return Ok(false);
        }

        let targets = RecipientRepository::list_broadcast_eligible(&mut *tx).await?;

        for chunk in targets.chunks(FAN_OUT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO broadcast_logs (broadcast_id, recipient_id, chat_id, status, attempts, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, target| {
                row.push_bind(id)
                    .push_bind(target.id.clone())
                    .push_bind(target.telegram_chat_id.clone())
                    .push_bind("pending")
                    .push_bind(0i32)
                    .push_bind(now)
                    .push_bind(now);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
        }

        sqlx::query(
            r#"
            UPDATE broadcasts
            SET total_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(targets.len() as i64)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            broadcast_id = id,
            total_count = targets.len(),
            "Broadcast confirmed and fanned out"
        );

        Ok(true)
    }

    /// The broadcast the dispatcher should work on: a `sending` one first,
    /// otherwise the oldest `queued` one.
    pub async fn find_active(pool: &SqlitePool) -> AppResult<Option<Broadcast>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM broadcasts
            WHERE status IN ('sending', 'queued')
            ORDER BY CASE status WHEN 'sending' THEN 0 ELSE 1 END, id ASC
            LIMIT 1
            "#,
            BROADCAST_COLUMNS
        );
        let row = sqlx::query_as::<_, Broadcast>(&sql)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Move a `queued` broadcast to `sending` and stamp `started_at`.
    pub async fn mark_sending(
        pool: &SqlitePool,
        id: i64,
        now: NaiveDateTime,
    ) -> AppResult<Broadcast> {
        let sql = format!(
            r#"
            UPDATE broadcasts
            SET status = 'sending',
                started_at = COALESCE(started_at, ?),
                updated_at = ?
            WHERE id = ? AND status = 'queued'
            RETURNING {}
            "#,
            BROADCAST_COLUMNS
        );
        let row = sqlx::query_as::<_, Broadcast>(&sql)
            .bind(now)
            .bind(Utc::now().naive_utc())
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        match row {
            Some(b) => Ok(b),
            None => Self::find_by_id(pool, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("broadcast {}", id))),
        }
    }

    /// Pending logs of one broadcast whose backoff has elapsed, oldest id first.
    pub async fn list_eligible_logs(
        pool: &SqlitePool,
        broadcast_id: i64,
        limit: i64,
        now: NaiveDateTime,
    ) -> AppResult<Vec<BroadcastLog>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT {}
            FROM broadcast_logs
            WHERE broadcast_id = ?
              AND status = 'pending'
              AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
            LOG_COLUMNS
        );
        let rows = sqlx::query_as::<_, BroadcastLog>(&sql)
            .bind(broadcast_id)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Pending logs regardless of backoff.
    pub async fn count_pending_logs(pool: &SqlitePool, broadcast_id: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM broadcast_logs WHERE broadcast_id = ? AND status = 'pending'",
        )
        .bind(broadcast_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    #[cfg(test)]
    pub async fn list_logs(pool: &SqlitePool, broadcast_id: i64) -> AppResult<Vec<BroadcastLog>> {
        let sql = format!(
            "SELECT {} FROM broadcast_logs WHERE broadcast_id = ? ORDER BY id ASC",
            LOG_COLUMNS
        );
        let rows = sqlx::query_as::<_, BroadcastLog>(&sql)
            .bind(broadcast_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn mark_log_sent(pool: &SqlitePool, log_id: i64) -> AppResult<bool> {
        apply_delivery_update(pool, DeliveryTable::BroadcastLogs, log_id, DeliveryUpdate::Sent)
            .await
    }

    pub async fn mark_log_retry(
        pool: &SqlitePool,
        log_id: i64,
        error_code: Option<i32>,
        error_message: &str,
        next_attempt_at: NaiveDateTime,
    ) -> AppResult<bool> {
        apply_delivery_update(
            pool,
            DeliveryTable::BroadcastLogs,
            log_id,
            DeliveryUpdate::Retry {
                error_code,
                error_message: error_message.to_string(),
                next_attempt_at,
            },
        )
        .await
    }

    pub async fn mark_log_failed(
        pool: &SqlitePool,
        log_id: i64,
        error_code: Option<i32>,
        error_message: &str,
    ) -> AppResult<bool> {
        apply_delivery_update(
            pool,
            DeliveryTable::BroadcastLogs,
            log_id,
            DeliveryUpdate::Failed {
                error_code,
                error_message: error_message.to_string(),
            },
        )
        .await
    }

    /// Refresh the denormalized counters from the log rows and persist them.
    pub async fn recompute_counts(pool: &SqlitePool, id: i64) -> AppResult<BroadcastCounts> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE broadcasts
            SET sent_count = (
                    SELECT COUNT(*) FROM broadcast_logs
                    WHERE broadcast_id = broadcasts.id AND status = 'sent'
                ),
                failed_count = (
                    SELECT COUNT(*) FROM broadcast_logs
                    WHERE broadcast_id = broadcasts.id AND status = 'failed'
                ),
                updated_at = ?
            WHERE id = ?
            RETURNING sent_count, failed_count
            "#,
        )
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        let (sent, failed) =
            row.ok_or_else(|| AppError::NotFound(format!("broadcast {}", id)))?;
        Ok(BroadcastCounts { sent, failed })
    }

    /// Recompute counters one last time and close the broadcast.
    pub async fn complete(pool: &SqlitePool, id: i64, now: NaiveDateTime) -> AppResult<Broadcast> {
        Self::recompute_counts(pool, id).await?;

        let sql = format!(
            r#"
            UPDATE broadcasts
            SET status = 'completed', finished_at = ?, updated_at = ?
            WHERE id = ? AND status = 'sending'
            RETURNING {}
            "#,
            BROADCAST_COLUMNS
        );
        let row = sqlx::query_as::<_, Broadcast>(&sql)
            .bind(now)
            .bind(Utc::now().naive_utc())
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        match row {
            Some(b) => Ok(b),
            None => Self::find_by_id(pool, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("broadcast {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        ApplicationStatus, BotStatus, BroadcastMode, BroadcastStatus, DeliveryStatus,
    };
    use crate::test_support::{insert_recipient, test_pool};

    fn copy_draft() -> CreateBroadcast {
        CreateBroadcast {
            admin_id: "admin".to_string(),
            text: "Hello everyone".to_string(),
            media_ref: None,
            mode: BroadcastMode::Copy,
            source_chat_id: None,
            source_message_id: None,
        }
    }

    async fn seed_audience(pool: &SqlitePool, n: usize) {
        for i in 0..n {
            insert_recipient(
                pool,
                &format!("r{}", i),
                Some(&format!("{}", 1000 + i)),
                ApplicationStatus::Approved,
                BotStatus::Active,
            )
            .await;
        }
    }

    #[tokio::test]
    async fn confirm_fans_out_exactly_once() {
        let pool = test_pool().await;
        seed_audience(&pool, 3).await;

        let draft = BroadcastRepository::create(&pool, copy_draft(), 3).await.unwrap();
        assert_eq!(draft.status, BroadcastStatus::Draft);
        assert!(!draft.correlation_id.is_empty());

        assert!(BroadcastRepository::confirm_and_fan_out(&pool, draft.id).await.unwrap());
        assert!(!BroadcastRepository::confirm_and_fan_out(&pool, draft.id).await.unwrap());

        let logs = BroadcastRepository::list_logs(&pool, draft.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|l| l.status == DeliveryStatus::Pending && l.attempts == 0));

        let stored = BroadcastRepository::find_by_id(&pool, draft.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BroadcastStatus::Queued);
        assert_eq!(stored.total_count, 3);
    }

    #[tokio::test]
    async fn fan_out_spans_multiple_chunks() {
        let pool = test_pool().await;
        seed_audience(&pool, FAN_OUT_CHUNK_SIZE + 7).await;

        let draft = BroadcastRepository::create(&pool, copy_draft(), 0).await.unwrap();
        BroadcastRepository::confirm_and_fan_out(&pool, draft.id).await.unwrap();

        let stored = BroadcastRepository::find_by_id(&pool, draft.id).await.unwrap().unwrap();
        assert_eq!(stored.total_count, (FAN_OUT_CHUNK_SIZE + 7) as i64);
        assert_eq!(
            BroadcastRepository::count_pending_logs(&pool, draft.id).await.unwrap(),
            (FAN_OUT_CHUNK_SIZE + 7) as i64
        );
    }

    #[tokio::test]
    async fn find_active_prefers_sending_over_queued() {
        let pool = test_pool().await;
        let older = BroadcastRepository::create(&pool, copy_draft(), 0).await.unwrap();
        let newer = BroadcastRepository::create(&pool, copy_draft(), 0).await.unwrap();

        assert!(BroadcastRepository::find_active(&pool).await.unwrap().is_none());

        BroadcastRepository::confirm_and_fan_out(&pool, older.id).await.unwrap();
        BroadcastRepository::confirm_and_fan_out(&pool, newer.id).await.unwrap();
        let picked = BroadcastRepository::find_active(&pool).await.unwrap().unwrap();
        assert_eq!(picked.id, older.id);

        let now = Utc::now().naive_utc();
        let sending = BroadcastRepository::mark_sending(&pool, newer.id, now).await.unwrap();
        assert_eq!(sending.status, BroadcastStatus::Sending);
        assert_eq!(sending.started_at, Some(now));

        let picked = BroadcastRepository::find_active(&pool).await.unwrap().unwrap();
        assert_eq!(picked.id, newer.id);
    }

    #[tokio::test]
    async fn recompute_counts_follows_log_rows() {
        let pool = test_pool().await;
        seed_audience(&pool, 3).await;
        let draft = BroadcastRepository::create(&pool, copy_draft(), 3).await.unwrap();
        BroadcastRepository::confirm_and_fan_out(&pool, draft.id).await.unwrap();

        let logs = BroadcastRepository::list_logs(&pool, draft.id).await.unwrap();
        BroadcastRepository::mark_log_sent(&pool, logs[0].id).await.unwrap();
        BroadcastRepository::mark_log_failed(&pool, logs[1].id, Some(403), "blocked")
            .await
            .unwrap();

        let counts = BroadcastRepository::recompute_counts(&pool, draft.id).await.unwrap();
        assert_eq!(counts, BroadcastCounts { sent: 1, failed: 1 });

        let stored = BroadcastRepository::find_by_id(&pool, draft.id).await.unwrap().unwrap();
        assert_eq!(stored.sent_count, 1);
        assert_eq!(stored.failed_count, 1);
        assert!(stored.sent_count + stored.failed_count <= stored.total_count);
    }
}
