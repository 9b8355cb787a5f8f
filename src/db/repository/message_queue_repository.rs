use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{CreateQueuedMessage, QueuedMessage};
use crate::db::repository::delivery::{apply_delivery_update, DeliveryTable, DeliveryUpdate};
use crate::error::{AppError, AppResult};

/// Repository for the durable point-to-point message queue.
///
/// The dispatcher is the only consumer and runs a single cycle at a time,
/// so rows are listed rather than claimed; every status change is guarded by
/// `status = 'pending'` to keep terminal rows immutable.
pub struct MessageQueueRepository;

impl MessageQueueRepository {
    /// Store a new job: `pending`, zero attempts, eligible immediately.
    pub async fn enqueue(
        pool: &SqlitePool,
        message: CreateQueuedMessage,
    ) -> AppResult<QueuedMessage> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, QueuedMessage>(
            r#"
            INSERT INTO message_queue (
                message_type,
                recipient_id,
                chat_id,
                payload,
                status,
                attempts,
                next_attempt_at,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, 'pending', 0, NULL, ?, ?)
            RETURNING
                id,
                message_type,
                recipient_id,
                chat_id,
                payload,
                status,
                attempts,
                last_error_code,
                last_error_message,
                next_attempt_at,
                created_at,
                updated_at
            "#,
        )
        .bind(message.message_type)
        .bind(message.recipient_id)
        .bind(message.chat_id)
        .bind(message.payload)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Pending rows whose backoff (if any) has elapsed at `now`, oldest id first.
    pub async fn list_eligible(
        pool: &SqlitePool,
        limit: i64,
        now: NaiveDateTime,
    ) -> AppResult<Vec<QueuedMessage>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, QueuedMessage>(
            r#"
            SELECT
                id,
                message_type,
                recipient_id,
                chat_id,
                payload,
                status,
                attempts,
                last_error_code,
                last_error_message,
                next_attempt_at,
                created_at,
                updated_at
            FROM message_queue
            WHERE status = 'pending'
              AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<QueuedMessage>> {
        let row = sqlx::query_as::<_, QueuedMessage>(
            r#"
            SELECT
                id,
                message_type,
                recipient_id,
                chat_id,
                payload,
                status,
                attempts,
                last_error_code,
                last_error_message,
                next_attempt_at,
                created_at,
                updated_at
            FROM message_queue
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn mark_sent(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        apply_delivery_update(pool, DeliveryTable::MessageQueue, id, DeliveryUpdate::Sent).await
    }

    /// Record a failed attempt and schedule the next one.
    pub async fn mark_retry(
        pool: &SqlitePool,
        id: i64,
        error_code: Option<i32>,
        error_message: &str,
        next_attempt_at: NaiveDateTime,
    ) -> AppResult<bool> {
        apply_delivery_update(
            pool,
            DeliveryTable::MessageQueue,
            id,
            DeliveryUpdate::Retry {
                error_code,
                error_message: error_message.to_string(),
                next_attempt_at,
            },
        )
        .await
    }

    pub async fn mark_failed(
        pool: &SqlitePool,
        id: i64,
        error_code: Option<i32>,
        error_message: &str,
    ) -> AppResult<bool> {
        apply_delivery_update(
            pool,
            DeliveryTable::MessageQueue,
            id,
            DeliveryUpdate::Failed {
                error_code,
                error_message: error_message.to_string(),
            },
        )
        .await
    }
}
