use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};

/// Tables that share the pending/sent/failed delivery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTable {
    MessageQueue,
    BroadcastLogs,
}

impl DeliveryTable {
    fn name(&self) -> &'static str {
        match self {
            DeliveryTable::MessageQueue => "message_queue",
            DeliveryTable::BroadcastLogs => "broadcast_logs",
        }
    }
}

/// A single status transition recorded after a send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryUpdate {
    Sent,
    Retry {
        error_code: Option<i32>,
        error_message: String,
        next_attempt_at: NaiveDateTime,
    },
    Failed {
        error_code: Option<i32>,
        error_message: String,
    },
}

/// Apply `update` to one row and bump its attempt counter.
///
/// Only rows still in `pending` are touched, so replaying an update against
/// a row that already reached `sent` or `failed` is a no-op. Returns whether
/// a row changed.
pub async fn apply_delivery_update(
    pool: &SqlitePool,
    table: DeliveryTable,
    id: i64,
    update: DeliveryUpdate,
) -> AppResult<bool> {
    let now = Utc::now().naive_utc();

    let result = match update {
        DeliveryUpdate::Sent => {
            let sql = format!(
                r#"
                UPDATE {}
                SET status = 'sent',
                    attempts = attempts + 1,
                    next_attempt_at = NULL,
                    updated_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
                table.name()
            );
            sqlx::query(&sql).bind(now).bind(id).execute(pool).await
        }
        DeliveryUpdate::Retry {
            error_code,
            error_message,
            next_attempt_at,
        } => {
            let sql = format!(
                r#"
                UPDATE {}
                SET attempts = attempts + 1,
                    last_error_code = ?,
                    last_error_message = ?,
                    next_attempt_at = ?,
                    updated_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
                table.name()
            );
            sqlx::query(&sql)
                .bind(error_code)
                .bind(error_message)
                .bind(next_attempt_at)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await
        }
        DeliveryUpdate::Failed {
            error_code,
            error_message,
        } => {
            let sql = format!(
                r#"
                UPDATE {}
                SET status = 'failed',
                    attempts = attempts + 1,
                    last_error_code = ?,
                    last_error_message = ?,
                    next_attempt_at = NULL,
                    updated_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
                table.name()
            );
            sqlx::query(&sql)
                .bind(error_code)
                .bind(error_message)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await
        }
    }
    .map_err(AppError::Database)?;

    Ok(result.rows_affected() > 0)
}
