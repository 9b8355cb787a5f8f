use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{BotStatus, BroadcastTarget, Recipient};
use crate::error::{AppError, AppResult};

// ============================================================================
// Recipient Repository
// ============================================================================

/// Broadcast audience: approved, reachable, and with a chat to send to.
const ELIGIBLE_FILTER: &str = r#"
    application_status = 'approved'
    AND bot_status = 'active'
    AND telegram_chat_id IS NOT NULL
"#;

pub struct RecipientRepository;

impl RecipientRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Recipient>> {
        let row = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT
                id, display_name, telegram_chat_id,
                application_status, bot_status,
                created_at, updated_at
            FROM recipients
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Set the channel-reachability flag. Returns whether the recipient exists.
    pub async fn update_bot_status(
        pool: &SqlitePool,
        id: &str,
        status: BotStatus,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE recipients
            SET bot_status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Size of the current broadcast audience (used for draft previews).
    pub async fn count_broadcast_eligible(pool: &SqlitePool) -> AppResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM recipients WHERE {}", ELIGIBLE_FILTER);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Snapshot the broadcast audience on an open connection, so fan-out can
    /// read it inside the confirm transaction.
    pub async fn list_broadcast_eligible(
        conn: &mut SqliteConnection,
    ) -> AppResult<Vec<BroadcastTarget>> {
        let sql = format!(
            "SELECT id, telegram_chat_id FROM recipients WHERE {} ORDER BY created_at, id",
            ELIGIBLE_FILTER
        );
        let rows = sqlx::query_as::<_, BroadcastTarget>(&sql)
            .fetch_all(conn)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }
}
