use sqlx::SqlitePool;

use crate::db::models::BotStatus;
use crate::db::RecipientRepository;
use crate::services::classifier::{ClassifiedFailure, FailureClass};

/// Reachability a recipient should be downgraded to after a permanent failure.
pub fn reachability_for(failure: &ClassifiedFailure) -> Option<BotStatus> {
    if failure.class != FailureClass::Permanent {
        return None;
    }
    match failure.code {
        Some(403) => Some(BotStatus::Blocked),
        Some(400) => Some(BotStatus::Inactive),
        _ => None,
    }
}

/// Downgrade the recipient behind a permanently failed send.
///
/// Awaited before the dispatcher moves to the next row so a concurrent
/// broadcast confirm sees the new flag, but never fails the caller: storage
/// errors are logged and swallowed. Returns the status only when it changed.
pub async fn apply_recipient_feedback(
    pool: &SqlitePool,
    recipient_id: Option<&str>,
    failure: &ClassifiedFailure,
) -> Option<BotStatus> {
    let recipient_id = recipient_id?;
    let status = reachability_for(failure)?;

    let recipient = match RecipientRepository::find_by_id(pool, recipient_id).await {
        Ok(Some(recipient)) => recipient,
        Ok(None) => {
            tracing::warn!(
                recipient_id = recipient_id,
                reason = "recipient not found",
                "recipient.reachability_update_skipped"
            );
            return None;
        }
        Err(e) => {
            tracing::warn!(
                recipient_id = recipient_id,
                error = %e,
                "recipient.reachability_update_failed"
            );
            return None;
        }
    };

    if recipient.bot_status == status {
        return None;
    }

    match RecipientRepository::update_bot_status(pool, recipient_id, status).await {
        Ok(true) => {
            tracing::info!(
                recipient_id = recipient_id,
                previous_status = recipient.bot_status.as_str(),
                bot_status = status.as_str(),
                application_status = ?recipient.application_status,
                error_code = failure.code,
                "recipient.reachability_updated"
            );
            Some(status)
        }
        // Deleted between the read and the write.
        Ok(false) => None,
        Err(e) => {
            tracing::warn!(
                recipient_id = recipient_id,
                error = %e,
                "recipient.reachability_update_failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ApplicationStatus;
    use crate::test_support::{insert_recipient, test_pool};

    fn failure(class: FailureClass, code: Option<u16>) -> ClassifiedFailure {
        ClassifiedFailure {
            class,
            code,
            message: "x".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn mapping_only_covers_permanent_codes() {
        assert_eq!(
            reachability_for(&failure(FailureClass::Permanent, Some(403))),
            Some(BotStatus::Blocked)
        );
        assert_eq!(
            reachability_for(&failure(FailureClass::Permanent, Some(400))),
            Some(BotStatus::Inactive)
        );
        assert_eq!(reachability_for(&failure(FailureClass::Permanent, None)), None);
        assert_eq!(
            reachability_for(&failure(FailureClass::RateLimited, Some(429))),
            None
        );
    }

    #[tokio::test]
    async fn blocked_recipient_is_flagged() {
        let pool = test_pool().await;
        insert_recipient(&pool, "r1", Some("1"), ApplicationStatus::Approved, BotStatus::Active).await;

        let applied = apply_recipient_feedback(
            &pool,
            Some("r1"),
            &failure(FailureClass::Permanent, Some(403)),
        )
        .await;
        assert_eq!(applied, Some(BotStatus::Blocked));

        let stored = RecipientRepository::find_by_id(&pool, "r1").await.unwrap().unwrap();
        assert_eq!(stored.bot_status, BotStatus::Blocked);
    }

    #[tokio::test]
    async fn missing_recipient_is_not_an_error() {
        let pool = test_pool().await;
        let applied = apply_recipient_feedback(
            &pool,
            Some("ghost"),
            &failure(FailureClass::Permanent, Some(400)),
        )
        .await;
        assert_eq!(applied, None);

        assert_eq!(
            apply_recipient_feedback(&pool, None, &failure(FailureClass::Permanent, Some(400)))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn unchanged_status_is_not_reported() {
        let pool = test_pool().await;
        insert_recipient(&pool, "r1", Some("1"), ApplicationStatus::Approved, BotStatus::Blocked).await;
        let before = RecipientRepository::find_by_id(&pool, "r1").await.unwrap().unwrap();

        let applied = apply_recipient_feedback(
            &pool,
            Some("r1"),
            &failure(FailureClass::Permanent, Some(403)),
        )
        .await;
        assert_eq!(applied, None);

        let after = RecipientRepository::find_by_id(&pool, "r1").await.unwrap().unwrap();
        assert_eq!(after.bot_status, BotStatus::Blocked);
        assert_eq!(after.updated_at, before.updated_at);
    }
}
