//! Fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::time::Instant;

use crate::db::models::{ApplicationStatus, BotStatus};
use crate::services::channel::{ChannelError, MessageChannel, OutboundMessage};

/// Fresh in-memory database with every migration applied.
///
/// A single connection that never expires: each new in-memory connection
/// would otherwise open an empty database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub async fn insert_recipient(
    pool: &SqlitePool,
    id: &str,
    chat_id: Option<&str>,
    application_status: ApplicationStatus,
    bot_status: BotStatus,
) {
    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        INSERT INTO recipients
            (id, display_name, telegram_chat_id, application_status, bot_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(format!("Recipient {}", id))
    .bind(chat_id)
    .bind(application_status)
    .bind(bot_status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: String,
    pub message: OutboundMessage,
    pub at: Instant,
}

/// Channel double. Every call is recorded; results come from a per-chat
/// script first, then from the always-fail map, and default to success.
#[derive(Default)]
pub struct MockChannel {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), ChannelError>>>>,
    failing: Mutex<HashMap<String, ChannelError>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl MockChannel {
    pub fn script(&self, chat_id: &str, results: Vec<Result<(), ChannelError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), results.into());
    }

    pub fn always_fail(&self, chat_id: &str, error: ChannelError) {
        self.failing
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageChannel for MockChannel {
    async fn send(&self, chat_id: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id: chat_id.to_string(),
            message: message.clone(),
            at: Instant::now(),
        });

        if let Some(result) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(chat_id)
            .and_then(|queue| queue.pop_front())
        {
            return result;
        }

        match self.failing.lock().unwrap().get(chat_id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
