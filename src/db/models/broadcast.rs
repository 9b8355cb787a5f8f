use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::DeliveryStatus;

/// How a broadcast is delivered.
///
/// `Copy` composes a fresh message (text, optionally with media);
/// `Forward` relays an existing message from the source chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    Copy,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Draft,
    Queued,
    Sending,
    Completed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Draft => "draft",
            BroadcastStatus::Queued => "queued",
            BroadcastStatus::Sending => "sending",
            BroadcastStatus::Completed => "completed",
        }
    }
}

/// A mass-send campaign.
///
/// `sent_count` and `failed_count` are always recomputed from
/// `broadcast_logs`; nothing increments them directly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: i64,
    pub admin_id: String,
    pub text: String,
    pub media_ref: Option<String>,
    pub mode: BroadcastMode,
    pub source_chat_id: Option<String>,
    pub source_message_id: Option<i32>,
    pub status: BroadcastStatus,
    pub total_count: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub correlation_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Broadcast {
    /// Source message to relay, present only when both halves were supplied.
    pub fn source_message(&self) -> Option<SourceMessageRef> {
        match (&self.source_chat_id, self.source_message_id) {
            (Some(chat_id), Some(message_id)) => Some(SourceMessageRef {
                chat_id: chat_id.clone(),
                message_id,
            }),
            _ => None,
        }
    }
}

/// Pointer to an existing Telegram message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessageRef {
    pub chat_id: String,
    pub message_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBroadcast {
    pub admin_id: String,
    #[serde(default)]
    pub text: String,
    pub media_ref: Option<String>,
    pub mode: BroadcastMode,
    pub source_chat_id: Option<String>,
    pub source_message_id: Option<i32>,
}

/// One (broadcast, recipient) delivery row, created in bulk when the
/// broadcast is confirmed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BroadcastLog {
    pub id: i64,
    pub broadcast_id: i64,
    pub recipient_id: Option<String>,
    pub chat_id: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub last_error_code: Option<i32>,
    pub last_error_message: Option<String>,
    pub next_attempt_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastCounts {
    pub sent: i64,
    pub failed: i64,
}
