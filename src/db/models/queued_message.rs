use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::DeliveryStatus;

/// Kind of point-to-point message stored in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssignment,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaskAssignment => "task_assignment",
        }
    }
}

/// One point-to-point send job.
///
/// The chat id is a snapshot taken at enqueue time so delivery does not
/// depend on the recipient row staying unchanged. Rows are kept after they
/// reach a terminal status and serve as the audit trail.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: i64,
    pub message_type: MessageType,
    pub recipient_id: Option<String>,
    pub chat_id: String,

    /// JSON-serialized `MessagePayload`, parsed by the dispatcher on every attempt.
    pub payload: String,

    pub status: DeliveryStatus,
    pub attempts: i32,
    pub last_error_code: Option<i32>,
    pub last_error_message: Option<String>,

    /// `None` means eligible immediately.
    pub next_attempt_at: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateQueuedMessage {
    pub message_type: MessageType,
    pub recipient_id: Option<String>,
    pub chat_id: String,
    pub payload: String,
}
