use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::models::{CreateQueuedMessage, MessageType, QueuedMessage};
use crate::db::MessageQueueRepository;
use crate::error::{AppError, AppResult};
use crate::services::channel::{InlineKeyboard, OutboundMessage};

/// Telegram's limit for a text message.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Data for a task-assignment notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignmentNotice {
    pub assignment_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<InlineKeyboard>,
}

/// Serialized body of a queued message, one variant per message kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    TaskAssignment(TaskAssignmentNotice),
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessagePayload::TaskAssignment(_) => MessageType::TaskAssignment,
        }
    }

    pub fn into_outbound(self) -> OutboundMessage {
        match self {
            MessagePayload::TaskAssignment(notice) => OutboundMessage::Text {
                text: notice.text,
                keyboard: notice.keyboard,
            },
        }
    }

    fn validate(&self) -> AppResult<()> {
        match self {
            MessagePayload::TaskAssignment(notice) => {
                if notice.assignment_id.trim().is_empty() {
                    return Err(AppError::Validation("assignment_id is required".to_string()));
                }
                validate_text(&notice.text)?;
                if let Some(keyboard) = &notice.keyboard {
                    keyboard.validate().map_err(AppError::Validation)?;
                }
                Ok(())
            }
        }
    }
}

pub fn validate_text(text: &str) -> AppResult<()> {
    if text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::Validation(format!(
            "text exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(())
}

/// Request to notify one recipient about a task assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentRequest {
    pub recipient_id: String,
    pub chat_id: String,
    pub assignment_id: String,
    pub text: String,
    #[serde(default)]
    pub keyboard: Option<InlineKeyboard>,
}

/// Producer side of the durable queue. Every notice goes through here; the
/// dispatcher does the actual sending.
pub struct NotificationService {
    pool: SqlitePool,
}

impl NotificationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        recipient_id: Option<String>,
        chat_id: String,
        payload: MessagePayload,
    ) -> AppResult<QueuedMessage> {
        if chat_id.trim().is_empty() {
            return Err(AppError::Validation("chat_id is required".to_string()));
        }
        payload.validate()?;

        let serialized = serde_json::to_string(&payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let message = MessageQueueRepository::enqueue(
            &self.pool,
            CreateQueuedMessage {
                message_type: payload.message_type(),
                recipient_id,
                chat_id,
                payload: serialized,
            },
        )
        .await?;

        tracing::info!(
            message_id = message.id,
            message_type = message.message_type.as_str(),
            "queue.enqueued"
        );

        Ok(message)
    }

    pub async fn enqueue_task_assignment(
        &self,
        request: TaskAssignmentRequest,
    ) -> AppResult<QueuedMessage> {
        self.enqueue(
            Some(request.recipient_id),
            request.chat_id,
            MessagePayload::TaskAssignment(TaskAssignmentNotice {
                assignment_id: request.assignment_id,
                text: request.text,
                keyboard: request.keyboard,
            }),
        )
        .await
    }

    pub async fn find(&self, id: i64) -> AppResult<QueuedMessage> {
        MessageQueueRepository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queued message {}", id)))
    }
}
