use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Outcome of the recipient's application, managed by the bot/API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

/// Whether the bot can still reach the recipient's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Active,
    Blocked,
    Inactive,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Active => "active",
            BotStatus::Blocked => "blocked",
            BotStatus::Inactive => "inactive",
        }
    }
}

/// A user who can receive task notices and broadcasts.
///
/// Rows are created and deleted by collaborators; the dispatcher only reads
/// them and downgrades `bot_status` after permanent delivery failures.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub display_name: Option<String>,

    /// Telegram chat the bot talks to; absent until the user has started the bot.
    pub telegram_chat_id: Option<String>,

    pub application_status: ApplicationStatus,
    pub bot_status: BotStatus,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// The slice of a recipient captured when a broadcast fans out.
#[derive(Debug, Clone, FromRow)]
pub struct BroadcastTarget {
    pub id: String,
    pub telegram_chat_id: String,
}
