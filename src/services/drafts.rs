//! Short-lived conversation state keyed by actor id.
//!
//! Admins build a task assignment over several steps (bot dialogue or
//! mini-app form). Partial input lives here until it is submitted through
//! the durable queue or expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::services::channel::InlineKeyboard;
use crate::services::notifications::TaskAssignmentRequest;

pub const DEFAULT_DRAFT_TTL: Duration = Duration::from_secs(30 * 60);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory map with a per-entry time to live. Expired entries are
/// invisible to readers and removed by [`ConversationStore::purge_expired`].
pub struct ConversationStore<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    ttl: Duration,
}

impl<T: Clone> ConversationStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value` for `key`, restarting its TTL.
    pub async fn put(&self, key: &str, value: T) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone())
    }

    /// Remove and return the live value for `key`.
    pub async fn take(&self, key: &str) -> Option<T> {
        let entry = self.entries.write().await.remove(key)?;
        entry.is_live(Instant::now()).then_some(entry.value)
    }

    /// Drop every expired entry, returning how many were evicted.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

/// A task assignment being assembled by an admin. Every field is optional
/// until submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub keyboard: Option<InlineKeyboard>,
}

impl TaskDraft {
    /// Overlay the fields present in `patch`.
    pub fn merge(&mut self, patch: TaskDraft) {
        if patch.recipient_id.is_some() {
            self.recipient_id = patch.recipient_id;
        }
        if patch.chat_id.is_some() {
            self.chat_id = patch.chat_id;
        }
        if patch.assignment_id.is_some() {
            self.assignment_id = patch.assignment_id;
        }
        if patch.text.is_some() {
            self.text = patch.text;
        }
        if patch.keyboard.is_some() {
            self.keyboard = patch.keyboard;
        }
    }

    pub fn into_request(self) -> AppResult<TaskAssignmentRequest> {
        fn required(value: Option<String>, name: &str) -> AppResult<String> {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Validation(format!("draft is missing {}", name)))
        }

        Ok(TaskAssignmentRequest {
            recipient_id: required(self.recipient_id, "recipient_id")?,
            chat_id: required(self.chat_id, "chat_id")?,
            assignment_id: required(self.assignment_id, "assignment_id")?,
            text: required(self.text, "text")?,
            keyboard: self.keyboard,
        })
    }
}

pub type DraftStore = ConversationStore<TaskDraft>;
