//! Messaging channel boundary.
//!
//! The dispatcher talks to the outside world only through [`MessageChannel`].
//! Implementations translate their client-specific failures into
//! [`ChannelError`] so nothing past this module depends on the shape of a
//! particular bot library's errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::SourceMessageRef;

/// Inline keyboard attached to a message, rows of buttons top to bottom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<KeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(flatten)]
    pub action: ButtonAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ButtonAction {
    /// Callback data handled by the bot's command layer.
    Callback { data: String },
    /// Plain link.
    Url { url: String },
    /// Opens the web mini-app.
    WebApp { url: String },
}

impl InlineKeyboard {
    /// Check every link button carries a parseable absolute URL.
    pub fn validate(&self) -> Result<(), String> {
        for button in self.rows.iter().flatten() {
            if button.text.trim().is_empty() {
                return Err("keyboard button text must not be empty".to_string());
            }
            match &button.action {
                ButtonAction::Callback { data } => {
                    // Telegram caps callback data at 64 bytes.
                    if data.is_empty() || data.len() > 64 {
                        return Err(format!(
                            "callback data for '{}' must be 1-64 bytes",
                            button.text
                        ));
                    }
                }
                ButtonAction::Url { url } | ButtonAction::WebApp { url } => {
                    url::Url::parse(url)
                        .map_err(|e| format!("invalid url for '{}': {}", button.text, e))?;
                }
            }
        }
        Ok(())
    }
}

/// A fully rendered message ready to hand to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text {
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    Media {
        media_ref: String,
        caption: String,
    },
    Forward {
        source: SourceMessageRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionReset,
    Other,
}

/// Typed failure returned by a channel send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The remote API answered with an error. `code` follows HTTP semantics
    /// when it could be determined.
    #[error("channel API error ({code:?}): {description}")]
    Api {
        code: Option<u16>,
        description: String,
        /// Delay the remote side asked for before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The request never got a usable answer.
    #[error("channel transport error ({kind:?}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// The message itself is unacceptable to the channel (bad markup,
    /// oversized text, unknown media). Never a recipient problem.
    #[error("message rejected: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    /// Deliver one message to `chat_id`.
    async fn send(&self, chat_id: &str, message: &OutboundMessage) -> Result<(), ChannelError>;
}
