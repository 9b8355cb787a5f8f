use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
    WebAppInfo,
};
use teloxide::RequestError;

use crate::error::{AppError, AppResult};
use crate::services::channel::{
    ButtonAction, ChannelError, InlineKeyboard, MessageChannel, OutboundMessage,
    TransportErrorKind,
};

/// Telegram Bot API implementation of [`MessageChannel`].
#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
}

impl TelegramService {
    pub async fn new(token: String) -> AppResult<Self> {
        let bot = Bot::new(token);

        // Verify the bot token by getting bot info
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self { bot })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }
}

/// An unparseable chat id is an invalid recipient, reported like Telegram's
/// own "Bad Request".
fn parse_chat_id(chat_id: &str) -> Result<ChatId, ChannelError> {
    chat_id
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChannelError::Api {
            code: Some(400),
            description: format!("Bad Request: invalid chat id '{}'", chat_id),
            retry_after: None,
        })
}

fn render_keyboard(keyboard: &InlineKeyboard) -> Result<InlineKeyboardMarkup, ChannelError> {
    let mut rows = Vec::with_capacity(keyboard.rows.len());
    for row in &keyboard.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            let rendered = match &button.action {
                ButtonAction::Callback { data } => {
                    InlineKeyboardButton::callback(button.text.clone(), data.clone())
                }
                ButtonAction::Url { url } => {
                    let url = url::Url::parse(url)
                        .map_err(|e| ChannelError::Malformed(format!("button url: {}", e)))?;
                    InlineKeyboardButton::url(button.text.clone(), url)
                }
                ButtonAction::WebApp { url } => {
                    let url = url::Url::parse(url)
                        .map_err(|e| ChannelError::Malformed(format!("web app url: {}", e)))?;
                    InlineKeyboardButton::web_app(button.text.clone(), WebAppInfo { url })
                }
            };
            buttons.push(rendered);
        }
        rows.push(buttons);
    }
    Ok(InlineKeyboardMarkup::new(rows))
}

/// Derive an HTTP-style status from a Bot API error description.
///
/// Telegram prefixes descriptions with the status text
/// ("Forbidden: bot was blocked by the user", "Bad Request: chat not found").
pub fn api_error_code(description: &str) -> Option<u16> {
    let d = description.to_lowercase();
    let code = if d.contains("forbidden") {
        403
    } else if d.contains("bad request") {
        400
    } else if d.contains("too many requests") {
        429
    } else if d.contains("unauthorized") {
        401
    } else if d.contains("internal server error") {
        500
    } else if d.contains("bad gateway") {
        502
    } else if d.contains("service unavailable") {
        503
    } else if d.contains("gateway timeout") {
        504
    } else {
        return None;
    };
    Some(code)
}

/// Bad Request descriptions that blame the message rather than the chat.
const PAYLOAD_REJECTIONS: &[&str] = &[
    "can't parse entities",
    "message text is empty",
    "message is too long",
    "message caption is too long",
    "wrong file identifier",
    "wrong file id",
    "wrong remote file identifier",
    "wrong type of the web page content",
    "message to forward not found",
    "button_data_invalid",
    "button_url_invalid",
];

/// Whether Telegram rejected the content of the message. These must not
/// reflect on the recipient's reachability.
pub fn is_payload_rejection(description: &str) -> bool {
    let d = description.to_lowercase();
    PAYLOAD_REJECTIONS.iter().any(|needle| d.contains(needle))
}

impl From<RequestError> for ChannelError {
    fn from(err: RequestError) -> Self {
        let description = err.to_string();
        match &err {
            RequestError::Api(api) => {
                let api_description = api.to_string();
                if is_payload_rejection(&api_description) {
                    return ChannelError::Malformed(api_description);
                }
                ChannelError::Api {
                    code: api_error_code(&api_description),
                    description: api_description,
                    retry_after: None,
                }
            }
            RequestError::RetryAfter(secs) => ChannelError::Api {
                code: Some(429),
                description,
                retry_after: Some(*secs),
            },
            // The group became a supergroup; the stored chat id no longer works.
            RequestError::MigrateToChatId(_) => ChannelError::Api {
                code: Some(400),
                description,
                retry_after: None,
            },
            RequestError::Network(e) => {
                let kind = if e.is_timeout() {
                    TransportErrorKind::Timeout
                } else if e.is_connect() || description.to_lowercase().contains("reset") {
                    TransportErrorKind::ConnectionReset
                } else {
                    TransportErrorKind::Other
                };
                ChannelError::Transport {
                    kind,
                    message: description,
                }
            }
            _ => ChannelError::Transport {
                kind: TransportErrorKind::Other,
                message: description,
            },
        }
    }
}

#[async_trait]
impl MessageChannel for TelegramService {
    async fn send(&self, chat_id: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        let chat = parse_chat_id(chat_id)?;

        let result = match message {
            OutboundMessage::Text { text, keyboard } => {
                let mut request = self
                    .bot
                    .send_message(chat, text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(keyboard) = keyboard {
                    request = request.reply_markup(render_keyboard(keyboard)?);
                }
                request.await.map(|m| m.id)
            }
            OutboundMessage::Media { media_ref, caption } => {
                let mut request = self
                    .bot
                    .send_photo(chat, InputFile::file_id(media_ref.clone()))
                    .parse_mode(ParseMode::Html);
                if !caption.is_empty() {
                    request = request.caption(caption.clone());
                }
                request.await.map(|m| m.id)
            }
            OutboundMessage::Forward { source } => {
                let from = parse_chat_id(&source.chat_id)
                    .map_err(|_| ChannelError::Malformed("invalid source chat id".to_string()))?;
                self.bot
                    .forward_message(chat, from, MessageId(source.message_id))
                    .await
                    .map(|m| m.id)
            }
        };

        match result {
            Ok(message_id) => {
                tracing::debug!(
                    chat_id = chat_id,
                    message_id = message_id.0,
                    "Telegram message sent"
                );
                Ok(())
            }
            Err(e) => Err(ChannelError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::ApiError;

    use crate::services::channel::KeyboardButton;
    use crate::services::classifier::{classify, FailureClass};
    use crate::services::feedback::reachability_for;

    #[test]
    fn api_error_codes_follow_description_prefix() {
        assert_eq!(
            api_error_code("Forbidden: bot was blocked by the user"),
            Some(403)
        );
        assert_eq!(api_error_code("Bad Request: chat not found"), Some(400));
        assert_eq!(
            api_error_code("Unknown error: \"Too Many Requests: retry after 5\""),
            Some(429)
        );
        assert_eq!(api_error_code("Bad Gateway"), Some(502));
        assert_eq!(api_error_code("something odd"), None);
    }

    #[test]
    fn payload_rejections_are_malformed() {
        let err = ChannelError::from(RequestError::Api(ApiError::Unknown(
            "Bad Request: can't parse entities: Unsupported start tag \"b1\" at byte offset 0"
                .to_string(),
        )));
        assert!(matches!(err, ChannelError::Malformed(_)));

        let failure = classify(&err);
        assert_eq!(failure.class, FailureClass::Permanent);
        assert_eq!(failure.code, None);
        assert_eq!(reachability_for(&failure), None);

        // A chat-side Bad Request still counts against the recipient.
        let err = ChannelError::from(RequestError::Api(ApiError::Unknown(
            "Bad Request: chat not found".to_string(),
        )));
        assert_eq!(
            reachability_for(&classify(&err)),
            Some(crate::db::models::BotStatus::Inactive)
        );
    }

    #[test]
    fn retry_after_carries_the_requested_delay() {
        let err = ChannelError::from(RequestError::RetryAfter(
            std::time::Duration::from_secs(7),
        ));
        match err {
            ChannelError::Api {
                code, retry_after, ..
            } => {
                assert_eq!(code, Some(429));
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn invalid_chat_id_is_a_bad_request() {
        match parse_chat_id("@not-a-number") {
            Err(ChannelError::Api { code, .. }) => assert_eq!(code, Some(400)),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(parse_chat_id(" -1001234 ").unwrap(), ChatId(-1001234));
    }

    #[test]
    fn keyboard_renders_every_button() {
        let keyboard = InlineKeyboard {
            rows: vec![
                vec![KeyboardButton {
                    text: "Accept".to_string(),
                    action: ButtonAction::Callback {
                        data: "accept:1".to_string(),
                    },
                }],
                vec![KeyboardButton {
                    text: "Open".to_string(),
                    action: ButtonAction::WebApp {
                        url: "https://app.example.com/t/1".to_string(),
                    },
                }],
            ],
        };
        let markup = render_keyboard(&keyboard).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "Open");
    }
}
