//! Telegram adapter (teloxide).
//!
//! Implements the core `MessagingPort` and `UpdateSource` over the Bot API,
//! plus the update handlers and process wiring.

use std::path::Path;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod poller;
pub mod router;

use clubbot_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Map a teloxide error into the core error. A competing `getUpdates`
/// consumer becomes [`Error::Conflict`].
pub fn map_request_error(e: RequestError) -> Error {
    match e {
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => {
            Error::Conflict("terminated by other getUpdates request".to_string())
        }
        other => Error::External(format!("telegram error: {other}")),
    }
}

pub(crate) fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

pub(crate) fn to_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// `http(s)://` references are fetched by Telegram; anything else is a file id.
pub(crate) fn photo_input(photo: &str) -> InputFile {
    if photo.starts_with("http://") || photo.starts_with("https://") {
        if let Ok(url) = reqwest::Url::parse(photo) {
            return InputFile::url(url);
        }
    }
    InputFile::file_id(photo.to_string())
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn msg_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    warn!(retry_after_secs = d.as_secs(), "Telegram flood control, retrying once");
                    sleep(d).await;
                }
                Err(other) => return Err(map_request_error(other)),
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: 4096,
        }
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(to_markup);
        let msg = self
            .with_retry(|| {
                let req = self.bot.send_message(tg_chat(chat_id), text.to_string());
                match &markup {
                    Some(m) => req.reply_markup(m.clone()),
                    None => req,
                }
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: &str,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(to_markup);
        let msg = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_photo(tg_chat(chat_id), photo_input(photo))
                    .caption(caption.to_string());
                match &markup {
                    Some(m) => req.reply_markup(m.clone()),
                    None => req,
                }
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_document(tg_chat(chat_id), InputFile::file(path.to_path_buf()))
                    .caption(caption.to_string())
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clubbot_core::messaging::types::InlineButton;

    #[test]
    fn conflict_maps_to_core_conflict() {
        let e = map_request_error(RequestError::Api(ApiError::TerminatedByOtherGetUpdates));
        assert!(e.is_conflict());

        let e = map_request_error(RequestError::Api(ApiError::MessageToDeleteNotFound));
        assert!(matches!(e, Error::External(_)));
    }

    #[test]
    fn keyboard_rows_are_preserved() {
        let kb = InlineKeyboard::new(vec![
            vec![InlineButton::new("Menu", "open_menu"), InlineButton::new("Contacts", "open_contacts")],
            vec![InlineButton::new("Back", "home")],
        ]);
        let markup = to_markup(kb);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "Back");
    }

    #[test]
    fn photo_reference_kinds() {
        let url = photo_input("https://example.com/a.jpg");
        assert!(format!("{url:?}").contains("example.com"));
        let id = photo_input("AgACAgQAAxkBAAIB");
        assert!(format!("{id:?}").contains("AgACAgQAAxkBAAIB"));
    }
}
