//! Telegram update handlers.
//!
//! Commands (text or document caption starting with `/`) go to
//! [`commands`], other text resets the chat to Home, button presses go to
//! the navigator. Everything else is ignored.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{Chat, Update, UpdateKind, User},
};

use clubbot_core::{
    domain::{ChatKind, UserId},
    store::UserProfile,
};

use crate::router::AppState;

mod callback;
mod commands;
mod document;
mod text;

pub async fn handle_update(bot: Bot, update: Update, state: Arc<AppState>) -> anyhow::Result<()> {
    match update.kind {
        UpdateKind::Message(msg) => handle_message(bot, msg, state).await,
        UpdateKind::CallbackQuery(q) => callback::handle_callback(q, state).await,
        _ => Ok(()),
    }
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> anyhow::Result<()> {
    let is_command = msg
        .text()
        .or_else(|| msg.caption())
        .map(|t| t.trim_start().starts_with('/'))
        .unwrap_or(false);
    if is_command {
        return commands::handle_command(bot, msg, state).await;
    }

    if msg.text().is_some() {
        return text::handle_text(msg, state).await;
    }

    Ok(())
}

pub(crate) fn sender_id(user: Option<&User>) -> Option<UserId> {
    user.map(|u| UserId(u.id.0 as i64))
}

pub(crate) fn chat_kind(chat: &Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else {
        ChatKind::Shared
    }
}

pub(crate) fn profile_of(user: &User) -> UserProfile {
    UserProfile {
        user_id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
    }
}
