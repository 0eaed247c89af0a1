use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, warn};

use clubbot_core::{
    domain::{ChatId, MessageId, MessageRef},
    navigation::NavEvent,
};

use crate::router::AppState;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> anyhow::Result<()> {
    // Answer first so the client stops its spinner.
    if let Err(e) = state.messenger.answer_callback_query(&q.id, None).await {
        debug!("answerCallbackQuery failed: {e}");
    }

    let Some(msg) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = ChatId(msg.chat.id.0);
    let trigger = MessageRef {
        chat_id,
        message_id: MessageId(msg.id.0),
    };
    let event = NavEvent::from_callback(q.data.as_deref().unwrap_or_default());

    if let Err(e) = state.navigator.handle(chat_id, event, Some(trigger)).await {
        warn!(chat_id = chat_id.0, "Navigation failed: {e}");
    }
    Ok(())
}
