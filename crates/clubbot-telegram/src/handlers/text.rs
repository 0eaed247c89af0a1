use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use tracing::{debug, info, warn};

use clubbot_core::{domain::ChatId, store::blocking};

use super::profile_of;
use crate::router::AppState;

/// Entry path: register the sender if new, then reset the chat to Home.
///
/// Ordinary users never see an error from here.
pub(crate) async fn enter(msg: &Message, state: &AppState) {
    if let Some(user) = msg.from() {
        let profile = profile_of(user);
        let user_id = profile.user_id;
        let store = state.store.clone();
        match blocking(move || store.register_if_absent(&profile, Utc::now())).await {
            Ok(true) => info!(user_id, "New user registered"),
            Ok(false) => {}
            Err(e) => warn!(user_id, "User registration failed: {e}"),
        }
    }

    let chat_id = ChatId(msg.chat.id.0);
    if let Err(e) = state.navigator.reset(chat_id).await {
        debug!(chat_id = chat_id.0, "Home render failed: {e}");
    }
}

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> anyhow::Result<()> {
    enter(&msg, &state).await;
    Ok(())
}
