//! `getUpdates` long polling as a core [`UpdateSource`].

use std::time::Duration;

use async_trait::async_trait;
use teloxide::{prelude::*, types::Update};

use clubbot_core::{
    errors::Error,
    supervisor::{Polled, UpdateSource},
    Result,
};

use crate::map_request_error;

pub struct TelegramPollSource {
    bot: Bot,
    timeout: Duration,
}

impl TelegramPollSource {
    /// `timeout` must stay below the HTTP client's own request timeout.
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }
}

#[async_trait]
impl UpdateSource for TelegramPollSource {
    type Update = Update;

    async fn reset(&self) -> Result<()> {
        self.bot
            .delete_webhook()
            .drop_pending_updates(true)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn poll(&self, offset: Option<i64>) -> Result<Vec<Polled<Update>>> {
        let secs = u32::try_from(self.timeout.as_secs()).unwrap_or(u32::MAX);
        let mut req = self.bot.get_updates().timeout(secs);
        if let Some(offset) = offset {
            let offset = i32::try_from(offset)
                .map_err(|_| Error::External(format!("update offset out of range: {offset}")))?;
            req = req.offset(offset);
        }

        let updates = req.await.map_err(map_request_error)?;
        Ok(updates
            .into_iter()
            .map(|update| Polled {
                update_id: i64::from(update.id),
                update,
            })
            .collect())
    }
}
