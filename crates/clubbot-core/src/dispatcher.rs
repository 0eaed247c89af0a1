//! Long-text delivery: split into transport-safe chunks, send in order.

use std::sync::Arc;

use tracing::debug;

use crate::{
    domain::{ChatId, MessageId},
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
};

/// Hard per-message ceiling of the Telegram Bot API (characters).
pub const TRANSPORT_MAX_LEN: usize = 4096;

/// Default chunk size, leaving headroom under [`TRANSPORT_MAX_LEN`].
pub const SAFE_CHUNK_LEN: usize = 3800;

/// A send failed after some chunks were already delivered.
///
/// `delivered` holds the ids that made it, in send order, so callers can still
/// track (and later clean up) the partial block.
#[derive(Debug, thiserror::Error)]
#[error("delivered {} of {total} chunks: {source}", .delivered.len())]
pub struct PartialDelivery {
    pub delivered: Vec<MessageId>,
    pub total: usize,
    #[source]
    pub source: Error,
}

/// Split `text` into pieces of at most `size` characters.
///
/// Splits on char boundaries only; concatenating the pieces yields `text`.
pub fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0usize;
    let mut count = 0usize;

    for (idx, _) in text.char_indices() {
        if count == size {
            out.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

#[derive(Clone)]
pub struct MessageDispatcher {
    messenger: Arc<dyn MessagingPort>,
    chunk_size: usize,
}

impl MessageDispatcher {
    /// `chunk_size` is clamped to the messenger's per-message limit.
    pub fn new(messenger: Arc<dyn MessagingPort>, chunk_size: usize) -> Self {
        let max = messenger.capabilities().max_message_len.max(1);
        Self {
            messenger,
            chunk_size: chunk_size.clamp(1, max),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Send `text` as ordered chunks; `trailing` rides on the last chunk only.
    ///
    /// Returns the ids of every message sent. Empty text sends nothing.
    pub async fn send_long(
        &self,
        chat_id: ChatId,
        text: &str,
        trailing: Option<InlineKeyboard>,
    ) -> std::result::Result<Vec<MessageId>, PartialDelivery> {
        let chunks = chunk_text(text, self.chunk_size);
        let total = chunks.len();
        let mut delivered = Vec::with_capacity(total);
        let mut trailing = trailing;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let keyboard = if idx + 1 == total { trailing.take() } else { None };
            match self.messenger.send_text(chat_id, chunk, keyboard).await {
                Ok(msg) => delivered.push(msg.message_id),
                Err(source) => {
                    return Err(PartialDelivery {
                        delivered,
                        total,
                        source,
                    })
                }
            }
        }

        debug!(chat_id = chat_id.0, chunks = total, "long text delivered");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{fake::FakeMessenger, types::InlineButton};

    fn back_keyboard() -> InlineKeyboard {
        InlineKeyboard::single_row(vec![InlineButton::new("Back", "home")])
    }

    #[test]
    fn chunk_count_is_ceiling_and_pieces_rejoin() {
        for (len, size) in [(0usize, 10usize), (1, 10), (10, 10), (11, 10), (9999, 3800)] {
            let text = "x".repeat(len);
            let chunks = chunk_text(&text, size);
            assert_eq!(chunks.len(), len.div_ceil(size), "len={len} size={size}");
            assert!(chunks.iter().all(|c| c.chars().count() <= size));
            assert_eq!(chunks.concat(), text);
        }
    }

    #[test]
    fn chunking_counts_characters_not_bytes() {
        let text = "àèìòù".repeat(3);
        let chunks = chunk_text(&text, 4);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], "àèìò");
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn empty_text_sends_nothing() {
        let fake = Arc::new(FakeMessenger::default());
        let d = MessageDispatcher::new(fake.clone(), SAFE_CHUNK_LEN);

        let ids = d.send_long(ChatId(1), "", Some(back_keyboard())).await.unwrap();
        assert!(ids.is_empty());
        assert!(fake.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn trailing_controls_ride_on_last_chunk_only() {
        let fake = Arc::new(FakeMessenger::default());
        let d = MessageDispatcher::new(fake.clone(), 5);

        let ids = d
            .send_long(ChatId(7), "abcdefghijkl", Some(back_keyboard()))
            .await
            .unwrap();

        let sent = fake.sent_texts();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            vec!["abcde", "fghij", "kl"]
        );
        assert!(sent[0].keyboard.is_none());
        assert!(sent[1].keyboard.is_none());
        assert_eq!(sent[2].keyboard, Some(back_keyboard()));
        assert_eq!(
            ids,
            sent.iter().map(|s| s.message_id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn failure_reports_chunks_already_sent() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_sends_after(2);
        let d = MessageDispatcher::new(fake.clone(), 3);

        let err = d
            .send_long(ChatId(1), "aaabbbcccddd", None)
            .await
            .unwrap_err();

        assert_eq!(err.total, 4);
        assert_eq!(err.delivered.len(), 2);
        assert_eq!(fake.sent_texts().len(), 2);
    }

    #[test]
    fn chunk_size_is_clamped_to_transport_limit() {
        let fake = Arc::new(FakeMessenger::default());
        assert_eq!(MessageDispatcher::new(fake.clone(), 10_000).chunk_size(), 4096);
        assert_eq!(MessageDispatcher::new(fake, 0).chunk_size(), 1);
    }
}
