//! Per-conversation record of the currently open UI block.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::port::MessagingPort,
    Result,
};

/// Which non-home view a block renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Menu,
    Contacts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenBlock {
    pub kind: BlockKind,
    pub ids: Vec<MessageId>,
}

/// Outcome of closing a block: one delete result per tracked message.
#[derive(Debug, Default)]
pub struct ClosedBlock {
    pub kind: Option<BlockKind>,
    pub outcomes: Vec<(MessageId, Result<()>)>,
}

impl ClosedBlock {
    /// Number of messages the close attempted to remove.
    pub fn closed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn deleted(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.closed() - self.deleted()
    }
}

/// Keyed store: conversation → open block.
///
/// Does not enforce exclusivity; `open` simply overwrites. Callers that want
/// one block at a time close first.
pub struct BlockTracker {
    messenger: Arc<dyn MessagingPort>,
    blocks: Mutex<HashMap<ChatId, OpenBlock>>,
}

impl BlockTracker {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            messenger,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Record `ids` as the open block, replacing whatever was recorded.
    pub async fn open(&self, chat_id: ChatId, kind: BlockKind, ids: Vec<MessageId>) {
        let mut blocks = self.blocks.lock().await;
        if ids.is_empty() {
            blocks.remove(&chat_id);
            return;
        }
        blocks.insert(chat_id, OpenBlock { kind, ids });
    }

    pub async fn current(&self, chat_id: ChatId) -> Option<OpenBlock> {
        self.blocks.lock().await.get(&chat_id).cloned()
    }

    /// Delete every tracked message, best-effort, and forget the block.
    ///
    /// The record is taken out before any delete runs, so it is cleared no
    /// matter how the deletes go and a concurrent `open` is not clobbered.
    pub async fn close(&self, chat_id: ChatId) -> ClosedBlock {
        let taken = { self.blocks.lock().await.remove(&chat_id) };
        let Some(block) = taken else {
            return ClosedBlock::default();
        };

        let mut outcomes = Vec::with_capacity(block.ids.len());
        for message_id in block.ids {
            let res = self
                .messenger
                .delete_message(MessageRef {
                    chat_id,
                    message_id,
                })
                .await;
            if let Err(e) = &res {
                debug!(chat_id = chat_id.0, message_id = message_id.0, "delete failed: {e}");
            }
            outcomes.push((message_id, res));
        }

        ClosedBlock {
            kind: Some(block.kind),
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::fake::FakeMessenger;

    fn ids(xs: &[i32]) -> Vec<MessageId> {
        xs.iter().copied().map(MessageId).collect()
    }

    #[tokio::test]
    async fn close_deletes_all_and_clears() {
        let fake = Arc::new(FakeMessenger::default());
        let tracker = BlockTracker::new(fake.clone());
        tracker.open(ChatId(1), BlockKind::Menu, ids(&[10, 11, 12])).await;

        let closed = tracker.close(ChatId(1)).await;
        assert_eq!(closed.closed(), 3);
        assert_eq!(closed.deleted(), 3);
        assert_eq!(closed.kind, Some(BlockKind::Menu));
        assert!(tracker.current(ChatId(1)).await.is_none());
        assert_eq!(fake.deleted().len(), 3);
    }

    #[tokio::test]
    async fn close_clears_even_when_every_delete_fails() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_deletes();
        let tracker = BlockTracker::new(fake.clone());
        tracker.open(ChatId(1), BlockKind::Contacts, ids(&[1, 2, 3, 4])).await;

        let closed = tracker.close(ChatId(1)).await;
        assert_eq!(closed.closed(), 4);
        assert_eq!(closed.failed(), 4);
        assert_eq!(fake.delete_attempts(), 4);
        assert!(tracker.current(ChatId(1)).await.is_none());
    }

    #[tokio::test]
    async fn open_overwrites_without_closing() {
        let fake = Arc::new(FakeMessenger::default());
        let tracker = BlockTracker::new(fake.clone());
        tracker.open(ChatId(1), BlockKind::Menu, ids(&[1, 2])).await;
        tracker.open(ChatId(1), BlockKind::Contacts, ids(&[3])).await;

        assert_eq!(fake.delete_attempts(), 0);
        assert_eq!(
            tracker.current(ChatId(1)).await,
            Some(OpenBlock {
                kind: BlockKind::Contacts,
                ids: ids(&[3]),
            })
        );
    }

    #[tokio::test]
    async fn conversations_are_independent() {
        let fake = Arc::new(FakeMessenger::default());
        let tracker = BlockTracker::new(fake.clone());
        tracker.open(ChatId(1), BlockKind::Menu, ids(&[1])).await;
        tracker.open(ChatId(2), BlockKind::Menu, ids(&[2])).await;

        tracker.close(ChatId(1)).await;
        assert!(tracker.current(ChatId(1)).await.is_none());
        assert!(tracker.current(ChatId(2)).await.is_some());
    }

    #[tokio::test]
    async fn closing_nothing_is_a_noop() {
        let fake = Arc::new(FakeMessenger::default());
        let tracker = BlockTracker::new(fake.clone());
        let closed = tracker.close(ChatId(9)).await;
        assert_eq!(closed.closed(), 0);
        assert_eq!(fake.delete_attempts(), 0);
    }
}
