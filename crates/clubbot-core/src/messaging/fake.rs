//! Recording messenger for tests. Enabled outside this crate by the
//! `test-util` feature.

use std::{collections::HashSet, path::Path, sync::Mutex};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Debug)]
pub struct SentText {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Clone, Debug)]
pub struct SentPhoto {
    pub chat_id: ChatId,
    pub photo: String,
    pub caption: String,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    texts: Mutex<Vec<SentText>>,
    photos: Mutex<Vec<SentPhoto>>,
    documents: Mutex<Vec<(ChatId, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    delete_attempts: Mutex<usize>,
    failing_chats: Mutex<HashSet<i64>>,
    fail_sends_after: Mutex<Option<usize>>,
    fail_deletes: Mutex<bool>,
    fail_photos: Mutex<bool>,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    fn check_send(&self, chat_id: ChatId) -> Result<()> {
        if self.failing_chats.lock().unwrap().contains(&chat_id.0) {
            return Err(Error::External(format!("chat {} blocked the bot", chat_id.0)));
        }
        if let Some(limit) = *self.fail_sends_after.lock().unwrap() {
            if self.texts.lock().unwrap().len() >= limit {
                return Err(Error::External("send failed".to_string()));
            }
        }
        Ok(())
    }

    pub fn fail_chat(&self, chat_id: i64) {
        self.failing_chats.lock().unwrap().insert(chat_id);
    }

    pub fn fail_sends_after(&self, n: usize) {
        *self.fail_sends_after.lock().unwrap() = Some(n);
    }

    pub fn fail_deletes(&self) {
        *self.fail_deletes.lock().unwrap() = true;
    }

    pub fn fail_photos(&self) {
        *self.fail_photos.lock().unwrap() = true;
    }

    pub fn sent_texts(&self) -> Vec<SentText> {
        self.texts.lock().unwrap().clone()
    }

    pub fn sent_photos(&self) -> Vec<SentPhoto> {
        self.photos.lock().unwrap().clone()
    }

    pub fn sent_documents(&self) -> Vec<(ChatId, String)> {
        self.documents.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn delete_attempts(&self) -> usize {
        *self.delete_attempts.lock().unwrap()
    }

    /// Messages sent to the chat and not deleted since.
    pub fn visible_texts(&self, chat_id: ChatId) -> Vec<SentText> {
        let deleted = self.deleted();
        self.sent_texts()
            .into_iter()
            .filter(|t| t.chat_id == chat_id)
            .filter(|t| {
                !deleted
                    .iter()
                    .any(|d| d.chat_id == t.chat_id && d.message_id == t.message_id)
            })
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
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
        self.check_send(chat_id)?;
        let msg = self.alloc(chat_id);
        self.texts.lock().unwrap().push(SentText {
            chat_id,
            message_id: msg.message_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(msg)
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: &str,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.check_send(chat_id)?;
        if *self.fail_photos.lock().unwrap() {
            return Err(Error::External("wrong file identifier".to_string()));
        }
        self.photos.lock().unwrap().push(SentPhoto {
            chat_id,
            photo: photo.to_string(),
            caption: caption.to_string(),
            keyboard,
        });
        Ok(self.alloc(chat_id))
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        _caption: &str,
    ) -> Result<MessageRef> {
        self.check_send(chat_id)?;
        self.documents
            .lock()
            .unwrap()
            .push((chat_id, path.display().to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        *self.delete_attempts.lock().unwrap() += 1;
        if *self.fail_deletes.lock().unwrap() {
            return Err(Error::External("message can't be deleted".to_string()));
        }
        self.deleted.lock().unwrap().push(msg);
        Ok(())
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}
