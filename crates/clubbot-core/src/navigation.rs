//! Home ⇄ Menu/Contacts navigation.
//!
//! Per conversation the view is derived from the [`BlockTracker`]: no open
//! block means Home. Opening a view closes whatever block was open first, and
//! Back tears the block down and re-renders Home. Concurrent presses from the
//! same chat are not sequenced here; the tracker's take-then-delete close makes
//! interleavings safe (last open or clear wins).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    blocks::{BlockKind, BlockTracker, ClosedBlock},
    dispatcher::MessageDispatcher,
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineButton, InlineKeyboard},
    },
    Result,
};

pub const CB_OPEN_MENU: &str = "open_menu";
pub const CB_OPEN_CONTACTS: &str = "open_contacts";
pub const CB_HOME: &str = "home";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Home,
    MenuOpen,
    ContactsOpen,
}

impl From<BlockKind> for View {
    fn from(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Menu => View::MenuOpen,
            BlockKind::Contacts => View::ContactsOpen,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavEvent {
    OpenMenu,
    OpenContacts,
    Back,
    Unknown(String),
}

impl NavEvent {
    pub fn from_callback(data: &str) -> Self {
        match data {
            CB_OPEN_MENU => NavEvent::OpenMenu,
            CB_OPEN_CONTACTS => NavEvent::OpenContacts,
            CB_HOME => NavEvent::Back,
            other => NavEvent::Unknown(other.to_string()),
        }
    }
}

/// Button labels for the navigable UI.
#[derive(Clone, Debug)]
pub struct ButtonLabels {
    pub menu: String,
    pub contacts: String,
    pub back: String,
}

/// Display copy for the three views.
#[derive(Clone, Debug)]
pub struct ScreenCopy {
    /// Welcome image: URL or transport file id. `None` renders text only.
    pub welcome_photo: Option<String>,
    pub welcome_title: String,
    pub menu_text: String,
    pub contacts_text: String,
    pub labels: ButtonLabels,
}

impl ScreenCopy {
    pub fn home_caption(&self) -> String {
        format!("{}\n\nChoose an option below:", self.welcome_title)
    }

    pub fn home_keyboard(&self) -> InlineKeyboard {
        InlineKeyboard::single_row(vec![
            InlineButton::new(self.labels.menu.clone(), CB_OPEN_MENU),
            InlineButton::new(self.labels.contacts.clone(), CB_OPEN_CONTACTS),
        ])
    }

    pub fn back_keyboard(&self) -> InlineKeyboard {
        InlineKeyboard::single_row(vec![InlineButton::new(self.labels.back.clone(), CB_HOME)])
    }
}

pub struct Navigator {
    messenger: Arc<dyn MessagingPort>,
    dispatcher: MessageDispatcher,
    blocks: BlockTracker,
    copy: ScreenCopy,
}

impl Navigator {
    pub fn new(messenger: Arc<dyn MessagingPort>, chunk_size: usize, copy: ScreenCopy) -> Self {
        Self {
            dispatcher: MessageDispatcher::new(messenger.clone(), chunk_size),
            blocks: BlockTracker::new(messenger.clone()),
            messenger,
            copy,
        }
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub async fn view(&self, chat_id: ChatId) -> View {
        match self.blocks.current(chat_id).await {
            Some(block) => block.kind.into(),
            None => View::Home,
        }
    }

    /// Entry point (fresh start command or free text): back to a clean Home.
    pub async fn reset(&self, chat_id: ChatId) -> Result<View> {
        self.blocks.close(chat_id).await;
        self.render_home(chat_id).await?;
        Ok(View::Home)
    }

    /// Apply a navigation event. `trigger` is the message carrying the pressed button.
    pub async fn handle(
        &self,
        chat_id: ChatId,
        event: NavEvent,
        trigger: Option<MessageRef>,
    ) -> Result<View> {
        match event {
            NavEvent::OpenMenu => self.open(chat_id, BlockKind::Menu).await,
            NavEvent::OpenContacts => self.open(chat_id, BlockKind::Contacts).await,
            NavEvent::Back => {
                let closed = self.blocks.close(chat_id).await;
                log_close(chat_id, &closed);
                if let Some(msg) = trigger {
                    let in_block = closed
                        .outcomes
                        .iter()
                        .any(|(id, _)| *id == msg.message_id);
                    if !in_block {
                        let _ = self.messenger.delete_message(msg).await;
                    }
                }
                self.render_home(chat_id).await?;
                Ok(View::Home)
            }
            NavEvent::Unknown(data) => {
                debug!(chat_id = chat_id.0, data = %data, "ignoring unknown navigation event");
                Ok(self.view(chat_id).await)
            }
        }
    }

    async fn open(&self, chat_id: ChatId, kind: BlockKind) -> Result<View> {
        let closed = self.blocks.close(chat_id).await;
        log_close(chat_id, &closed);

        let text = match kind {
            BlockKind::Menu => &self.copy.menu_text,
            BlockKind::Contacts => &self.copy.contacts_text,
        };
        match self
            .dispatcher
            .send_long(chat_id, text, Some(self.copy.back_keyboard()))
            .await
        {
            Ok(ids) => {
                self.blocks.open(chat_id, kind, ids).await;
                Ok(kind.into())
            }
            Err(partial) => {
                // Track what did arrive so Back can still clean it up.
                self.blocks.open(chat_id, kind, partial.delivered).await;
                Err(partial.source)
            }
        }
    }

    async fn render_home(&self, chat_id: ChatId) -> Result<MessageRef> {
        let caption = self.copy.home_caption();
        if let Some(photo) = self.copy.welcome_photo.as_deref() {
            match self
                .messenger
                .send_photo(chat_id, photo, &caption, Some(self.copy.home_keyboard()))
                .await
            {
                Ok(msg) => return Ok(msg),
                Err(e) => warn!(chat_id = chat_id.0, "welcome photo failed, sending text: {e}"),
            }
        }
        self.messenger
            .send_text(chat_id, &caption, Some(self.copy.home_keyboard()))
            .await
    }
}

fn log_close(chat_id: ChatId, closed: &ClosedBlock) {
    if closed.closed() > 0 {
        debug!(
            chat_id = chat_id.0,
            deleted = closed.deleted(),
            failed = closed.failed(),
            "closed open block"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::messaging::fake::FakeMessenger;

    fn copy(photo: Option<&str>) -> ScreenCopy {
        ScreenCopy {
            welcome_photo: photo.map(str::to_string),
            welcome_title: "Welcome".to_string(),
            menu_text: "m".repeat(25),
            contacts_text: "contacts".to_string(),
            labels: ButtonLabels {
                menu: "Menu".to_string(),
                contacts: "Contacts".to_string(),
                back: "Back".to_string(),
            },
        }
    }

    fn nav(fake: &Arc<FakeMessenger>, photo: Option<&str>) -> Navigator {
        Navigator::new(fake.clone(), 10, copy(photo))
    }

    #[test]
    fn callback_data_maps_to_events() {
        assert_eq!(NavEvent::from_callback("open_menu"), NavEvent::OpenMenu);
        assert_eq!(NavEvent::from_callback("open_contacts"), NavEvent::OpenContacts);
        assert_eq!(NavEvent::from_callback("home"), NavEvent::Back);
        assert_eq!(
            NavEvent::from_callback("askuser:1:2"),
            NavEvent::Unknown("askuser:1:2".to_string())
        );
    }

    #[tokio::test]
    async fn open_menu_then_back_removes_block_and_shows_home_once() {
        let fake = Arc::new(FakeMessenger::default());
        let nav = nav(&fake, Some("https://example.com/w.jpg"));
        let chat = ChatId(42);

        assert_eq!(nav.reset(chat).await.unwrap(), View::Home);
        assert_eq!(fake.sent_photos().len(), 1);

        assert_eq!(nav.handle(chat, NavEvent::OpenMenu, None).await.unwrap(), View::MenuOpen);
        let block = fake.visible_texts(chat);
        assert_eq!(block.len(), 3);
        assert_eq!(block[2].keyboard, Some(copy(None).back_keyboard()));

        let trigger = MessageRef {
            chat_id: chat,
            message_id: block[2].message_id,
        };
        let view = nav.handle(chat, NavEvent::Back, Some(trigger)).await.unwrap();
        assert_eq!(view, View::Home);
        assert!(fake.visible_texts(chat).is_empty());
        assert_eq!(fake.sent_photos().len(), 2);
        assert_eq!(nav.view(chat).await, View::Home);
    }

    #[tokio::test]
    async fn back_from_block_message_deletes_it_only_once() {
        let fake = Arc::new(FakeMessenger::default());
        let nav = nav(&fake, None);
        let chat = ChatId(6);

        nav.handle(chat, NavEvent::OpenMenu, None).await.unwrap();
        let block = fake.visible_texts(chat);
        let trigger = MessageRef {
            chat_id: chat,
            message_id: block[block.len() - 1].message_id,
        };
        nav.handle(chat, NavEvent::Back, Some(trigger)).await.unwrap();

        assert_eq!(fake.delete_attempts(), block.len());
        assert_eq!(fake.deleted().len(), block.len());
    }

    #[tokio::test]
    async fn back_from_foreign_message_deletes_the_trigger_too() {
        let fake = Arc::new(FakeMessenger::default());
        let nav = nav(&fake, None);
        let chat = ChatId(7);

        nav.handle(chat, NavEvent::OpenContacts, None).await.unwrap();
        let stale = MessageRef {
            chat_id: chat,
            message_id: MessageId(9_999),
        };
        nav.handle(chat, NavEvent::Back, Some(stale)).await.unwrap();

        assert_eq!(fake.delete_attempts(), 2);
        assert!(fake.deleted().contains(&stale));
    }

    #[tokio::test]
    async fn opening_a_view_closes_the_previous_block() {
        let fake = Arc::new(FakeMessenger::default());
        let nav = nav(&fake, None);
        let chat = ChatId(1);

        nav.handle(chat, NavEvent::OpenMenu, None).await.unwrap();
        let view = nav.handle(chat, NavEvent::OpenContacts, None).await.unwrap();

        assert_eq!(view, View::ContactsOpen);
        let visible = fake.visible_texts(chat);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].text, "contacts");
    }

    #[tokio::test]
    async fn back_still_resets_when_deletes_fail() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_deletes();
        let nav = nav(&fake, None);
        let chat = ChatId(3);

        nav.handle(chat, NavEvent::OpenMenu, None).await.unwrap();
        let view = nav.handle(chat, NavEvent::Back, None).await.unwrap();

        assert_eq!(view, View::Home);
        assert_eq!(nav.view(chat).await, View::Home);
        let homes = fake
            .sent_texts()
            .into_iter()
            .filter(|t| t.keyboard == Some(copy(None).home_keyboard()))
            .count();
        assert_eq!(homes, 1);
    }

    #[tokio::test]
    async fn unknown_event_is_a_noop() {
        let fake = Arc::new(FakeMessenger::default());
        let nav = nav(&fake, None);
        let chat = ChatId(5);
        nav.handle(chat, NavEvent::OpenContacts, None).await.unwrap();
        let before = fake.sent_texts().len();

        let view = nav
            .handle(chat, NavEvent::Unknown("zzz".to_string()), None)
            .await
            .unwrap();

        assert_eq!(view, View::ContactsOpen);
        assert_eq!(fake.sent_texts().len(), before);
        assert_eq!(fake.delete_attempts(), 0);
    }

    #[tokio::test]
    async fn partial_delivery_is_still_tracked_for_cleanup() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_sends_after(2);
        let nav = nav(&fake, None);
        let chat = ChatId(8);

        assert!(nav.handle(chat, NavEvent::OpenMenu, None).await.is_err());
        let block = nav.blocks.current(chat).await.unwrap();
        assert_eq!(block.ids.len(), 2);
    }

    #[tokio::test]
    async fn photo_failure_falls_back_to_text_home() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_photos();
        let nav = nav(&fake, Some("not-a-photo"));

        nav.reset(ChatId(10)).await.unwrap();

        assert!(fake.sent_photos().is_empty());
        let sent = fake.sent_texts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Welcome\n\nChoose an option below:");
        assert_eq!(sent[0].keyboard, Some(copy(None).home_keyboard()));
    }
}
