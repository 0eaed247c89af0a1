//! Sequential, paced fan-out of one message to every registered user.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info};

use crate::{domain::ChatId, messaging::port::MessagingPort};

pub const DEFAULT_PAUSE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastTally {
    pub sent: usize,
    pub failed: usize,
}

pub struct Broadcaster {
    messenger: Arc<dyn MessagingPort>,
    pause: Duration,
}

impl Broadcaster {
    pub fn new(messenger: Arc<dyn MessagingPort>, pause: Duration) -> Self {
        Self { messenger, pause }
    }

    /// Send `body` to each recipient in order.
    ///
    /// `recipients` is the snapshot taken when the job started. A failed
    /// send is counted and the run moves on; the pause applies after every
    /// attempt.
    pub async fn run(&self, recipients: &[ChatId], body: &str) -> BroadcastTally {
        let mut tally = BroadcastTally::default();
        info!(recipients = recipients.len(), "Broadcast started");

        for &chat_id in recipients {
            match self.messenger.send_text(chat_id, body, None).await {
                Ok(_) => tally.sent += 1,
                Err(e) => {
                    debug!(chat_id = chat_id.0, "Broadcast send failed: {e}");
                    tally.failed += 1;
                }
            }
            if !self.pause.is_zero() {
                sleep(self.pause).await;
            }
        }

        info!(sent = tally.sent, failed = tally.failed, "Broadcast finished");
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::fake::FakeMessenger;

    #[tokio::test]
    async fn counts_failures_and_keeps_going() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_chat(2);
        let b = Broadcaster::new(fake.clone(), Duration::ZERO);

        let tally = b.run(&[ChatId(1), ChatId(2), ChatId(3)], "hello").await;
        assert_eq!(tally, BroadcastTally { sent: 2, failed: 1 });

        let chats: Vec<_> = fake.sent_texts().iter().map(|t| t.chat_id).collect();
        assert_eq!(chats, vec![ChatId(1), ChatId(3)]);
    }

    #[tokio::test]
    async fn all_failing_recipients_report_zero_sent() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_sends_after(0);
        let b = Broadcaster::new(fake, Duration::ZERO);

        let recipients: Vec<_> = (1..=5).map(ChatId).collect();
        let tally = b.run(&recipients, "x").await;
        assert_eq!(tally, BroadcastTally { sent: 0, failed: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_after_every_attempt() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_chat(2);
        let b = Broadcaster::new(fake, Duration::from_millis(50));

        let start = tokio::time::Instant::now();
        b.run(&[ChatId(1), ChatId(2), ChatId(3), ChatId(4)], "x").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    }

    #[tokio::test]
    async fn empty_recipient_list_is_a_noop() {
        let fake = Arc::new(FakeMessenger::default());
        let b = Broadcaster::new(fake.clone(), DEFAULT_PAUSE);
        assert_eq!(b.run(&[], "x").await, BroadcastTally::default());
        assert!(fake.sent_texts().is_empty());
    }
}
