//! Daily backup scheduler.
//!
//! One cycle: sleep until the next `HH:MM` (UTC), snapshot the store, sweep
//! expired artifacts, optionally tell the admin, then wait a short buffer
//! before computing the next target.

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    backup::{ArtifactDir, SweepReport},
    domain::ChatId,
    messaging::port::MessagingPort,
    store::{blocking, UserStore},
};

pub const DEFAULT_BACKUP_TIME: &str = "03:00";

/// Keeps a cycle that finishes within the target minute from firing twice.
pub const CYCLE_BUFFER: Duration = Duration::from_secs(65);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackupSchedule {
    at: NaiveTime,
}

impl BackupSchedule {
    /// Strict `HH:MM` parse.
    pub fn parse(raw: &str) -> Option<Self> {
        let (h, m) = raw.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        let at = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
        Some(Self { at })
    }

    /// Parse, falling back to 03:00 on invalid input.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!("Invalid BACKUP_TIME {raw:?}, using {DEFAULT_BACKUP_TIME}");
            Self::default()
        })
    }

    pub fn time(&self) -> NaiveTime {
        self.at
    }

    /// The first target instant at or after `now`: today's unless it already passed.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today >= now {
            return today;
        }
        today + chrono::Duration::days(1)
    }
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            at: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl std::fmt::Display for BackupSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} UTC", self.at.format("%H:%M"))
    }
}

/// What one cycle managed to do. Either half may fail independently.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub snapshot: Option<PathBuf>,
    pub sweep: Option<SweepReport>,
}

pub struct BackupScheduler {
    schedule: BackupSchedule,
    store: Arc<UserStore>,
    artifacts: Arc<ArtifactDir>,
    retention: Duration,
    notify: Option<(Arc<dyn MessagingPort>, ChatId)>,
}

impl BackupScheduler {
    pub fn new(
        schedule: BackupSchedule,
        store: Arc<UserStore>,
        artifacts: Arc<ArtifactDir>,
        retention: Duration,
    ) -> Self {
        Self {
            schedule,
            store,
            artifacts,
            retention,
            notify: None,
        }
    }

    /// Send a short note to `chat` after every successful snapshot.
    pub fn with_notify(mut self, messenger: Arc<dyn MessagingPort>, chat: ChatId) -> Self {
        self.notify = Some((messenger, chat));
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(at = %self.schedule, "Backup scheduler started");
        loop {
            let now = Utc::now();
            let next = self.schedule.next_fire(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next backup at {}", next.format("%Y-%m-%d %H:%M:%S UTC"));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }

            self.run_cycle(Utc::now()).await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(CYCLE_BUFFER) => {}
            }
        }
        info!("Backup scheduler stopped");
    }

    /// Snapshot then sweep. Failures are logged; nothing here propagates.
    pub async fn run_cycle(&self, at: DateTime<Utc>) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();

        let store = self.store.clone();
        let artifacts = self.artifacts.clone();
        match blocking(move || artifacts.snapshot(&store, at)).await {
            Ok(path) => outcome.snapshot = Some(path),
            Err(e) => error!("Scheduled backup failed: {e}"),
        }

        let artifacts = self.artifacts.clone();
        let retention = self.retention;
        let now = std::time::SystemTime::from(at);
        match blocking(move || artifacts.sweep(retention, now)).await {
            Ok(report) => outcome.sweep = Some(report),
            Err(e) => error!("Retention sweep failed: {e}"),
        }

        if let (Some(path), Some((messenger, chat))) = (&outcome.snapshot, &self.notify) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let removed = outcome.sweep.as_ref().map(|s| s.removed.len()).unwrap_or(0);
            let note = format!("Daily backup saved: {name}\nExpired artifacts removed: {removed}");
            if let Err(e) = messenger.send_text(*chat, &note, None).await {
                warn!("Failed to notify admin about backup: {e}");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{messaging::fake::FakeMessenger, store::tests::tmp_dir};
    use chrono::TimeZone;

    #[test]
    fn parses_hh_mm_and_falls_back() {
        let s = BackupSchedule::parse("04:30").unwrap();
        assert_eq!(s.time(), NaiveTime::from_hms_opt(4, 30, 0).unwrap());
        assert_eq!(BackupSchedule::parse("7:05").unwrap().time().format("%H:%M").to_string(), "07:05");

        for bad in ["", "24:00", "12:60", "noon", "12:5", "1200"] {
            assert!(BackupSchedule::parse(bad).is_none(), "{bad:?} should be rejected");
        }
        assert_eq!(BackupSchedule::parse_or_default("25:99"), BackupSchedule::default());
        assert_eq!(BackupSchedule::default().to_string(), "03:00 UTC");
    }

    #[test]
    fn next_fire_is_today_before_target_and_tomorrow_after() {
        let s = BackupSchedule::parse("03:00").unwrap();

        let before = Utc.with_ymd_and_hms(2026, 5, 10, 2, 59, 0).unwrap();
        assert_eq!(s.next_fire(before), Utc.with_ymd_and_hms(2026, 5, 10, 3, 0, 0).unwrap());

        let after = Utc.with_ymd_and_hms(2026, 5, 10, 3, 0, 1).unwrap();
        assert_eq!(s.next_fire(after), Utc.with_ymd_and_hms(2026, 5, 11, 3, 0, 0).unwrap());

        let month_end = Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(s.next_fire(month_end), Utc.with_ymd_and_hms(2027, 1, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn target_instant_itself_is_the_next_fire() {
        let s = BackupSchedule::parse("03:00").unwrap();
        let exact = Utc.with_ymd_and_hms(2026, 5, 10, 3, 0, 0).unwrap();

        let next = s.next_fire(exact);
        assert_eq!(next, exact);
        assert!(next >= exact && next - exact < chrono::Duration::days(1));

        let after_buffer = exact + chrono::Duration::from_std(CYCLE_BUFFER).unwrap();
        assert_eq!(s.next_fire(after_buffer), exact + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn cycle_snapshots_sweeps_and_notifies() {
        let dir = tmp_dir("clubbot-scheduler-cycle");
        let store = Arc::new(UserStore::open(&dir.join("users.db")).unwrap());
        let artifacts = Arc::new(ArtifactDir::open(dir.join("backup")).unwrap());
        let messenger = Arc::new(FakeMessenger::default());

        let stale = dir.join("backup/users_backup_old.db");
        std::fs::write(&stale, b"x").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_000))
            .unwrap();

        let scheduler = BackupScheduler::new(
            BackupSchedule::default(),
            store,
            artifacts.clone(),
            Duration::from_secs(7 * 86_400),
        )
        .with_notify(messenger.clone(), ChatId(99));

        let outcome = scheduler.run_cycle(Utc::now()).await;
        assert!(outcome.snapshot.as_ref().unwrap().exists());
        assert_eq!(outcome.sweep.unwrap().removed, vec![stale.clone()]);
        assert!(!stale.exists());

        let notes = messenger.sent_texts();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].chat_id, ChatId(99));
        assert!(notes[0].text.contains("users_backup_"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_cycle_is_logged_and_quiet() {
        let dir = tmp_dir("clubbot-scheduler-fail");
        let store = Arc::new(UserStore::open(&dir.join("users.db")).unwrap());
        let artifacts = Arc::new(ArtifactDir::open(dir.join("backup")).unwrap());
        let messenger = Arc::new(FakeMessenger::default());
        std::fs::remove_dir_all(dir.join("backup")).unwrap();

        let scheduler = BackupScheduler::new(
            BackupSchedule::default(),
            store,
            artifacts,
            Duration::from_secs(86_400),
        )
        .with_notify(messenger.clone(), ChatId(99));

        let outcome = scheduler.run_cycle(Utc::now()).await;
        assert!(outcome.snapshot.is_none());
        assert!(outcome.sweep.is_none());
        assert!(messenger.sent_texts().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn run_exits_on_cancel() {
        let dir = tmp_dir("clubbot-scheduler-cancel");
        let store = Arc::new(UserStore::open(&dir.join("users.db")).unwrap());
        let artifacts = Arc::new(ArtifactDir::open(dir.join("backup")).unwrap());
        let scheduler =
            BackupScheduler::new(BackupSchedule::default(), store, artifacts, Duration::from_secs(1));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }
}
