use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::{prelude::*, types::Update};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clubbot_core::messaging::throttled::ThrottledMessenger;
use clubbot_core::{
    admin::AdminGate,
    audit::AuditLogger,
    backup::ArtifactDir,
    broadcast::Broadcaster,
    config::Config,
    errors::Error,
    messaging::port::MessagingPort,
    navigation::Navigator,
    scheduler::BackupScheduler,
    store::UserStore,
    supervisor::{PollSupervisor, UpdateSink},
};

use crate::handlers;
use crate::poller::TelegramPollSource;
use crate::TelegramMessenger;

/// Headroom between the long-poll timeout and the HTTP client timeout.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<UserStore>,
    pub artifacts: Arc<ArtifactDir>,
    pub messenger: Arc<dyn MessagingPort>,
    pub navigator: Arc<Navigator>,
    pub gate: AdminGate,
    pub broadcaster: Arc<Broadcaster>,
    pub audit: Arc<AuditLogger>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<UserStore>,
        artifacts: Arc<ArtifactDir>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            navigator: Arc::new(Navigator::new(
                messenger.clone(),
                cfg.message_chunk_size,
                cfg.screen.clone(),
            )),
            gate: AdminGate::new(cfg.admin_id),
            broadcaster: Arc::new(Broadcaster::new(messenger.clone(), cfg.broadcast_pause)),
            audit: Arc::new(AuditLogger::new(
                cfg.audit_log_path.clone(),
                cfg.audit_log_json,
            )),
            started_at: Utc::now(),
            cfg,
            store,
            artifacts,
            messenger,
        }
    }
}

/// Feeds polled updates into the handlers.
struct TelegramSink {
    bot: Bot,
    state: Arc<AppState>,
}

#[async_trait]
impl UpdateSink<Update> for TelegramSink {
    async fn handle(&self, update: Update) {
        let update_id = update.id;
        if let Err(e) = handlers::handle_update(self.bot.clone(), update, self.state.clone()).await {
            warn!(update_id, "Update handler failed: {e:#}");
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<UserStore>) -> clubbot_core::Result<()> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(cfg.poll_timeout + HTTP_TIMEOUT_MARGIN)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
    let bot = Bot::with_client(cfg.bot_token.clone(), client);

    match bot.get_me().await {
        Ok(me) => info!("Bot started: @{}", me.username()),
        Err(e) => warn!("getMe failed (continuing): {e}"),
    }
    info!("User store: {}", store.path().display());
    info!("Artifact dir: {}", cfg.backup_dir.display());
    if cfg.admin_id == 0 {
        warn!("ADMIN_ID not set; admin commands are disabled");
    } else {
        info!("Admin configured");
    }

    let artifacts = Arc::new(ArtifactDir::open(&cfg.backup_dir)?);

    // Menu blocks and broadcasts are the bursty paths; the adapter still retries once on 429.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(ThrottledMessenger::new(raw_messenger, cfg.throttle));
    info!(
        global_ms = cfg.throttle.global_min_interval.as_millis() as u64,
        per_chat_ms = cfg.throttle.per_chat_min_interval.as_millis() as u64,
        "Outbound throttle configured"
    );

    let state = Arc::new(AppState::new(
        cfg.clone(),
        store.clone(),
        artifacts.clone(),
        messenger.clone(),
    ));
    info!("Audit log: {}", state.audit.path().display());

    let cancel = CancellationToken::new();

    let mut scheduler =
        BackupScheduler::new(cfg.backup_schedule, store, artifacts, cfg.backup_retention);
    if cfg.backup_notify {
        if let Some(chat) = state.gate.admin_chat() {
            scheduler = scheduler.with_notify(messenger.clone(), chat);
        }
    }
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for ctrl-c: {e}"),
            }
        });
    }

    let source = TelegramPollSource::new(bot.clone(), cfg.poll_timeout);
    let sink = Arc::new(TelegramSink { bot, state });
    let supervisor = PollSupervisor::new(cfg.poll_backoff);
    let stats = supervisor.run(&source, sink, cancel.clone()).await;
    info!(
        updates = stats.updates,
        conflicts = stats.conflicts,
        "Polling stopped"
    );

    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Backup scheduler task failed: {e}");
    }
    Ok(())
}
