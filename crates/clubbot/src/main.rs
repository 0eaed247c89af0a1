use std::sync::Arc;

use tracing::info;

use clubbot_core::{config::Config, store::UserStore};

#[tokio::main]
async fn main() -> Result<(), clubbot_core::Error> {
    clubbot_core::logging::init("clubbot")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(UserStore::open(&cfg.db_file)?);
    info!(
        users = store.count()?,
        backup_time = %cfg.backup_schedule,
        "Configuration loaded"
    );

    clubbot_telegram::router::run_polling(cfg, store).await
}
