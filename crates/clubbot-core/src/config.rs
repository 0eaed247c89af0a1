use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::warn;

use crate::{
    dispatcher::{SAFE_CHUNK_LEN, TRANSPORT_MAX_LEN},
    errors::Error,
    messaging::throttled::ThrottleConfig,
    navigation::{ButtonLabels, ScreenCopy},
    scheduler::BackupSchedule,
    Result,
};

const DEFAULT_WELCOME_PHOTO: &str =
    "https://i.postimg.cc/D0JhvYfw/1230-DD1-F-7504-4131-8-F96-FA4398-A29-B39.jpg";
const DEFAULT_WELCOME_TITLE: &str = "WELCOME TO THE CLUB";
const DEFAULT_MENU_TEXT: &str = "#MENU (default)\nSet the menu text with the MENU_TEXT environment variable.";
const DEFAULT_CONTACTS_TEXT: &str =
    "Contacts (default)\nSet the contacts text with the CONTACTS_TEXT environment variable.";

/// Typed runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    /// `0` means no admin.
    pub admin_id: i64,

    // Storage
    pub db_file: PathBuf,
    pub backup_dir: PathBuf,

    // Backups
    pub backup_schedule: BackupSchedule,
    pub backup_retention: Duration,
    pub backup_notify: bool,

    // Display
    pub screen: ScreenCopy,
    pub message_chunk_size: usize,

    // Transport
    pub throttle: ThrottleConfig,
    pub broadcast_pause: Duration,
    pub poll_timeout: Duration,
    pub poll_backoff: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    /// Read `.env` (if present) into the environment, then parse the environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let text = |key: &str, default: &str| {
            get(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bot_token = get("BOT_TOKEN").unwrap_or_default();
        if bot_token.is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_id = match get("ADMIN_ID").filter(|v| !v.is_empty()) {
            None => 0,
            Some(raw) => raw.parse::<i64>().unwrap_or_else(|_| {
                warn!("ADMIN_ID {raw:?} is not a number; admin commands disabled");
                0
            }),
        };

        let db_file = get("DB_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/users.db"));
        let backup_dir = get("BACKUP_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./backup"));

        let backup_schedule = match get("BACKUP_TIME").filter(|v| !v.is_empty()) {
            Some(raw) => BackupSchedule::parse_or_default(&raw),
            None => BackupSchedule::default(),
        };
        let retention_days = parse_or(&get, "BACKUP_RETENTION_DAYS", 7u64);
        let backup_notify = get("BACKUP_NOTIFY")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);

        // An explicitly empty WELCOME_PHOTO_URL disables the photo.
        let welcome_photo = match get("WELCOME_PHOTO_URL") {
            None => Some(DEFAULT_WELCOME_PHOTO.to_string()),
            Some(v) if v.is_empty() => None,
            Some(v) => Some(v),
        };
        let screen = ScreenCopy {
            welcome_photo,
            welcome_title: text("WELCOME_TITLE", DEFAULT_WELCOME_TITLE),
            menu_text: text("MENU_TEXT", DEFAULT_MENU_TEXT),
            contacts_text: text("CONTACTS_TEXT", DEFAULT_CONTACTS_TEXT),
            labels: ButtonLabels {
                menu: text("BTN_MENU", "📖 Menu"),
                contacts: text("BTN_CONTACTS", "📲 Contacts"),
                back: text("BTN_BACK", "⬅️ Back"),
            },
        };

        let message_chunk_size =
            parse_or(&get, "MESSAGE_CHUNK_SIZE", SAFE_CHUNK_LEN).clamp(1, TRANSPORT_MAX_LEN);

        let throttle_defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            global_min_interval: Duration::from_millis(parse_or(
                &get,
                "GLOBAL_MIN_INTERVAL_MS",
                throttle_defaults.global_min_interval.as_millis() as u64,
            )),
            per_chat_min_interval: Duration::from_millis(parse_or(
                &get,
                "PER_CHAT_MIN_INTERVAL_MS",
                throttle_defaults.per_chat_min_interval.as_millis() as u64,
            )),
        };

        let audit_log_path = get("AUDIT_LOG_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| backup_dir.join("admin-audit.log"));
        let audit_log_json = get("AUDIT_LOG_JSON")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);

        Ok(Self {
            bot_token,
            admin_id,
            db_file,
            backup_dir,
            backup_schedule,
            backup_retention: Duration::from_secs(retention_days.saturating_mul(86_400)),
            backup_notify,
            screen,
            message_chunk_size,
            throttle,
            broadcast_pause: Duration::from_millis(parse_or(&get, "BROADCAST_PAUSE_MS", 50)),
            poll_timeout: Duration::from_secs(parse_or(&get, "POLL_TIMEOUT_SECS", 10)),
            poll_backoff: Duration::from_secs(parse_or(&get, "POLL_BACKOFF_SECS", 10)),
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn retention_days(&self) -> u64 {
        self.backup_retention.as_secs() / 86_400
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(key).filter(|v| !v.is_empty()) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{key}={raw:?} is invalid; using the default");
            default
        }),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // existing environment wins
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }
        out.push((key.to_string(), val.replace("\\n", "\n")));
    }
    out
}
