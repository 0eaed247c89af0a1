use std::{fmt::Write as _, path::Path, sync::Arc};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use teloxide::{prelude::*, types::Document};
use tracing::warn;

use clubbot_core::{
    admin::{guard, AdminCapability, GatePolicy},
    audit::{truncate_text, AuditEvent},
    backup::ArtifactInfo,
    domain::{ChatId, ChatKind, UserId},
    export::{write_export, ExportFormat},
    store::{blocking, UserRecord},
};

use super::{chat_kind, document, sender_id, text};
use crate::router::AppState;

const LIST_LIMIT: usize = 100;
const STATUS_ARTIFACTS: usize = 5;

const EXPORT_USAGE: &str = "Usage: /export [csv|tsv|json]";
const BROADCAST_USAGE: &str = "Usage: /broadcast <text>";
const RESTORE_USAGE: &str =
    "Send a .db backup with /restore as its caption, or reply /restore to one.";

pub(crate) fn parse_command(text: &str) -> (String, String) {
    // `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn is_admin_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "list" | "export" | "backup" | "backup_db" | "broadcast" | "restore" | "adminstatus"
    )
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> anyhow::Result<()> {
    let raw = msg.text().or_else(|| msg.caption()).unwrap_or("").to_string();
    let (cmd, args) = parse_command(&raw);
    let chat = ChatId(msg.chat.id.0);

    match cmd.as_str() {
        "start" => text::enter(&msg, &state).await,
        "whoami" => {
            let actor = sender_id(msg.from());
            let reply = format!(
                "ID: {}\nAdmin: {}",
                actor.map(|a| a.0.to_string()).unwrap_or_else(|| "-".to_string()),
                if state.gate.is_admin(actor) { "yes" } else { "no" }
            );
            state.messenger.send_text(chat, &reply, None).await?;
        }
        "users" | "utenti" => {
            let store = state.store.clone();
            let n = blocking(move || store.count()).await?;
            state
                .messenger
                .send_text(chat, &format!("👥 Registered users: {n}"), None)
                .await?;
        }
        "status" => {
            let reply = format!(
                "✅ Bot online\n⏱ Uptime: {}\n🗂 Store: {}\n📦 Backups: {}",
                format_duration((Utc::now() - state.started_at).num_seconds()),
                state.store.path().display(),
                state.artifacts.root().display()
            );
            state.messenger.send_text(chat, &reply, None).await?;
        }
        c if is_admin_command(c) => {
            let user = msg.from();
            let request = AdminRequest {
                actor: sender_id(user),
                username: user.and_then(|u| u.username.clone()),
                chat: chat_kind(&msg.chat),
                cmd: c,
                args: &args,
                upload: document::restore_source(&msg),
            };
            admin(&bot, request, &state).await
        }
        _ => text::enter(&msg, &state).await,
    }
    Ok(())
}

/// A privileged command as seen by the gate.
struct AdminRequest<'a> {
    actor: Option<UserId>,
    username: Option<String>,
    chat: ChatKind,
    cmd: &'a str,
    args: &'a str,
    /// Document attached to the command or to the message it replies to.
    upload: Option<&'a Document>,
}

/// Gate, run, audit. Denied attempts produce no chat output.
async fn admin(bot: &Bot, req: AdminRequest<'_>, state: &AppState) {
    let outcome = guard(
        &state.gate,
        req.actor,
        req.chat,
        GatePolicy::PrivateOnly,
        |cap| run_admin(bot, &req, state, cap),
    )
    .await;

    let mut event = AuditEvent::admin_command(
        req.actor.map(|a| a.0),
        req.username.as_deref(),
        req.cmd,
        req.args,
        outcome.is_some(),
    );
    if let Some(result) = outcome {
        event = event.with_outcome(result);
    }
    if let Err(e) = state.audit.write(event) {
        warn!("Failed to write audit event: {e}");
    }
}

async fn run_admin(
    bot: &Bot,
    req: &AdminRequest<'_>,
    state: &AppState,
    cap: AdminCapability,
) -> Result<String, String> {
    let chat = cap.chat();
    let cmd = req.cmd;
    let res = match cmd {
        "list" => list_users(state, chat).await,
        "export" => export_users(state, chat, req.args).await,
        "backup" | "backup_db" => backup_now(state, chat).await,
        "broadcast" => broadcast(state, chat, req.args).await,
        "restore" => restore(bot, req.upload, state, chat).await,
        "adminstatus" => admin_status(state, chat).await,
        other => Ok(format!("ignored /{other}")),
    };

    match res {
        Ok(summary) => Ok(summary),
        Err(e) => {
            let reason = truncate_text(&format!("{e:#}"), 300);
            warn!(command = cmd, "Admin command failed: {reason}");
            let note = format!("❌ {} failed: {reason}", operation_label(cmd));
            if let Err(send_err) = state.messenger.send_text(chat, &note, None).await {
                warn!("Failed to report admin error: {send_err}");
            }
            Err(reason)
        }
    }
}

fn operation_label(cmd: &str) -> &'static str {
    match cmd {
        "list" => "List",
        "export" => "Export",
        "backup" | "backup_db" => "Backup",
        "broadcast" => "Broadcast",
        "restore" => "Restore",
        "adminstatus" => "Status",
        _ => "Command",
    }
}

async fn list_users(state: &AppState, chat: ChatId) -> anyhow::Result<String> {
    let store = state.store.clone();
    let users = blocking(move || store.recent(LIST_LIMIT)).await?;
    let body = format_user_list(&users);
    state
        .navigator
        .dispatcher()
        .send_long(chat, &body, None)
        .await?;
    Ok(format!("listed {} users", users.len()))
}

async fn export_users(state: &AppState, chat: ChatId, args: &str) -> anyhow::Result<String> {
    let Ok(format) = args.parse::<ExportFormat>() else {
        state.messenger.send_text(chat, EXPORT_USAGE, None).await?;
        return Ok("usage".to_string());
    };

    let store = state.store.clone();
    let path = state.artifacts.export_path(Utc::now(), format);
    let target = path.clone();
    let rows = blocking(move || {
        let users = store.all()?;
        write_export(&target, format, &users)
    })
    .await?;

    let caption = format!("User export ({}, {rows} rows)", format.extension().to_uppercase());
    state.messenger.send_document(chat, &path, &caption).await?;
    Ok(format!("exported {rows} rows to {}", file_name(&path)))
}

async fn backup_now(state: &AppState, chat: ChatId) -> anyhow::Result<String> {
    let store = state.store.clone();
    let artifacts = state.artifacts.clone();
    let path = blocking(move || artifacts.snapshot(&store, Utc::now())).await?;

    let name = file_name(&path);
    state
        .messenger
        .send_document(chat, &path, &format!("Backup created: {name}"))
        .await?;
    Ok(format!("backup {name}"))
}

async fn broadcast(state: &AppState, chat: ChatId, body: &str) -> anyhow::Result<String> {
    if body.trim().is_empty() {
        state.messenger.send_text(chat, BROADCAST_USAGE, None).await?;
        return Ok("usage".to_string());
    }

    // Private chat id == user id on Telegram.
    let store = state.store.clone();
    let recipients: Vec<ChatId> = blocking(move || store.recipient_ids())
        .await?
        .into_iter()
        .map(|u| ChatId(u.0))
        .collect();

    state
        .messenger
        .send_text(
            chat,
            &format!("📣 Broadcasting to {} recipients…", recipients.len()),
            None,
        )
        .await?;

    let tally = state.broadcaster.run(&recipients, body).await;
    let summary = format!("sent {}, failed {}", tally.sent, tally.failed);
    state
        .messenger
        .send_text(
            chat,
            &format!("✅ Broadcast finished.\nSent: {}\nFailed: {}", tally.sent, tally.failed),
            None,
        )
        .await?;
    Ok(summary)
}

async fn restore(
    bot: &Bot,
    upload: Option<&Document>,
    state: &AppState,
    chat: ChatId,
) -> anyhow::Result<String> {
    let Some(doc) = upload else {
        state.messenger.send_text(chat, RESTORE_USAGE, None).await?;
        return Ok("usage".to_string());
    };
    if !document::is_db_upload(doc.file_name.as_deref()) {
        state.messenger.send_text(chat, RESTORE_USAGE, None).await?;
        return Ok("rejected non-.db upload".to_string());
    }

    let staged = document::staging_path(state.artifacts.root());
    document::download_document(bot, doc, &staged)
        .await
        .context("download failed")?;

    let store = state.store.clone();
    let artifacts = state.artifacts.clone();
    let upload = staged.clone();
    let result = blocking(move || artifacts.restore(&store, &upload, Utc::now())).await;

    if let Err(e) = tokio::fs::remove_file(&staged).await {
        warn!("Failed to remove staged upload {}: {e}", staged.display());
    }

    let report = result.context("current data left untouched")?;
    state
        .messenger
        .send_text(
            chat,
            &format!(
                "♻️ Restored {} users.\nSafety backup: {}",
                report.restored,
                file_name(&report.safety_backup)
            ),
            None,
        )
        .await?;
    Ok(format!("restored {} rows", report.restored))
}

async fn admin_status(state: &AppState, chat: ChatId) -> anyhow::Result<String> {
    let store = state.store.clone();
    let artifacts = state.artifacts.clone();
    let (count, latest) = blocking(move || Ok((store.count()?, artifacts.list(STATUS_ARTIFACTS)?))).await?;

    let now = Utc::now();
    let report = StatusReport {
        users: count,
        store_path: state.store.path(),
        store_bytes: std::fs::metadata(state.store.path()).map(|m| m.len()).ok(),
        artifact_dir: state.artifacts.root(),
        retention_days: state.cfg.retention_days(),
        next_backup: state.cfg.backup_schedule.next_fire(now),
        uptime_secs: (now - state.started_at).num_seconds(),
        latest: &latest,
    };
    state.messenger.send_text(chat, &report.render(), None).await?;
    Ok(format!("{count} users"))
}

struct StatusReport<'a> {
    users: u64,
    store_path: &'a Path,
    store_bytes: Option<u64>,
    artifact_dir: &'a Path,
    retention_days: u64,
    next_backup: DateTime<Utc>,
    uptime_secs: i64,
    latest: &'a [ArtifactInfo],
}

impl StatusReport<'_> {
    fn render(&self) -> String {
        let mut out = String::from("🛠 Admin status\n\n");
        let _ = writeln!(out, "👥 Users: {}", self.users);
        let _ = write!(out, "🗂 Store: {}", self.store_path.display());
        if let Some(bytes) = self.store_bytes {
            let _ = write!(out, " ({})", format_bytes(bytes));
        }
        out.push('\n');
        let _ = writeln!(out, "📦 Artifacts: {}", self.artifact_dir.display());
        let _ = writeln!(out, "🧹 Retention: {} days", self.retention_days);
        let _ = writeln!(
            out,
            "⏰ Next backup: {}",
            self.next_backup.format("%Y-%m-%d %H:%M UTC")
        );
        let _ = writeln!(out, "⏱ Uptime: {}", format_duration(self.uptime_secs));

        if self.latest.is_empty() {
            out.push_str("\nNo artifacts yet.");
        } else {
            out.push_str("\nLatest artifacts:");
            for a in self.latest {
                let _ = write!(out, "\n• {} ({})", a.name, format_bytes(a.size));
            }
        }
        out
    }
}

fn format_user_list(users: &[UserRecord]) -> String {
    if users.is_empty() {
        return "No users yet.".to_string();
    }
    let mut lines = vec!["📜 Latest registered users:".to_string(), String::new()];
    for u in users {
        lines.push(format!(
            "• {} @{} (ID: {})",
            or_dash(&u.first_name),
            or_dash(&u.username),
            u.user_id
        ));
    }
    lines.join("\n")
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        return format!("{days}d {hours}h {mins}m");
    }
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
