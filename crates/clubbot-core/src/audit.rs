use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// One privileged-command attempt.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub user_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,

    pub authorized: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn admin_command(
        user_id: Option<i64>,
        username: Option<&str>,
        command: &str,
        args: &str,
        authorized: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event: if authorized { "admin_command" } else { "admin_denied" }.to_string(),
            user_id,
            username: username.map(|s| s.to_string()),
            command: command.to_string(),
            args: (!args.trim().is_empty()).then(|| args.to_string()),
            authorized,
            outcome: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: std::result::Result<String, String>) -> Self {
        match outcome {
            Ok(o) => self.outcome = Some(o),
            Err(e) => self.error = Some(e),
        }
        self
    }
}

/// Append-only audit trail for privileged commands.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.args {
            event.args = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.log"))
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
    }

    #[test]
    fn json_lines_record_denials_and_truncate_args() {
        let log = AuditLogger::new(tmp_file("clubbot-audit-json"), true);
        let long = "x".repeat(AUDIT_MAX_TEXT + 1);
        log.write(AuditEvent::admin_command(Some(7), None, "broadcast", &long, false))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(v["event"], "admin_denied");
        assert_eq!(v["authorized"], false);
        assert!(v["args"].as_str().unwrap().ends_with("..."));
        let _ = std::fs::remove_file(log.path());
    }

    #[test]
    fn plain_format_lists_fields() {
        let log = AuditLogger::new(tmp_file("clubbot-audit-plain"), false);
        let ev = AuditEvent::admin_command(Some(1), Some("root"), "backup", "", true)
            .with_outcome(Ok("users_backup_20260101_030000.db".to_string()));
        log.write(ev).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("command: backup"));
        assert!(written.contains("outcome: users_backup_20260101_030000.db"));
        assert!(!written.contains("args:"));
        let _ = std::fs::remove_file(log.path());
    }
}
