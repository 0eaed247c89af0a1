use std::path::{Path, PathBuf};

use chrono::Utc;
use teloxide::{net::Download, prelude::*, types::Document};

/// The document a `/restore` refers to: attached to the command itself, or
/// on the message the command replies to.
pub(crate) fn restore_source(msg: &Message) -> Option<&Document> {
    msg.document()
        .or_else(|| msg.reply_to_message().and_then(|r| r.document()))
}

pub(crate) fn is_db_upload(file_name: Option<&str>) -> bool {
    file_name
        .map(|n| n.to_ascii_lowercase().ends_with(".db"))
        .unwrap_or(false)
}

/// Where an uploaded restore file is staged. Never matches an artifact prefix.
pub(crate) fn staging_path(dir: &Path) -> PathBuf {
    dir.join(format!("restore_upload_{}.db", Utc::now().format("%Y%m%d_%H%M%S%3f")))
}

pub(crate) async fn download_document(
    bot: &Bot,
    doc: &Document,
    dest: &Path,
) -> anyhow::Result<()> {
    let file = bot.get_file(doc.file.id.clone()).await?;
    let mut dst = tokio::fs::File::create(dest).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_db_files_are_restorable() {
        assert!(is_db_upload(Some("users_backup_20260101_030000.db")));
        assert!(is_db_upload(Some("USERS.DB")));
        assert!(!is_db_upload(Some("users.csv")));
        assert!(!is_db_upload(None));
    }

    #[test]
    fn staging_files_stay_out_of_the_sweep() {
        let p = staging_path(Path::new("/tmp/backup"));
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("restore_upload_"));
        assert!(!name.starts_with(clubbot_core::backup::BACKUP_PREFIX));
        assert!(name.ends_with(".db"));
    }
}
