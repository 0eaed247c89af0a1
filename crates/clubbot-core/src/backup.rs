//! Backup and export artifacts on disk, plus the retention sweep.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{export::ExportFormat, store::UserStore, Result};

pub const BACKUP_PREFIX: &str = "users_backup_";
pub const EXPORT_PREFIX: &str = "users_export_";

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Outcome of one retention sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Result of replacing the live store from an uploaded backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreReport {
    /// Snapshot of the rows that were live before the swap.
    pub safety_backup: PathBuf,
    pub restored: usize,
}

#[derive(Clone, Debug)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Directory holding `users_backup_*` and `users_export_*` files.
#[derive(Clone, Debug)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.unique(format!("{BACKUP_PREFIX}{}", at.format(STAMP_FORMAT)), "db")
    }

    pub fn export_path(&self, at: DateTime<Utc>, format: ExportFormat) -> PathBuf {
        self.unique(
            format!("{EXPORT_PREFIX}{}", at.format(STAMP_FORMAT)),
            format.extension(),
        )
    }

    // Two artifacts captured within the same second get a numeric suffix.
    fn unique(&self, stem: String, ext: &str) -> PathBuf {
        let first = self.root.join(format!("{stem}.{ext}"));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.root.join(format!("{stem}_{n}.{ext}")))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }

    /// Take a consistent snapshot of `store` into a new backup artifact.
    pub fn snapshot(&self, store: &UserStore, at: DateTime<Utc>) -> Result<PathBuf> {
        let path = self.backup_path(at);
        store.snapshot_to(&path)?;
        info!("Backup written to {}", path.display());
        Ok(path)
    }

    /// Replace the store contents with the rows of `upload`.
    ///
    /// The upload is read and validated before anything else happens, so a
    /// rejected file leaves both the store and this directory unchanged.
    pub fn restore(
        &self,
        store: &UserStore,
        upload: &Path,
        at: DateTime<Utc>,
    ) -> Result<RestoreReport> {
        let rows = UserStore::read_backup(upload)?;
        let safety_backup = self.snapshot(store, at)?;
        let restored = store.replace_all(&rows)?;
        info!(
            rows = restored,
            "User store restored from {} (previous rows in {})",
            upload.display(),
            safety_backup.display()
        );
        Ok(RestoreReport {
            safety_backup,
            restored,
        })
    }

    /// Delete artifacts whose modification time is strictly older than `now - retention`.
    ///
    /// Files without one of the artifact prefixes are never touched.
    pub fn sweep(&self, retention: Duration, now: SystemTime) -> Result<SweepReport> {
        let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = SweepReport::default();

        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !is_artifact(&path) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    report.failures.push((path, e.to_string()));
                    continue;
                }
            };
            if modified >= cutoff {
                report.kept += 1;
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) => {
                    warn!("Failed to remove expired artifact {}: {e}", path.display());
                    report.failures.push((path, e.to_string()));
                }
            }
        }

        info!(
            removed = report.removed.len(),
            kept = report.kept,
            failures = report.failures.len(),
            "Retention sweep finished"
        );
        Ok(report)
    }

    /// Artifacts, newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<ArtifactInfo>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            if !is_artifact(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            items.push(ArtifactInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        items.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        items.truncate(limit);
        Ok(items)
    }
}

fn is_artifact(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(BACKUP_PREFIX) || n.starts_with(EXPORT_PREFIX))
        .unwrap_or(false)
}
