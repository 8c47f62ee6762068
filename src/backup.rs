use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::CueClubError;

const BACKUP_EXTENSION: &str = "json";

/// Copies the live document into timestamp-named snapshots and keeps only
/// the newest `retention` of them.
///
/// Snapshot names are `<prefix>-backup-<ISO timestamp>.json` with `:` and
/// `.` replaced by `-`. The timestamp is fixed-width, so lexicographic order
/// is chronological order.
#[derive(Debug, Clone)]
pub struct BackupRotator {
    source: PathBuf,
    backup_dir: PathBuf,
    prefix: String,
    retention: usize,
}

impl BackupRotator {
    pub fn new(
        source: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        retention: usize,
    ) -> Self {
        Self {
            source: source.into(),
            backup_dir: backup_dir.into(),
            prefix: prefix.into(),
            retention: retention.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.data_file(),
            config.backup_dir(),
            config.backup_prefix.clone(),
            config.retention,
        )
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Snapshots the document now. Returns `None` when there is no document
    /// yet or when any step fails (the failure is logged).
    pub fn create_backup(&self) -> Option<PathBuf> {
        self.create_backup_at(Utc::now())
    }

    pub fn create_backup_at(&self, now: DateTime<Utc>) -> Option<PathBuf> {
        match self.try_create_backup(now) {
            Ok(path) => path,
            Err(e) => {
                warn!("Backup failed: {}", e);
                None
            }
        }
    }

    fn try_create_backup(&self, now: DateTime<Utc>) -> crate::Result<Option<PathBuf>> {
        if !self.source.is_file() {
            return Ok(None);
        }
        fs::create_dir_all(&self.backup_dir)?;

        let mut stamp = now;
        let mut path = self.backup_dir.join(self.file_name(stamp));
        while path.exists() {
            stamp += Duration::milliseconds(1);
            path = self.backup_dir.join(self.file_name(stamp));
        }

        fs::copy(&self.source, &path)?;
        let pruned = self.prune()?;
        info!(
            "Backup created at {} ({} old snapshot(s) pruned)",
            path.display(),
            pruned
        );
        Ok(Some(path))
    }

    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        let stamp = at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "-")
            .replace('.', "-");
        format!("{}-backup-{}.{}", self.prefix, stamp, BACKUP_EXTENSION)
    }

    /// Snapshot file names, newest first.
    pub fn list_backups(&self) -> crate::Result<Vec<String>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let marker = format!("{}-backup-", self.prefix);
        let suffix = format!(".{}", BACKUP_EXTENSION);
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&marker) && name.ends_with(&suffix) {
                names.push(name);
            }
        }
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    fn prune(&self) -> crate::Result<usize> {
        let names = self.list_backups()?;
        let mut removed = 0;
        for name in names.iter().skip(self.retention) {
            match fs::remove_file(self.backup_dir.join(name)) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to prune backup {}: {}", name, e),
            }
        }
        Ok(removed)
    }

    /// Replaces the live document with the named snapshot.
    pub fn restore(&self, name: &str) -> crate::Result<()> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(CueClubError::Backup(format!(
                "`{}` is not a backup file name",
                name
            )));
        }
        if !self.list_backups()?.iter().any(|existing| existing == name) {
            return Err(CueClubError::BackupNotFound(name.to_string()));
        }

        if let Some(parent) = self.source.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged = self.source.with_extension("restore.tmp");
        fs::copy(self.backup_dir.join(name), &staged)?;
        fs::rename(&staged, &self.source)?;
        info!("Restored document from backup {}", name);
        Ok(())
    }
}
