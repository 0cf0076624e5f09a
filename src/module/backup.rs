//! Per-module config backup taken before `apply`, restored when it fails.
//!
//! Backups live under `<backup_root>/<run_id>/<module>/` mirroring the
//! absolute path of each saved file.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};

/// One saved file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Location the file was copied from.
    pub original: PathBuf,
    /// Location of the copy.
    pub saved: PathBuf,
}

/// Files saved for a single module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSet {
    /// Saved files, in the order they were copied.
    pub entries: Vec<BackupEntry>,
}

impl BackupSet {
    /// Returns `true` when nothing was saved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy every existing file in `paths` into `backup_dir`.
///
/// Paths that do not exist are skipped; apply may create them.
///
/// # Errors
///
/// Returns an error if a path is relative, or if the backup directory
/// cannot be created or a copy fails.
pub async fn save(paths: &[PathBuf], backup_dir: &Path) -> anyhow::Result<BackupSet> {
    let mut set = BackupSet::default();

    for original in paths {
        let saved = backup_dir.join(relative_to_root(original)?);

        if !tokio::fs::try_exists(original).await.unwrap_or(false) {
            debug!(path = %original.display(), "backup source absent, skipping");
            continue;
        }

        if let Some(parent) = saved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        tokio::fs::copy(original, &saved).await.with_context(|| {
            format!(
                "failed to back up {} to {}",
                original.display(),
                saved.display()
            )
        })?;

        set.entries.push(BackupEntry {
            original: original.clone(),
            saved,
        });
    }

    if !set.is_empty() {
        info!(count = set.entries.len(), dir = %backup_dir.display(), "config backup saved");
    }
    Ok(set)
}

/// Copy saved files back to their original locations.
///
/// Returns the number of files restored. Individual failures are logged and
/// skipped so one bad file does not prevent restoring the rest.
pub async fn restore(set: &BackupSet) -> usize {
    let mut restored: usize = 0;
    for entry in &set.entries {
        match tokio::fs::copy(&entry.saved, &entry.original).await {
            Ok(_) => restored = restored.saturating_add(1),
            Err(e) => warn!(
                path = %entry.original.display(),
                error = %e,
                "failed to restore backup"
            ),
        }
    }
    restored
}

/// Strip the root from an absolute path so it can be joined under a backup dir.
fn relative_to_root(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.is_absolute() {
        anyhow::bail!("backup path must be absolute: {}", path.display());
    }
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if relative.as_os_str().is_empty() {
        anyhow::bail!("backup path has no file component: {}", path.display());
    }
    Ok(relative)
}
