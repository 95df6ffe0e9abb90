use crate::backends::{BackupEntry, BackupStore, StoreError};

/// Outcome of a [sweep].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Keys of the deleted backups.
    pub deleted: Vec<String>,
    /// Keys of the backups that should have been deleted but weren't.
    pub failed: Vec<String>,
}

/// Returns the backups to delete to keep only the `max_keep` most recent ones.
///
/// `max_keep == 0` means no limit.
pub fn expired(mut backups: Vec<BackupEntry>, max_keep: usize) -> Vec<BackupEntry> {
    if max_keep == 0 || backups.len() <= max_keep {
        return Vec::new();
    }

    // newest first
    backups.sort_by(|a, b| b.modified.cmp(&a.modified));
    backups.split_off(max_keep)
}

/// Deletes all but the `max_keep` most recent backups whose key starts with `prefix`.
///
/// Failing to delete a single backup is logged and doesn't stop the sweep.
pub fn sweep(
    store: &dyn BackupStore,
    prefix: &str,
    max_keep: usize,
) -> Result<RetentionReport, StoreError> {
    let mut report = RetentionReport::default();
    if max_keep == 0 {
        return Ok(report);
    }

    let backups = store.list(prefix)?;
    for backup in expired(backups, max_keep) {
        match store.delete(&backup.key) {
            Ok(()) => {
                log::debug!(target: "backup::retention", "Removed old backup {}", backup.key);
                report.deleted.push(backup.key);
            }
            Err(e) => {
                log::warn!(target: "backup::retention", "Failed to remove old backup {}: {e}", backup.key);
                report.failed.push(backup.key);
            }
        }
    }

    Ok(report)
}
