//! Storage backends holding the backup archives.
//!
//! Currently the following backends are implemented:
//!
//! - [LocalStore]: Backups as plain files in the `backups` directory of the data directory.
//!
//! Remote object stores plug in by implementing [BackupStore].

pub mod local;

pub use local::LocalStore;

use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};

use crate::context::Context;

/// A backup archive known to a [BackupStore].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackupEntry {
    /// Name of the backup.
    pub key: String,
    /// Time of the last modification of the stored object.
    pub modified: DateTime<Utc>,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Display, Error, From)]
/// Errors of a [BackupStore].
pub enum StoreError {
    /// No backup with the key exists.
    #[display("backup not found: {_0}")]
    NotFound(#[error(ignore)] String),
    /// The key can't be used as backup name.
    #[display("invalid backup key: {_0:?}")]
    InvalidKey(#[error(ignore)] String),
    /// The [Context] got cancelled during the transfer.
    #[display("transfer cancelled")]
    Cancelled,
    #[from]
    #[display("{_0}")]
    Io(io::Error),
}

/// Generic storage of backup archives.
pub trait BackupStore: Send + Sync {
    /// Uploads the file at `local_path` as `key`.
    ///
    /// An existing backup with the same key is replaced. On failure no
    /// (partial) object is left under `key`.
    fn upload(&self, ctx: &Context, local_path: &Path, key: &str) -> Result<(), StoreError>;

    /// Opens the backup `key` for reading.
    fn fetch(&self, ctx: &Context, key: &str) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Lists all backups whose key starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<BackupEntry>, StoreError>;

    /// Deletes the backup `key`.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Checks that `key` can be used as a flat object name.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\'])
        || key.contains('\0');

    if invalid {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("pb_backup_acme_20240101000000.zip").is_ok());
        assert!(validate_key("@auto_pb_backup_acme_20240101000000.zip").is_ok());

        for key in ["", ".", "..", "../data.db", "a/b.zip", "a\\b.zip"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
