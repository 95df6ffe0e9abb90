//! Implements a [BackupStore] on the local disk using [LocalStore].

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{validate_key, BackupEntry, BackupStore, StoreError};
use crate::context::{self, Context};
use crate::util::fs::{random_suffix, TempPath};

/// Directory below the store root receiving in-flight uploads.
const UPLOADS_DIR: &str = ".uploads";

/// The [LocalStore] keeps every backup as a file named after its key.
///
/// Uploads are written next to the final location first and renamed into
/// place once complete, so readers never observe a half written backup.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new [LocalStore] instance rooted at `root`.
    ///
    /// The directory is created lazily on the first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if root.is_relative() {
            log::warn!(target: "backends::local", "backups root is relative: {}", root.display());
        }

        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn not_found_as(key: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
        _ => StoreError::Io(e),
    }
}

impl BackupStore for LocalStore {
    fn upload(&self, ctx: &Context, local_path: &Path, key: &str) -> Result<(), StoreError> {
        let dest = self.object_path(key)?;
        log::debug!(target: "backends::local", "Upload {} as {key}", local_path.display());

        let uploads = self.root.join(UPLOADS_DIR);
        fs::create_dir_all(&uploads)?;

        let partial = TempPath::new(uploads.join(format!("{key}.{}", random_suffix(6))));
        let mut source = File::open(local_path)?;
        let mut writer = BufWriter::new(File::create_new(partial.path())?);
        match ctx.copy(&mut source, &mut writer) {
            Err(e) if context::is_cancellation(&e) => return Err(StoreError::Cancelled),
            res => res?,
        };
        writer.flush()?;
        writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?
            .sync_all()?;

        fs::rename(partial.path(), &dest)?;
        log::trace!(target: "backends::local", "Stored {}", dest.display());

        Ok(())
    }

    fn fetch(&self, ctx: &Context, key: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let path = self.object_path(key)?;
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let file = File::open(&path).map_err(not_found_as(key))?;
        if !file.metadata()?.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }

        Ok(Box::new(file))
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupEntry>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }

            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                log::debug!(target: "backends::local", "Skip non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }

            backups.push(BackupEntry {
                key,
                modified: DateTime::<Utc>::from(meta.modified()?),
                size: meta.len(),
            });
        }

        Ok(backups)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        log::debug!(target: "backends::local", "Delete {key}");

        fs::remove_file(path).map_err(not_found_as(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("backups"));
        (tmp, store)
    }

    fn upload_bytes(tmp: &TempDir, store: &LocalStore, key: &str, content: &[u8]) {
        let local = tmp.path().join("local.zip");
        fs::write(&local, content).unwrap();
        store.upload(&Context::background(), &local, key).unwrap();
    }

    #[test]
    fn upload_fetch_and_overwrite() {
        let (tmp, store) = store();
        upload_bytes(&tmp, &store, "a.zip", b"first");
        upload_bytes(&tmp, &store, "a.zip", b"second");

        let mut content = Vec::new();
        store
            .fetch(&Context::background(), "a.zip")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"second");

        let listed = store.list("").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "a.zip");
        assert_eq!(listed[0].size, 6);
        // nothing but the finished upload is left behind
        assert_eq!(fs::read_dir(store.root().join(UPLOADS_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn list_filters_by_prefix() {
        let (tmp, store) = store();
        assert!(store.list("").unwrap().is_empty());

        upload_bytes(&tmp, &store, "@auto_pb_backup_a.zip", b"a");
        upload_bytes(&tmp, &store, "pb_backup_b.zip", b"b");

        let auto = store.list("@auto_pb_backup_").unwrap();
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].key, "@auto_pb_backup_a.zip");
        assert_eq!(store.list("").unwrap().len(), 2);
    }

    #[test]
    fn missing_backups_are_not_found() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.fetch(&Context::background(), "nope.zip"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.delete("nope.zip"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn cancelled_upload_leaves_nothing() {
        let (tmp, store) = store();
        let local = tmp.path().join("local.zip");
        fs::write(&local, b"zip").unwrap();

        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(
            store.upload(&ctx, &local, "a.zip"),
            Err(StoreError::Cancelled)
        ));
        assert!(store.list("").unwrap().is_empty());
    }
}
