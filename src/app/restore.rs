//! Implements the restore of the data directory from a backup.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use super::{App, RevertFailurePolicy, DATA_DB, RESERVED_DIRS};
use crate::archive;
use crate::backends::validate_key;
use crate::context::{self, Context};
use crate::error::{BackupError, UnrecoverableState};
use crate::util::fs::{move_dir_content, random_suffix, MoveError, TempPath};

impl App {
    /// Restores the backup `name` and restarts the application process.
    ///
    /// Only supported on unix systems. To safely perform the restore it is
    /// recommended to have free disk space for at least 2x the size of the
    /// restored backup.
    ///
    /// The performed steps are:
    ///
    ///  1. Download the backup into the temp dir of the data directory.
    ///  2. Extract the backup into another temp dir and check for a `data.db`.
    ///  3. Move the current data directory content (except the `backups` and
    ///     temp dirs) into a temp dir. It is removed on the next
    ///     [`bootstrap`](Self::bootstrap).
    ///  4. Move the extracted content into the data directory.
    ///  5. Restart the application.
    ///
    /// Steps 1 and 2 observe `ctx`, everything after runs to completion.
    ///
    /// If moving the extracted content or restarting fails, the data
    /// directory changes are reverted. If the revert fails as well the
    /// configured [RevertFailurePolicy] decides between a panic with an
    /// [UnrecoverableState] payload and [`BackupError::Unrecoverable`]. In
    /// both cases the app refuses all further operations, see
    /// [`App::recovery_marker`].
    pub fn restore_backup(&self, ctx: &Context, name: &str) -> Result<(), BackupError> {
        if cfg!(not(unix)) {
            return Err(BackupError::Unsupported);
        }
        validate_key(name)?;

        let _guard = self.acquire(name)?;
        log::info!(target: "backup::restore", "Restore backup {name}");

        let mut backup = self.store().fetch(ctx, name)?;

        let temp_dir = self.ensure_temp_dir()?;
        let temp_zip = TempPath::new(temp_dir.join(format!("pb_restore_zip_{}", random_suffix(4))));
        {
            let file = File::create_new(temp_zip.path())
                .map_err(BackupError::io("failed to create the temp backup file"))?;
            let mut writer = BufWriter::new(file);
            ctx.copy(&mut backup, &mut writer)
                .and_then(|_| writer.into_inner().map_err(io::IntoInnerError::into_error))
                .map_err(|e| {
                    if context::is_cancellation(&e) {
                        BackupError::Cancelled
                    } else {
                        BackupError::io("failed to download the backup")(e)
                    }
                })?;
        }
        drop(backup);

        let mut extracted = TempPath::new(temp_dir.join(format!("pb_restore_{}", random_suffix(4))));
        archive::extract(ctx, temp_zip.path(), extracted.path())?;

        let data_db = extracted.path().join(DATA_DB);
        match fs::metadata(&data_db) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(BackupError::InvalidBackup {
                    source: io::Error::new(io::ErrorKind::InvalidData, "data.db is not a file"),
                })
            }
            Err(source) => return Err(BackupError::InvalidBackup { source }),
        }

        // remove the zip now, the deferred removal doesn't run once the process is replaced
        if let Err(e) = fs::remove_file(temp_zip.path()) {
            log::debug!(
                target: "backup::restore",
                "Failed to remove the temp backup file {}: {e}",
                temp_zip.path().display()
            );
        }

        // Point of no return, cancellation is no longer observed.
        // The old content can't always be deleted while open, so it is moved
        // aside and removed on the next bootstrap.
        let old_data = temp_dir.join(format!("old_pb_data_{}", random_suffix(4)));
        self.move_aside(&old_data, &mut extracted)?;
        self.move_in(&old_data, &mut extracted)?;
        log::info!(target: "backup::restore", "Swapped data dir with backup {name}");

        if let Err(e) = self.restarter().restart() {
            return self.revert(BackupError::Restart(e), &old_data, &mut extracted, true);
        }

        Ok(())
    }

    /// Moves the live content of the data directory into `old_data`.
    fn move_aside(&self, old_data: &Path, extracted: &mut TempPath) -> Result<(), BackupError> {
        match move_dir_content(self.data_dir(), old_data, &RESERVED_DIRS) {
            Ok(()) => Ok(()),
            Err(source) => Err(self.move_aside_failed(source, old_data, extracted)),
        }
    }

    fn move_aside_failed(
        &self,
        source: MoveError,
        old_data: &Path,
        extracted: &mut TempPath,
    ) -> BackupError {
        let rolled_back = source.is_rolled_back();
        let cause = BackupError::Swap {
            context: "failed to move the current data dir content to a temp location",
            source,
        };
        if !rolled_back {
            let revert = "moving the current data dir content aside was not rolled back".to_string();
            return self.escalate(cause, revert, old_data, extracted);
        }

        if let Err(e) = fs::remove_dir(old_data) {
            log::debug!(target: "backup::restore", "Failed to remove {}: {e}", old_data.display());
        }
        cause
    }

    /// Moves the extracted backup into the data directory.
    ///
    /// A failed move is reverted by moving `old_data` back.
    fn move_in(&self, old_data: &Path, extracted: &mut TempPath) -> Result<(), BackupError> {
        let Err(source) = move_dir_content(extracted.path(), self.data_dir(), &RESERVED_DIRS) else {
            return Ok(());
        };

        let rolled_back = source.is_rolled_back();
        let cause = BackupError::Swap {
            context: "failed to move the extracted archive content to the data dir",
            source,
        };
        if !rolled_back {
            let revert = "moving the extracted archive content was not rolled back".to_string();
            return Err(self.escalate(cause, revert, old_data, extracted));
        }
        self.revert(cause, old_data, extracted, false)
    }

    /// Moves the old data back into the data directory and returns `cause`.
    ///
    /// With `swapped_in` the restored content is moved out of the data
    /// directory first.
    fn revert(
        &self,
        cause: BackupError,
        old_data: &Path,
        extracted: &mut TempPath,
        swapped_in: bool,
    ) -> Result<(), BackupError> {
        log::warn!(target: "backup::restore", "Reverting data dir changes after: {cause}");

        if swapped_in {
            if let Err(e) = move_dir_content(self.data_dir(), extracted.path(), &RESERVED_DIRS) {
                let revert = format!("failed to revert the extracted dir change: {e}");
                return Err(self.escalate(cause, revert, old_data, extracted));
            }
        }

        if let Err(e) = move_dir_content(old_data, self.data_dir(), &RESERVED_DIRS) {
            let revert = format!("failed to revert the old data dir change: {e}");
            return Err(self.escalate(cause, revert, old_data, extracted));
        }

        if let Err(e) = fs::remove_dir(old_data) {
            log::debug!(target: "backup::restore", "Failed to remove {}: {e}", old_data.display());
        }
        log::info!(target: "backup::restore", "Reverted data dir changes");

        Err(cause)
    }

    /// Handles a data directory left in an unknown state.
    ///
    /// The app refuses every further operation, also after a restart of the
    /// process. Panics with [UnrecoverableState] unless the settings ask for
    /// [`RevertFailurePolicy::Error`].
    fn escalate(
        &self,
        cause: BackupError,
        revert: String,
        old_data: &Path,
        extracted: &mut TempPath,
    ) -> BackupError {
        let state = UnrecoverableState {
            cause: cause.to_string(),
            revert,
            old_data_dir: old_data.to_path_buf(),
            // both halves are needed for a manual recovery
            extracted_dir: extracted.keep(),
        };
        log::error!(target: "backup::restore", "Data dir left in unrecoverable state: {state}");
        self.mark_unrecoverable(&state);

        match self.settings().get().backups.on_revert_failure {
            RevertFailurePolicy::Abort => std::panic::panic_any(state),
            RevertFailurePolicy::Error => BackupError::Unrecoverable(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::app::{Restart, RestartError, Settings, SettingsStore, BACKUPS_DIR, TEMP_DIR};
    use crate::error::ErrorClass;

    struct NoRestart;

    impl Restart for NoRestart {
        fn restart(&self) -> Result<(), RestartError> {
            Err(RestartError::Unsupported)
        }
    }

    fn app(tmp: &TempDir, policy: RevertFailurePolicy) -> App {
        let data_dir = tmp.path().join("pb_data");
        fs::create_dir_all(data_dir.join(BACKUPS_DIR)).unwrap();
        fs::create_dir_all(data_dir.join(TEMP_DIR)).unwrap();
        fs::write(data_dir.join(DATA_DB), b"live db").unwrap();
        fs::write(data_dir.join("logs.db"), b"live logs").unwrap();

        let mut settings = Settings::default();
        settings.backups.on_revert_failure = policy;
        App::with_local_store(data_dir, Arc::new(SettingsStore::new(settings)), Box::new(NoRestart))
    }

    fn extracted(app: &App) -> TempPath {
        let extracted = TempPath::new(app.temp_dir().join("pb_restore_test"));
        fs::create_dir_all(extracted.path().join("storage/rec")).unwrap();
        fs::write(extracted.path().join(DATA_DB), b"restored db").unwrap();
        fs::write(extracted.path().join("storage/rec/cover.png"), b"png").unwrap();
        extracted
    }

    #[test]
    fn failed_move_in_reverts() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp, RevertFailurePolicy::Error);
        let mut extracted = extracted(&app);
        let old_data = app.temp_dir().join("old_pb_data_test");

        app.move_aside(&old_data, &mut extracted).unwrap();
        assert!(!app.data_dir().join(DATA_DB).exists());

        // a writer recreated a directory the backup contains as well
        fs::create_dir_all(app.data_dir().join("storage")).unwrap();
        fs::write(app.data_dir().join("storage/late.txt"), b"late").unwrap();

        let err = app.move_in(&old_data, &mut extracted).unwrap_err();

        assert!(matches!(err, BackupError::Swap { .. }), "{err}");
        assert_eq!(err.class(), ErrorClass::Reverted);
        assert_eq!(fs::read(app.data_dir().join(DATA_DB)).unwrap(), b"live db");
        assert_eq!(fs::read(app.data_dir().join("logs.db")).unwrap(), b"live logs");
        assert_eq!(fs::read(app.data_dir().join("storage/late.txt")).unwrap(), b"late");
        assert!(!app.data_dir().join("storage/rec").exists());
        assert!(!old_data.exists());

        // the restored content stays staged for removal
        assert_eq!(fs::read(extracted.path().join(DATA_DB)).unwrap(), b"restored db");
        assert!(!app.is_unrecoverable());
    }

    #[test]
    fn rolled_back_move_aside_is_swap_error() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp, RevertFailurePolicy::Error);
        let mut extracted = extracted(&app);
        let old_data = app.temp_dir().join("old_pb_data_test");
        fs::create_dir_all(&old_data).unwrap();

        let source = MoveError {
            entry: app.data_dir().join("storage"),
            source: io::Error::other("device busy"),
            rollback_failed: Vec::new(),
        };
        let err = app.move_aside_failed(source, &old_data, &mut extracted);

        assert!(matches!(err, BackupError::Swap { .. }), "{err}");
        assert_eq!(err.class(), ErrorClass::Reverted);
        assert!(!old_data.exists());
        assert!(!app.is_unrecoverable());
    }

    #[test]
    fn partial_move_aside_escalates() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp, RevertFailurePolicy::Error);
        let mut extracted = extracted(&app);
        let extracted_dir = extracted.path().to_path_buf();
        let old_data = app.temp_dir().join("old_pb_data_test");
        fs::create_dir_all(&old_data).unwrap();
        fs::rename(app.data_dir().join("logs.db"), old_data.join("logs.db")).unwrap();

        let source = MoveError {
            entry: app.data_dir().join(DATA_DB),
            source: io::Error::other("device busy"),
            rollback_failed: vec![old_data.join("logs.db")],
        };
        let err = app.move_aside_failed(source, &old_data, &mut extracted);
        drop(extracted);

        let BackupError::Unrecoverable(state) = err else {
            panic!("unexpected error {err}");
        };
        assert_eq!(state.old_data_dir, old_data);
        assert_eq!(state.extracted_dir, extracted_dir);
        assert!(extracted_dir.join(DATA_DB).exists());
        assert!(old_data.join("logs.db").exists());

        assert!(app.is_unrecoverable());
        assert!(app.recovery_marker().is_file());
        assert!(matches!(
            app.create_backup(&Context::background(), "next.zip"),
            Err(BackupError::RecoveryPending { .. })
        ));
    }
}
