//! Implements the backup of the data directory.

use super::{App, BACKUP_PREFIX, RESERVED_DIRS};
use crate::archive;
use crate::backends::validate_key;
use crate::context::Context;
use crate::db::run_exclusive_all;
use crate::error::BackupError;
use crate::util::fs::{random_suffix, TempPath};

impl App {
    /// Creates a new backup of the data directory and returns its name.
    ///
    /// If `name` is empty it is generated with the [`BACKUP_PREFIX`]. An
    /// existing backup with the same name is replaced.
    ///
    /// The archive is created while all registered write barriers are held,
    /// so writes are blocked until the archive file is complete. The
    /// `backups` and temp directories are not part of the backup.
    ///
    /// To safely perform the backup it is recommended to have free disk space
    /// for at least 2x the size of the data directory.
    pub fn create_backup(&self, ctx: &Context, name: &str) -> Result<String, BackupError> {
        let name = if name.is_empty() {
            self.generate_backup_name(BACKUP_PREFIX)
        } else {
            name.to_string()
        };
        validate_key(&name)?;

        let _guard = self.acquire(&name)?;
        ctx.check()?;
        log::info!(target: "backup::snapshot", "Create backup {name}");

        // the temp dir is inside the data dir to avoid "cross-device link" errors
        let temp_dir = self.ensure_temp_dir()?;
        let archive_path = TempPath::new(temp_dir.join(format!("{BACKUP_PREFIX}{}", random_suffix(4))));

        run_exclusive_all(self.barriers(), &mut || {
            archive::create(ctx, self.data_dir(), archive_path.path(), &RESERVED_DIRS)
                .map_err(BackupError::from)
        })?;
        log::debug!(target: "backup::snapshot", "Archived data dir into {}", archive_path.path().display());

        self.store().upload(ctx, archive_path.path(), &name)?;
        log::info!(target: "backup::snapshot", "Finished backup {name}");

        Ok(name)
    }

    /// Takes the operation lock for `name` or reports the running operation.
    ///
    /// Nothing is acquired once a failed restore left the data directory in
    /// an unknown state.
    pub(crate) fn acquire(
        &self,
        name: &str,
    ) -> Result<crate::lock::OperationGuard<'_>, BackupError> {
        let guard = self.operation_lock().try_acquire(name).ok_or_else(|| {
            let active = self.operation_lock().active().unwrap_or_default();
            log::debug!(target: "backup", "Rejected {name}, {active} is still running");
            BackupError::AlreadyInProgress { active }
        })?;
        self.ensure_recoverable()?;

        Ok(guard)
    }
}
