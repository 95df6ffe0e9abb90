//! The application whose data directory is backed up.

mod restart;
mod restore;
mod settings;
mod snapshot;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

pub use restart::{ExecRestart, Restart, RestartError};
pub use settings::{
    BackupsSettings, RevertFailurePolicy, Settings, SettingsError, SettingsStore,
    UnknownRevertFailurePolicy,
};

use crate::backends::{BackupStore, LocalStore};
use crate::db::WriteBarrier;
use crate::error::{BackupError, UnrecoverableState};
use crate::lock::OperationLock;
use crate::util::name;

/// Directory of the [LocalStore] inside the data directory.
pub const BACKUPS_DIR: &str = "backups";
/// Staging directory inside the data directory, cleared on every start.
///
/// It lives inside the data directory so moves never cross filesystems.
pub const TEMP_DIR: &str = ".pb_temp_to_delete";
/// The main database file, required in every restorable backup.
pub const DATA_DB: &str = "data.db";
/// Prefix of backups created on demand without explicit name.
pub const BACKUP_PREFIX: &str = "pb_backup_";
/// Prefix of backups created by the scheduler.
pub const AUTO_BACKUP_PREFIX: &str = "@auto_pb_backup_";

/// File in the [`TEMP_DIR`] describing a restore that could not be reverted.
///
/// While it exists the temp dir is kept and all operations are refused.
pub const RECOVERY_MARKER: &str = "UNRECOVERABLE.json";

/// Top level entries of the data directory never archived or moved.
pub(crate) const RESERVED_DIRS: [&str; 2] = [BACKUPS_DIR, TEMP_DIR];

/// An application instance owning a data directory.
///
/// All backup and restore operations of the instance are serialized through
/// its [OperationLock].
pub struct App {
    data_dir: PathBuf,
    settings: Arc<SettingsStore>,
    store: Box<dyn BackupStore>,
    restarter: Box<dyn Restart>,
    barriers: Vec<Arc<dyn WriteBarrier>>,
    lock: OperationLock,
    bootstrapped: AtomicBool,
    unrecoverable: AtomicBool,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("data_dir", &self.data_dir)
            .field("lock", &self.lock)
            .field("bootstrapped", &self.is_bootstrapped())
            .field("unrecoverable", &self.unrecoverable.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl App {
    /// Create a new [App] instance.
    pub fn new(
        data_dir: PathBuf,
        settings: Arc<SettingsStore>,
        store: Box<dyn BackupStore>,
        restarter: Box<dyn Restart>,
    ) -> Self {
        if data_dir.is_relative() {
            log::warn!(target: "app", "data_dir is relative: {}", data_dir.display());
        }

        Self {
            data_dir,
            settings,
            store,
            restarter,
            barriers: Vec::new(),
            lock: OperationLock::new(),
            bootstrapped: AtomicBool::new(false),
            unrecoverable: AtomicBool::new(false),
        }
    }

    /// Create a new [App] keeping its backups in the `backups` directory of `data_dir`.
    pub fn with_local_store(
        data_dir: PathBuf,
        settings: Arc<SettingsStore>,
        restarter: Box<dyn Restart>,
    ) -> Self {
        let store = LocalStore::new(data_dir.join(BACKUPS_DIR));
        Self::new(data_dir, settings, Box::new(store), restarter)
    }

    /// Registers a database whose writes are held off during snapshots.
    pub fn with_write_barrier(mut self, barrier: Arc<dyn WriteBarrier>) -> Self {
        self.barriers.push(barrier);
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Staging directory for temporary files of backup operations.
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join(TEMP_DIR)
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn store(&self) -> &dyn BackupStore {
        self.store.as_ref()
    }

    pub fn operation_lock(&self) -> &OperationLock {
        &self.lock
    }

    pub(crate) fn restarter(&self) -> &dyn Restart {
        self.restarter.as_ref()
    }

    pub(crate) fn barriers(&self) -> &[Arc<dyn WriteBarrier>] {
        &self.barriers
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Acquire)
    }

    /// Prepares the data directory and marks the app as started.
    ///
    /// Staging directories leaked by earlier operations are removed. This
    /// includes the old data directory content left behind by a successful
    /// restore.
    ///
    /// Fails with [`BackupError::RecoveryPending`] if a failed restore left a
    /// [`RECOVERY_MARKER`]. The staging directories are kept in that case.
    pub fn bootstrap(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.data_dir).map_err(BackupError::io("failed to create the data dir"))?;

        let marker = self.recovery_marker();
        if marker.exists() {
            self.unrecoverable.store(true, Ordering::Release);
            log::error!(
                target: "app",
                "Refusing to start, a failed restore needs manual recovery: {}",
                marker.display()
            );
            return Err(BackupError::RecoveryPending { marker });
        }

        let temp_dir = self.temp_dir();
        match fs::remove_dir_all(&temp_dir) {
            Ok(()) => log::debug!(target: "app", "Removed leftover {}", temp_dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BackupError::io("failed to remove the temp dir")(e)),
        }

        self.bootstrapped.store(true, Ordering::Release);
        log::info!(target: "app", "Bootstrapped {}", self.data_dir.display());

        Ok(())
    }

    /// Location of the [`RECOVERY_MARKER`].
    pub fn recovery_marker(&self) -> PathBuf {
        self.temp_dir().join(RECOVERY_MARKER)
    }

    /// Returns if a failed restore left the data directory in an unknown state.
    pub fn is_unrecoverable(&self) -> bool {
        self.unrecoverable.load(Ordering::Acquire) || self.recovery_marker().exists()
    }

    /// Refuses every further operation after a failed revert.
    ///
    /// The state is recorded in the [`RECOVERY_MARKER`] so a restarted
    /// process refuses as well.
    pub(crate) fn mark_unrecoverable(&self, state: &UnrecoverableState) {
        self.unrecoverable.store(true, Ordering::Release);

        let marker = self.recovery_marker();
        let written = serde_json::to_vec_pretty(state)
            .map_err(io::Error::from)
            .and_then(|json| fs::write(&marker, json));
        if let Err(e) = written {
            log::error!(target: "app", "Failed to write {}: {e}", marker.display());
        }
    }

    /// Fails if the data directory needs manual recovery.
    pub(crate) fn ensure_recoverable(&self) -> Result<(), BackupError> {
        if self.is_unrecoverable() {
            Err(BackupError::RecoveryPending {
                marker: self.recovery_marker(),
            })
        } else {
            Ok(())
        }
    }

    /// Generates a new backup name with `prefix` for the current time.
    pub fn generate_backup_name(&self, prefix: &str) -> String {
        name::generate_backup_name(prefix, &self.settings.get().app_name, Utc::now())
    }

    /// Makes sure the staging directory exists and returns it.
    pub(crate) fn ensure_temp_dir(&self) -> Result<PathBuf, BackupError> {
        let temp_dir = self.temp_dir();
        fs::create_dir_all(&temp_dir).map_err(BackupError::io("failed to create a temp dir"))?;
        Ok(temp_dir)
    }
}
