//! Errors surfaced by backup and restore operations.

use std::io;
use std::path::PathBuf;

use derive_more::{Display, Error, From};

use crate::app::RestartError;
use crate::archive::ArchiveError;
use crate::backends::StoreError;
use crate::util::fs::MoveError;

#[derive(Debug, Display, Error, From)]
/// Errors of [`App::create_backup`](crate::app::App::create_backup) and
/// [`App::restore_backup`](crate::app::App::restore_backup).
pub enum BackupError {
    /// Another backup or restore currently holds the operation lock.
    #[display("try again later - another backup/restore operation has already been started ({active})")]
    AlreadyInProgress { active: String },
    /// Restoring needs same-filesystem moves and a self-restart of the process.
    #[display("restore is not supported on this platform")]
    Unsupported,
    /// The extracted archive has no `data.db` at its root.
    #[display("data.db file is missing or invalid: {source}")]
    InvalidBackup { source: io::Error },
    /// The [`Context`](crate::context::Context) got cancelled.
    #[display("operation cancelled")]
    Cancelled,
    /// Local filesystem failure.
    #[display("{context}: {source}")]
    Io {
        context: &'static str,
        source: io::Error,
    },
    /// Swapping the data directory failed and the swap was reverted.
    #[display("{context}: {source}")]
    Swap {
        context: &'static str,
        source: MoveError,
    },

    #[display("backup store: {_0}")]
    Store(StoreError),
    #[display("backup archive: {_0}")]
    Archive(ArchiveError),
    /// Restarting failed after the data directory was swapped. The swap was reverted.
    #[from]
    #[display("failed to restart the app process: {_0}")]
    Restart(RestartError),
    /// Reverting a failed restore failed as well.
    ///
    /// Only returned with [`RevertFailurePolicy::Error`](crate::app::RevertFailurePolicy::Error),
    /// otherwise the condition aborts with an [`UnrecoverableState`] panic.
    #[display("{_0}")]
    Unrecoverable(UnrecoverableState),
    /// An earlier restore left the data directory in an unrecoverable state.
    ///
    /// Every operation is refused until the marker file is removed by hand.
    #[display("the data directory needs manual recovery, see {}", marker.display())]
    RecoveryPending { marker: PathBuf },
}

impl BackupError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }

    /// Classifies the error for callers deciding how to react.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyInProgress { .. } => ErrorClass::Conflict,
            Self::Unsupported
            | Self::InvalidBackup { .. }
            | Self::Store(StoreError::NotFound(_) | StoreError::InvalidKey(_)) => {
                ErrorClass::Validation
            }
            Self::Cancelled | Self::Io { .. } | Self::Store(_) | Self::Archive(_) => {
                ErrorClass::Transient
            }
            Self::Swap { .. } | Self::Restart(_) => ErrorClass::Reverted,
            Self::Unrecoverable(_) | Self::RecoveryPending { .. } => ErrorClass::Unrecoverable,
        }
    }
}

impl From<StoreError> for BackupError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Cancelled => Self::Cancelled,
            e => Self::Store(e),
        }
    }
}

impl From<ArchiveError> for BackupError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Cancelled => Self::Cancelled,
            e => Self::Archive(e),
        }
    }
}

/// Coarse grouping of [`BackupError`]s.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum ErrorClass {
    /// Another operation is active. Try again later.
    #[display("conflict")]
    Conflict,
    /// The request can never succeed as issued. Nothing was changed.
    #[display("validation")]
    Validation,
    /// Store, network or filesystem failure before anything live was touched.
    #[display("transient")]
    Transient,
    /// Failure after the point of no return, the data directory was reverted.
    #[display("reverted")]
    Reverted,
    /// The data directory is in an unknown state and needs manual intervention.
    #[display("unrecoverable")]
    Unrecoverable,
}

/// Payload of the panic raised when a failed restore can't be reverted.
///
/// The data directory is left partially swapped. The old content is still
/// located in [`old_data_dir`](Self::old_data_dir) and the restored content in
/// [`extracted_dir`](Self::extracted_dir).
#[derive(Debug, Clone, Display, Error, serde::Serialize)]
#[display(
    "failed to revert the data directory ({revert}) after: {cause}; old data: {}, restored data: {}",
    old_data_dir.display(),
    extracted_dir.display()
)]
pub struct UnrecoverableState {
    pub cause: String,
    pub revert: String,
    pub old_data_dir: PathBuf,
    pub extracted_dir: PathBuf,
}
