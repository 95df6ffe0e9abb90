//! Filesystem helpers for staging and swapping data directory trees.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Moving the content of a directory failed.
///
/// Entries moved before the failure are moved back. Entries that couldn't be
/// moved back are listed in [`rollback_failed`](Self::rollback_failed).
#[derive(Debug, Display, Error)]
#[display("failed to move {}: {source}", entry.display())]
pub struct MoveError {
    pub entry: PathBuf,
    pub source: io::Error,
    pub rollback_failed: Vec<PathBuf>,
}

impl MoveError {
    fn new(entry: PathBuf, source: io::Error) -> Self {
        Self {
            entry,
            source,
            rollback_failed: Vec::new(),
        }
    }

    /// Returns if the source directory is back in its state prior to the move.
    pub fn is_rolled_back(&self) -> bool {
        self.rollback_failed.is_empty()
    }
}

/// Moves all top level entries of `src` into `dst` except the ones named in `exclude`.
///
/// `dst` is created if missing. Every entry is moved with a single rename, so
/// both directories have to be located on the same filesystem.
pub fn move_dir_content(src: &Path, dst: &Path, exclude: &[&str]) -> Result<(), MoveError> {
    let entries = fs::read_dir(src).map_err(|e| MoveError::new(src.to_path_buf(), e))?;
    fs::create_dir_all(dst).map_err(|e| MoveError::new(dst.to_path_buf(), e))?;

    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
    for entry in entries {
        let name: OsString = match entry {
            Ok(entry) => entry.file_name(),
            Err(e) => return Err(rollback(moved, MoveError::new(src.to_path_buf(), e))),
        };
        if exclude.iter().any(|excluded| name == *excluded) {
            continue;
        }

        let from = src.join(&name);
        let to = dst.join(&name);
        log::trace!(target: "util::fs", "Move {} -> {}", from.display(), to.display());
        if let Err(e) = fs::rename(&from, &to) {
            return Err(rollback(moved, MoveError::new(from, e)));
        }
        moved.push((from, to));
    }

    Ok(())
}

fn rollback(moved: Vec<(PathBuf, PathBuf)>, mut error: MoveError) -> MoveError {
    for (from, to) in moved.into_iter().rev() {
        if let Err(e) = fs::rename(&to, &from) {
            log::warn!(target: "util::fs", "Rollback of {} failed: {e}", to.display());
            error.rollback_failed.push(to);
        }
    }
    error
}

/// Random alphanumeric suffix for staging file names.
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Temporary file or directory removed when dropped.
#[derive(Debug)]
pub struct TempPath {
    path: PathBuf,
}

impl TempPath {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarms the removal and returns the path.
    ///
    /// [`path`](Self::path) is empty afterwards.
    pub fn keep(&mut self) -> PathBuf {
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let res = match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&self.path),
            Ok(_) => fs::remove_file(&self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            log::debug!(target: "util::fs", "Failed to remove {}: {e}", self.path.display());
        }
    }
}
