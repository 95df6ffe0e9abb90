//! Write serialization of the databases living in the data directory.

use std::sync::{Mutex, MutexGuard};

use crate::error::BackupError;

/// A database whose writers can be held off while its files are archived.
///
/// Implementations must block concurrent writers while `f` runs. Readers
/// must stay unaffected.
pub trait WriteBarrier: Send + Sync {
    fn run_exclusive(
        &self,
        f: &mut dyn FnMut() -> Result<(), BackupError>,
    ) -> Result<(), BackupError>;
}

/// Single writer gate shared by all writers of a database.
///
/// Every write of the application goes through [`write`](Self::write). The
/// snapshot takes the same gate, so writes wait until the archive is complete.
#[derive(Debug, Default)]
pub struct WriteGate {
    gate: Mutex<()>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs the write `f` once no snapshot or other write is in progress.
    pub fn write<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.lock();
        f()
    }
}

impl WriteBarrier for WriteGate {
    fn run_exclusive(
        &self,
        f: &mut dyn FnMut() -> Result<(), BackupError>,
    ) -> Result<(), BackupError> {
        let _guard = self.lock();
        f()
    }
}

/// Runs `f` with all `barriers` held, acquired in order and released in reverse.
pub fn run_exclusive_all(
    barriers: &[std::sync::Arc<dyn WriteBarrier>],
    f: &mut dyn FnMut() -> Result<(), BackupError>,
) -> Result<(), BackupError> {
    match barriers.split_first() {
        None => f(),
        Some((first, rest)) => first.run_exclusive(&mut || run_exclusive_all(rest, &mut *f)),
    }
}
