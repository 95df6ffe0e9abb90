//! Exclusive slot for the running backup or restore operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Guards that at most one backup or restore runs at a time.
///
/// Acquiring never blocks. A second caller is rejected while the slot is held.
#[derive(Debug, Default)]
pub struct OperationLock {
    held: AtomicBool,
    name: Mutex<Option<String>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the slot for the operation `name`.
    ///
    /// Returns [None] if another operation holds the slot. The slot is
    /// released once the returned [OperationGuard] is dropped.
    pub fn try_acquire(&self, name: &str) -> Option<OperationGuard<'_>> {
        // the name is written before a rejected caller can observe the slot as held
        let mut active = self.lock_name();
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        *active = Some(name.to_string());
        drop(active);
        log::trace!(target: "lock", "Acquired operation lock for {name}");

        Some(OperationGuard { lock: self })
    }

    /// Name of the running operation, if any.
    pub fn active(&self) -> Option<String> {
        let active = self.lock_name();
        if !self.held.load(Ordering::Acquire) {
            return None;
        }
        active.clone()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn lock_name(&self) -> MutexGuard<'_, Option<String>> {
        self.name.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self) {
        let mut active = self.lock_name();
        let name = active.take();
        self.held.store(false, Ordering::Release);
        drop(active);
        log::trace!(target: "lock", "Released operation lock of {}", name.unwrap_or_default());
    }
}

/// Holds the [OperationLock] until dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct OperationGuard<'a> {
    lock: &'a OperationLock,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
