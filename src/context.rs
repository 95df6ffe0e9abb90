//! Cooperative cancellation for long running backup and restore steps.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use derive_more::{Display, Error};

use crate::error::BackupError;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Marker error wrapped into [io::Error] when a copy got cancelled.
#[derive(Debug, Display, Error)]
#[display("operation cancelled")]
pub struct Cancelled;

/// Returns if `err` was produced by a cancelled [`Context::copy`].
pub fn is_cancellation(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Cancelled>())
}

/// Cancellation handle passed into every operation that touches the network
/// or does bulk I/O.
///
/// Clones share the same flag, so a caller can keep one clone and cancel the
/// operation running with the other.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::default()
    }

    /// Requests cancellation of all operations observing this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns [`BackupError::Cancelled`] once the context got cancelled.
    pub fn check(&self) -> Result<(), BackupError> {
        if self.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Like [io::copy] but checks for cancellation between chunks.
    pub fn copy<R, W>(&self, reader: &mut R, writer: &mut W) -> io::Result<u64>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written = 0;
        loop {
            if self.is_cancelled() {
                return Err(io::Error::other(Cancelled));
            }

            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(written),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buf[..n])?;
            written += n as u64;
        }
    }
}
