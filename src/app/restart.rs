use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use derive_more::{Display, Error, From};

#[derive(Debug, Display, Error, From)]
/// Errors on restarting the application process.
pub enum RestartError {
    /// The platform can't replace the running process.
    #[display("process restart is not supported on this platform")]
    Unsupported,
    /// Replacing the process image failed.
    #[from]
    #[display("{_0}")]
    Exec(io::Error),
}

/// Restarts the running application so it picks up a swapped data directory.
pub trait Restart: Send + Sync {
    /// Restarts the application.
    ///
    /// Returning at all means the old process keeps running. On success the
    /// call may never return.
    fn restart(&self) -> Result<(), RestartError>;
}

/// Replaces the current process with a fresh instance of an executable.
#[derive(Debug, Clone)]
pub struct ExecRestart {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecRestart {
    pub fn new(program: PathBuf, args: Vec<OsString>) -> Self {
        Self { program, args }
    }

    /// Restart the currently running executable with `args`.
    pub fn current_exe(args: Vec<OsString>) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    /// Restart the currently running executable with its original arguments.
    pub fn current_process() -> io::Result<Self> {
        Self::current_exe(std::env::args_os().skip(1).collect())
    }
}

impl Restart for ExecRestart {
    #[cfg(unix)]
    fn restart(&self) -> Result<(), RestartError> {
        use std::os::unix::process::CommandExt;
        use std::process::Command;

        log::info!(target: "app", "Restarting {}", self.program.display());
        // exec only returns on failure
        let err = Command::new(&self.program).args(&self.args).exec();
        Err(RestartError::Exec(err))
    }

    #[cfg(not(unix))]
    fn restart(&self) -> Result<(), RestartError> {
        Err(RestartError::Unsupported)
    }
}
