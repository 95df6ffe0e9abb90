//! Library to backup and restore the data directory of a running application.
//!
//! The data directory holds the application database (`data.db`) next to
//! uploaded files. Backups are zip archives of the whole directory kept in a
//! [`BackupStore`](backends::BackupStore). The operations live on
//! [`App`](app::App):
//!
//! - [`create_backup`](app::App::create_backup) archives the directory while
//!   database writes are held off.
//! - [`restore_backup`](app::App::restore_backup) swaps the directory with a
//!   backup, restarts the process and reverts on failure.
//!
//! Only one of them runs at a time. Automatic backups and their retention are
//! handled by [`AutoBackup`](autobackup::AutoBackup).

#![forbid(unsafe_code)]

pub mod app;
pub mod archive;
pub mod autobackup;
pub mod backends;
pub mod cli;
pub mod context;
pub mod db;
pub mod error;
pub mod lock;
pub mod util;
