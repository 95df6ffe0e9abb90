use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::app::RevertFailurePolicy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, global = true)]
    pub verbose: Option<LevelFilter>,

    /// Settings file. A default one is written if it doesn't exist.
    #[arg(long, short = 'c', env = "PB_BACKUP_CONFIG", default_value = "pb_backup.toml")]
    pub config: PathBuf,

    /// Data directory of the application.
    #[arg(long, short = 'd', env = "PB_BACKUP_DATA_DIR", default_value = "pb_data")]
    pub data_dir: PathBuf,

    /// Overrides the reaction to a restore that can't be reverted.
    #[arg(long)]
    pub on_revert_failure: Option<RevertFailurePolicy>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Backup the data directory.
    Backup(BackupArgs),
    /// Restore a backup and restart into `serve`.
    Restore(RestoreArgs),
    /// List the stored backups.
    List(ListArgs),
    /// Delete a stored backup.
    Delete(RestoreArgs),
    /// Run the automatic backups configured in the settings file.
    ///
    /// SIGHUP reloads the settings file, SIGINT and SIGTERM stop the service.
    Serve,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Name of the backup. Generated if omitted.
    #[arg(long, short = 'n')]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Name of the backup.
    pub name: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only list backups starting with the prefix.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Print the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_restore() {
        let cli = Cli::try_parse_from([
            "pb_backup",
            "--data-dir",
            "/srv/pb_data",
            "restore",
            "pb_backup_acme_20240101000000.zip",
            "--verbose",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, PathBuf::from("/srv/pb_data"));
        assert_eq!(cli.verbose, Some(LevelFilter::Debug));
        assert!(matches!(
            cli.action,
            Action::Restore(RestoreArgs { ref name }) if name == "pb_backup_acme_20240101000000.zip"
        ));
    }

    #[test]
    fn parses_revert_policy() {
        let cli = Cli::try_parse_from(["pb_backup", "--on-revert-failure", "error", "serve"]).unwrap();
        assert_eq!(cli.on_revert_failure, Some(RevertFailurePolicy::Error));
        assert!(matches!(cli.action, Action::Serve));
    }
}
