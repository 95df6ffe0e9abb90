use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use pb_backup_lib::app::{App, ExecRestart, Settings, SettingsStore};
use pb_backup_lib::autobackup::AutoBackup;
use pb_backup_lib::cli::{Action, BackupArgs, Cli, ListArgs, RestoreArgs};
use pb_backup_lib::context::Context;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let mut settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            if std::fs::exists(&cli.config).is_ok_and(|b| !b) {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    cli.config.display()
                );
                let default_settings = Settings::default();
                if let Err(e) = default_settings.save(&cli.config) {
                    log::warn!("Writing default config to {} failed {e}", cli.config.display());
                }

                default_settings
            } else {
                log::error!("Reading the config file failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    };
    if let Some(policy) = cli.on_revert_failure {
        settings.backups.on_revert_failure = policy;
    }

    // a restored data dir is picked up by serving it from a fresh process
    let restart_args: Vec<OsString> = vec![
        "--config".into(),
        cli.config.clone().into(),
        "--data-dir".into(),
        cli.data_dir.clone().into(),
        "serve".into(),
    ];
    let restart = match ExecRestart::current_exe(restart_args) {
        Ok(restart) => restart,
        Err(e) => {
            log::error!("Locating the current executable failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let app = Arc::new(App::with_local_store(
        cli.data_dir,
        Arc::new(SettingsStore::new(settings)),
        Box::new(restart),
    ));
    let ctx = Context::background();

    match cli.action {
        Action::Backup(BackupArgs { name }) => {
            match app.create_backup(&ctx, name.as_deref().unwrap_or_default()) {
                Ok(name) => println!("{name}"),
                Err(e) => {
                    log::error!(target: "backup::snapshot", "Backup failed ({}): {e}", e.class());
                    return ExitCode::FAILURE;
                }
            }
        }
        Action::Restore(RestoreArgs { name }) => {
            // only returns if the process wasn't replaced
            if let Err(e) = app.restore_backup(&ctx, &name) {
                log::error!(target: "backup::restore", "Restore of {name} failed ({}): {e}", e.class());
                return ExitCode::FAILURE;
            }
        }
        Action::List(ListArgs { prefix, json }) => {
            let mut backups = match app.store().list(&prefix) {
                Ok(backups) => backups,
                Err(e) => {
                    log::error!(target: "backends", "Listing backups failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            backups.sort_by(|a, b| b.modified.cmp(&a.modified));

            if json {
                match serde_json::to_string_pretty(&backups) {
                    Ok(out) => println!("{out}"),
                    Err(e) => {
                        log::error!("Serializing the backup list failed: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                for backup in backups {
                    println!("{}\t{}\t{}", backup.modified.to_rfc3339(), backup.size, backup.key);
                }
            }
        }
        Action::Delete(RestoreArgs { name }) => {
            if let Err(e) = app.store().delete(&name) {
                log::error!(target: "backends", "Deleting {name} failed: {e}");
                return ExitCode::FAILURE;
            }
        }
        Action::Serve => {
            if let Err(e) = app.bootstrap() {
                log::error!(target: "app", "Bootstrapping failed: {e}");
                return ExitCode::FAILURE;
            }

            let mut signals = match Signals::new([SIGHUP, SIGINT, SIGTERM]) {
                Ok(signals) => signals,
                Err(e) => {
                    log::error!(target: "app", "Signal handler setup failed: {e}");
                    return ExitCode::FAILURE;
                }
            };

            let autobackup = AutoBackup::register(Arc::clone(&app));
            autobackup.on_serve();
            log::info!(target: "app", "Serving {}", app.data_dir().display());

            let policy = cli.on_revert_failure;
            for signal in signals.forever() {
                if signal != SIGHUP {
                    log::info!(target: "app", "Terminating on signal {signal}");
                    autobackup.terminate();
                    break;
                }

                let reloaded = app.settings().reload(&cli.config, |settings| {
                    if let Some(policy) = policy {
                        settings.backups.on_revert_failure = policy;
                    }
                });
                match reloaded {
                    Ok(true) => {}
                    Ok(false) => log::debug!(target: "app::settings", "Settings unchanged"),
                    Err(e) => log::error!(
                        target: "app::settings",
                        "Reloading {} failed, keeping the current settings: {e}",
                        cli.config.display()
                    ),
                }
            }
        }
    }

    ExitCode::SUCCESS
}
