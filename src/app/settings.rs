//! Live application settings relevant to backups.

use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, RwLock};

use clap::ValueEnum;
use derive_more::{Display, Error, From};

/// Settings of the application.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the application, part of generated backup names.
    pub app_name: String,

    /// Backup related settings.
    pub backups: BackupsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Acme".to_string(),
            backups: BackupsSettings::default(),
        }
    }
}

/// Settings of the automatic backups.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BackupsSettings {
    /// Cron expression of the automatic backups, e.g. `0 0 * * *`.
    ///
    /// Automatic backups are disabled if empty.
    pub cron: String,

    /// How many automatic backups to keep.
    ///
    /// `0` keeps every automatic backup.
    pub cron_max_keep: usize,

    /// What to do when a failed restore can't be reverted.
    pub on_revert_failure: RevertFailurePolicy,
}

/// Reaction to a restore that failed and couldn't be reverted either.
///
/// The data directory is left in an unknown state in both cases.
#[derive(
    Copy, Clone, ValueEnum, Debug, Display, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RevertFailurePolicy {
    /// Abort with an [`UnrecoverableState`](crate::error::UnrecoverableState) panic.
    #[default]
    #[display("abort")]
    Abort,
    /// Return [`BackupError::Unrecoverable`](crate::error::BackupError::Unrecoverable).
    ///
    /// Only safe if a supervisor takes care of the process.
    #[display("error")]
    Error,
}

/// Revert failure policy is unknown.
#[derive(Debug, Display, Error)]
#[display("Revert failure policy is unknown: {_0}")]
pub struct UnknownRevertFailurePolicy(#[error(ignore)] String);

impl FromStr for RevertFailurePolicy {
    type Err = UnknownRevertFailurePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "error" => Ok(Self::Error),
            other => Err(UnknownRevertFailurePolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors on reading or writing the settings file.
pub enum SettingsError {
    #[from]
    #[display("{_0}")]
    Io(io::Error),
    #[from]
    #[display("invalid settings: {_0}")]
    Parse(toml::de::Error),
    #[from]
    #[display("settings not serializable: {_0}")]
    Serialize(toml::ser::Error),
}

impl Settings {
    /// Reads the settings from the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Writes the settings as TOML to `path`.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

type Listener = Box<dyn Fn(&Settings) + Send + Sync>;

/// Observable holder of the current [Settings].
#[derive(Default)]
pub struct SettingsStore {
    current: RwLock<Settings>,
    listeners: Mutex<Vec<Listener>>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("current", &self.get())
            .finish_non_exhaustive()
    }
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(settings),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the settings and notifies all subscribers.
    ///
    /// Nothing happens if `settings` equals the current settings. Returns if
    /// the settings changed.
    pub fn update(&self, settings: Settings) -> bool {
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            if *current == settings {
                return false;
            }
            *current = settings.clone();
        }

        log::debug!(target: "app::settings", "Settings changed: {settings:?}");
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(&settings);
        }

        true
    }

    /// Reads the settings file at `path` again and publishes it with [`update`](Self::update).
    ///
    /// `adjust` applies overrides that don't live in the file. On error the
    /// current settings stay in place.
    pub fn reload(
        &self,
        path: &Path,
        adjust: impl FnOnce(&mut Settings),
    ) -> Result<bool, SettingsError> {
        let mut settings = Settings::load(path)?;
        adjust(&mut settings);
        log::info!(target: "app::settings", "Reloaded settings from {}", path.display());

        Ok(self.update(settings))
    }

    /// Registers `listener` to be called after every change of the settings.
    pub fn subscribe(&self, listener: impl Fn(&Settings) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }
}
