#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pb_backup_lib::app::{App, Restart, RestartError, Settings, SettingsStore, BACKUPS_DIR, TEMP_DIR};
use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartMode {
    Succeed,
    Fail,
    /// Replaces the extraction dir with a file before failing, so the revert fails too.
    FailAndBreakRevert,
}

/// Records restarts instead of replacing the test process.
#[derive(Clone, Debug)]
pub struct FakeRestart {
    pub calls: Arc<AtomicUsize>,
    mode: RestartMode,
    temp_dir: PathBuf,
}

impl FakeRestart {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Restart for FakeRestart {
    fn restart(&self) -> Result<(), RestartError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            RestartMode::Succeed => Ok(()),
            RestartMode::Fail => Err(RestartError::Exec(io::Error::other("exec failed"))),
            RestartMode::FailAndBreakRevert => {
                for entry in fs::read_dir(&self.temp_dir).unwrap() {
                    let path = entry.unwrap().path();
                    let is_extracted = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("pb_restore_"));
                    if is_extracted && path.is_dir() {
                        fs::remove_dir_all(&path).unwrap();
                        fs::write(&path, b"in the way").unwrap();
                    }
                }
                Err(RestartError::Exec(io::Error::other("exec failed")))
            }
        }
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub data_dir: PathBuf,
    pub app: Arc<App>,
    pub restart: FakeRestart,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(Settings::default(), RestartMode::Succeed)
    }

    pub fn with(settings: Settings, mode: RestartMode) -> Self {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("pb_data");
        populate(&data_dir);

        let restart = FakeRestart {
            calls: Arc::new(AtomicUsize::new(0)),
            mode,
            temp_dir: data_dir.join(TEMP_DIR),
        };
        let app = Arc::new(App::with_local_store(
            data_dir.clone(),
            Arc::new(SettingsStore::new(settings)),
            Box::new(restart.clone()),
        ));

        Self {
            tmp,
            data_dir,
            app,
            restart,
        }
    }

    pub fn tree(&self) -> BTreeMap<String, Vec<u8>> {
        tree(&self.data_dir)
    }

    /// Files of the staging dir, excluding nested content.
    pub fn temp_entries(&self) -> Vec<String> {
        match fs::read_dir(self.data_dir.join(TEMP_DIR)) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Writes a small data directory with a database and uploaded files.
pub fn populate(data_dir: &Path) {
    fs::create_dir_all(data_dir.join("storage/posts/rec1")).unwrap();
    fs::create_dir_all(data_dir.join("storage/empty")).unwrap();
    fs::create_dir_all(data_dir.join(BACKUPS_DIR)).unwrap();
    fs::write(data_dir.join("data.db"), b"SQLite format 3\0 main").unwrap();
    fs::write(data_dir.join("logs.db"), b"SQLite format 3\0 logs").unwrap();
    fs::write(data_dir.join("storage/posts/rec1/cover.png"), vec![42u8; 10_000]).unwrap();
}

/// Content of `dir` except the reserved directories. Directories map to an empty value.
pub fn tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || (e.file_name() != BACKUPS_DIR && e.file_name() != TEMP_DIR))
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().replace('\\', "/");
            if e.file_type().is_dir() {
                (format!("{rel}/"), Vec::new())
            } else {
                (rel, fs::read(e.path()).unwrap())
            }
        })
        .collect()
}
