//! Periodic backups driven by the cron expression of the live settings.

use std::collections::BTreeSet;
use std::io;
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::app::{App, AUTO_BACKUP_PREFIX};
use crate::context::Context;
use crate::util::retention::{self, RetentionReport};

/// Parses a cron expression.
///
/// Besides the formats of [Schedule] the classic five field format with
/// minute precision is accepted. Its day of week field counts from `0`
/// (Sunday) to `6`, with `7` as an alias of Sunday.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if expr.starts_with('@') || fields.len() != 5 {
        return Schedule::from_str(expr);
    }

    let weekdays = weekday_field(fields[4]);
    Schedule::from_str(&format!("0 {} {weekdays}", fields[..4].join(" ")))
}

/// Rewrites a classic day of week field to the `1` (Sunday) to `7` numbering
/// of the `cron` crate.
///
/// Numeric items are expanded into explicit days. Names and malformed items
/// are kept for the parser to accept or reject.
fn weekday_field(field: &str) -> String {
    field
        .split(',')
        .map(|item| match classic_weekdays(item) {
            Some(days) => days
                .iter()
                .map(|day| (day + 1).to_string())
                .collect::<Vec<_>>()
                .join(","),
            None => item.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Days (`0` = Sunday) of a numeric list item like `3`, `1-5`, `*/2` or `1-7/3`.
fn classic_weekdays(item: &str) -> Option<BTreeSet<u32>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None if item == "*" || item == "?" => return None,
        None => (item, 1),
    };

    let (first, last) = match range.split_once('-') {
        _ if range == "*" => (0, 6),
        Some((first, last)) => (first.parse::<u32>().ok()?, last.parse::<u32>().ok()?),
        // `n/step` runs until the end of the week
        None if item.contains('/') => (range.parse::<u32>().ok()?, 6),
        None => {
            let day = range.parse::<u32>().ok()?;
            (day, day)
        }
    };
    if first > last || last > 7 {
        return None;
    }

    Some((first..=last).step_by(step).map(|day| day % 7).collect())
}

/// Thread running a job at every time of a [Schedule].
#[derive(Debug)]
pub struct Ticker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawns the timer thread.
    pub fn start(schedule: Schedule, job: impl Fn() + Send + 'static) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("autobackup".to_string())
            .spawn(move || {
                let mut last: Option<DateTime<Utc>> = None;
                loop {
                    let now = Utc::now();
                    let from = last.filter(|last| *last > now).unwrap_or(now);
                    let Some(next) = schedule.after(&from).next() else {
                        log::debug!(target: "backup::cron", "Schedule has no upcoming time");
                        return;
                    };

                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    match stopped.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            last = Some(next);
                            job();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })?;

        Ok(Self { stop, handle })
    }

    /// Stops the timer thread. A running job is waited for.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            log::error!(target: "backup::cron", "Autobackup thread panicked");
        }
    }
}

#[derive(Debug, Default)]
struct State {
    serving: bool,
    ticker: Option<Ticker>,
}

/// Binds the automatic backups of an [App] to its settings.
///
/// The job is (re)installed when the app starts serving and whenever the
/// settings change.
#[derive(Debug)]
pub struct AutoBackup {
    app: Arc<App>,
    state: Mutex<State>,
}

impl AutoBackup {
    /// Creates the binding and subscribes it to settings changes of `app`.
    pub fn register(app: Arc<App>) -> Arc<Self> {
        let autobackup = Arc::new(Self {
            app: Arc::clone(&app),
            state: Mutex::new(State::default()),
        });

        let weak: Weak<Self> = Arc::downgrade(&autobackup);
        app.settings().subscribe(move |_| {
            if let Some(autobackup) = weak.upgrade() {
                autobackup.on_settings_change();
            }
        });

        autobackup
    }

    /// The app started serving requests.
    pub fn on_serve(&self) {
        let mut state = self.lock_state();
        state.serving = true;
        self.load_job(&mut state);
    }

    /// The settings of the app changed.
    pub fn on_settings_change(&self) {
        let mut state = self.lock_state();
        self.load_job(&mut state);
    }

    /// The app terminates, the ticker is stopped for good.
    pub fn terminate(&self) {
        let mut state = self.lock_state();
        state.serving = false;
        if let Some(ticker) = state.ticker.take() {
            ticker.stop();
        }
    }

    /// Returns if a periodic job is installed.
    pub fn is_scheduled(&self) -> bool {
        self.lock_state().ticker.is_some()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load_job(&self, state: &mut State) {
        if let Some(ticker) = state.ticker.take() {
            ticker.stop();
        }

        let raw_schedule = self.app.settings().get().backups.cron;
        if raw_schedule.trim().is_empty() || !state.serving || !self.app.is_bootstrapped() {
            log::debug!(target: "backup::cron", "Autobackup disabled");
            return;
        }

        let schedule = match parse_schedule(&raw_schedule) {
            Ok(schedule) => schedule,
            Err(e) => {
                log::error!(target: "backup::cron", "Invalid backup cron expression {raw_schedule:?}: {e}");
                return;
            }
        };

        let app = Arc::clone(&self.app);
        match Ticker::start(schedule, move || {
            run_job(&app);
        }) {
            Ok(ticker) => {
                log::info!(target: "backup::cron", "Scheduled autobackup: {raw_schedule}");
                state.ticker = Some(ticker);
            }
            Err(e) => log::error!(target: "backup::cron", "Failed to start the autobackup ticker: {e}"),
        }
    }
}

impl Drop for AutoBackup {
    fn drop(&mut self) {
        if let Some(ticker) = self.lock_state().ticker.take() {
            ticker.stop();
        }
    }
}

/// Runs a single automatic backup followed by the retention sweep.
///
/// Errors are logged and never propagated. Returns the retention report if
/// a sweep was performed.
pub fn run_job(app: &App) -> Option<RetentionReport> {
    let name = app.generate_backup_name(AUTO_BACKUP_PREFIX);

    if let Err(e) = app.create_backup(&Context::background(), &name) {
        log::error!(target: "backup::cron", "Failed to create backup {name}: {e}");
        return None;
    }

    let max_keep = app.settings().get().backups.cron_max_keep;
    if max_keep == 0 {
        return None; // no explicit limit
    }

    match retention::sweep(app.store(), AUTO_BACKUP_PREFIX, max_keep) {
        Ok(report) => {
            if !report.deleted.is_empty() {
                log::info!(target: "backup::cron", "Removed {} old autobackup(s)", report.deleted.len());
            }
            Some(report)
        }
        Err(e) => {
            log::error!(target: "backup::cron", "Failed to list autogenerated backups: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Datelike, TimeZone, Weekday};

    #[test]
    fn five_field_expressions() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.timestamp() % 300, 0);

        assert!(parse_schedule("0 0 3 * * *").is_ok());
        assert!(parse_schedule("@daily").is_ok());
        assert!(parse_schedule("not a cron").is_err());
    }

    fn firing_days(expr: &str, count: usize) -> Vec<Weekday> {
        // a saturday
        let from = Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap();
        parse_schedule(expr)
            .unwrap()
            .after(&from)
            .take(count)
            .map(|t| t.weekday())
            .collect()
    }

    #[test]
    fn classic_weekday_numbering() {
        use Weekday::*;

        assert_eq!(firing_days("0 3 * * 1-5", 5), vec![Mon, Tue, Wed, Thu, Fri]);
        assert_eq!(firing_days("0 3 * * 0", 2), vec![Sun, Sun]);
        assert_eq!(firing_days("0 3 * * 7", 1), vec![Sun]);
        assert_eq!(firing_days("0 3 * * 5-7", 3), vec![Sat, Sun, Fri]);
        assert_eq!(firing_days("0 3 * * 0,3", 3), vec![Sun, Wed, Sun]);
        assert_eq!(firing_days("0 3 * * */2", 4), vec![Sat, Sun, Tue, Thu]);
        assert_eq!(firing_days("0 3 * * 1-5/2", 3), vec![Mon, Wed, Fri]);
        assert_eq!(firing_days("0 3 * * *", 2), vec![Sat, Sun]);

        let saturday = Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap();
        let next = parse_schedule("0 3 * * 0").unwrap().after(&saturday).next();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 5, 5, 3, 0, 0).unwrap()));

        assert!(parse_schedule("0 3 * * 8").is_err());
    }

    #[test]
    fn weekday_items() {
        assert_eq!(weekday_field("*"), "*");
        assert_eq!(weekday_field("0"), "1");
        assert_eq!(weekday_field("1-5"), "2,3,4,5,6");
        assert_eq!(weekday_field("6,7"), "7,1");
        assert_eq!(weekday_field("5/1"), "6,7");
        assert_eq!(weekday_field("MON-FRI"), "MON-FRI");
    }

    #[test]
    fn ticker_fires_until_stopped() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let ticker = Ticker::start(parse_schedule("* * * * * *").unwrap(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(2500));
        ticker.stop();
        let after_stop = fired.load(Ordering::SeqCst);
        assert!(after_stop >= 1, "ticker should have fired");

        thread::sleep(Duration::from_millis(1200));
        assert_eq!(fired.load(Ordering::SeqCst), after_stop);
    }
}
