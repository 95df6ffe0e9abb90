//! Generation of backup names.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Longest app name portion of a generated backup name, in characters.
pub const MAX_APP_NAME_LEN: usize = 50;

/// Converts `s` to snake case.
///
/// Words are split at any character other than an ASCII letter or digit and
/// at the transition from a lower case to an upper case letter. Non ASCII
/// letters act as separators.
pub fn snakecase(s: &str) -> String {
    static SPLIT: OnceLock<Regex> = OnceLock::new();
    let split = SPLIT.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("split regex is valid"));

    let mut result = String::with_capacity(s.len());
    for word in split.split(s).filter(|w| !w.is_empty()) {
        if !result.is_empty() {
            result.push('_');
        }

        let mut prev_upper = true;
        for c in word.chars() {
            if c.is_ascii_uppercase() && !prev_upper {
                result.push('_');
            }
            prev_upper = c.is_ascii_uppercase();
            result.push(c);
        }
    }

    result.to_lowercase()
}

/// Generates `<prefix><app_name>_<YYYYMMDDhhmmss>.zip`.
///
/// The app name is snake cased and cut to [`MAX_APP_NAME_LEN`] characters.
pub fn generate_backup_name(prefix: &str, app_name: &str, now: DateTime<Utc>) -> String {
    let app_name: String = snakecase(app_name).chars().take(MAX_APP_NAME_LEN).collect();

    format!("{prefix}{app_name}_{}.zip", now.format("%Y%m%d%H%M%S"))
}
