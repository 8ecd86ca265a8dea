//! Parsing of the application log's "Change by" lines.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tourist_core::SnapshotEntity;

use crate::HistoryError;

/// Short name the editor used for records it was told to remove.
const REMOVED_SHORT_NAME: &str = "remove";

/// Seconds between lines that still belong to the same edit.
const GROUP_WINDOW_SECS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LogChange {
    pub line: usize,
    pub issued_at: DateTime<Utc>,
    pub user_id: i64,
    pub entity: SnapshotEntity,
}

fn change_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[([\d:,. -]+)\].+Change by <User (\d+)>: (\{.+\})\s*$")
            .expect("change line pattern")
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replace(',', ".");
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Parses every non-blank line. Lines for removed records are dropped.
pub fn parse_change_log(text: &str) -> Result<Vec<LogChange>, HistoryError> {
    let mut changes = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let caps = change_line()
            .captures(raw)
            .ok_or_else(|| HistoryError::ChangeLogLine {
                line,
                text: raw.to_string(),
            })?;
        let issued_at = parse_timestamp(&caps[1]).ok_or_else(|| HistoryError::ChangeLogTimestamp {
            line,
            text: caps[1].to_string(),
        })?;
        let user_id: i64 = caps[2].parse().map_err(|_| HistoryError::ChangeLogLine {
            line,
            text: raw.to_string(),
        })?;
        let entity: SnapshotEntity = serde_json::from_str(&caps[3])
            .map_err(|source| HistoryError::ChangeLogEntity { line, source })?;
        if entity.short_name == REMOVED_SHORT_NAME {
            continue;
        }
        changes.push(LogChange {
            line,
            issued_at,
            user_id,
            entity,
        });
    }
    Ok(changes)
}

/// Groups consecutive changes by the same user where each is within one
/// second of the one before it.
pub fn group_changes(changes: Vec<LogChange>) -> Vec<Vec<LogChange>> {
    let mut groups: Vec<Vec<LogChange>> = Vec::new();
    let mut current: Vec<LogChange> = Vec::new();
    for change in changes {
        if let Some(prev) = current.last() {
            let gap = (change.issued_at - prev.issued_at).num_milliseconds().abs() as f64 / 1000.0;
            if gap > GROUP_WINDOW_SECS || change.user_id != prev.user_id {
                groups.push(std::mem::take(&mut current));
            }
        }
        current.push(change);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
