//! Pure views computed from replicated data. Nothing here is stored.

pub mod checkup;
pub mod cycle;

use chrono::{DateTime, NaiveDate, Utc};

use crate::model::HealthEntry;

pub use checkup::{checkup_status, format_frequency, next_due_date, CheckupStatus};
pub use cycle::{period_duration, predict_cycle, CyclePrediction};

/// Accepts a full RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    parse_day(raw).and_then(|day| day.and_hms_opt(0, 0, 0)).map(|naive| naive.and_utc())
}

/// Calendar day from `YYYY-MM-DD`, ignoring any time suffix.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Entries newest first, the order they are listed in.
pub fn newest_first(entries: &[HealthEntry]) -> Vec<HealthEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    sorted
}
