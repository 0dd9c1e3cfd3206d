use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::parse_instant;

const DUE_SOON_DAYS: f64 = 30.0;
const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum CheckupStatus {
    Overdue,
    DueSoon,
    UpToDate,
}

/// `last_done` plus `frequency_months` calendar months. A day that does not
/// exist in the target month is clamped to that month's last day.
pub fn next_due_date(last_done: &str, frequency_months: u32) -> Option<DateTime<Utc>> {
    parse_instant(last_done)?.checked_add_months(Months::new(frequency_months))
}

/// Never done (or unreadable) counts as overdue.
pub fn checkup_status(
    last_done: Option<&str>,
    frequency_months: u32,
    now: DateTime<Utc>,
) -> CheckupStatus {
    let Some(next_due) = last_done.and_then(|raw| next_due_date(raw, frequency_months)) else {
        return CheckupStatus::Overdue;
    };
    let days_until_due = (next_due - now).num_milliseconds() as f64 / MS_PER_DAY;
    if days_until_due < 0.0 {
        CheckupStatus::Overdue
    } else if days_until_due <= DUE_SOON_DAYS {
        CheckupStatus::DueSoon
    } else {
        CheckupStatus::UpToDate
    }
}

pub fn format_frequency(months: u32) -> String {
    match months {
        12 => "Every year".to_string(),
        m if m > 12 && m % 12 == 0 => format!("Every {} years", m / 12),
        m => format!("Every {m} months"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn month_add_clamps_to_month_end() {
        let due = next_due_date("2024-01-31T00:00:00.000Z", 1).unwrap();
        assert_eq!(due, at(2024, 2, 29));
        let due = next_due_date("2023-08-31", 6).unwrap();
        assert_eq!(due, at(2024, 2, 29));
    }

    #[test]
    fn status_thresholds() {
        let now = at(2024, 6, 1);
        assert_eq!(checkup_status(None, 12, now), CheckupStatus::Overdue);
        assert_eq!(checkup_status(Some("2023-05-01"), 12, now), CheckupStatus::Overdue);
        assert_eq!(checkup_status(Some("2023-06-20"), 12, now), CheckupStatus::DueSoon);
        assert_eq!(checkup_status(Some("2023-07-01"), 12, now), CheckupStatus::DueSoon);
        assert_eq!(checkup_status(Some("2023-07-02"), 12, now), CheckupStatus::UpToDate);
        assert_eq!(checkup_status(Some("garbage"), 12, now), CheckupStatus::Overdue);
    }

    #[test]
    fn frequency_labels() {
        assert_eq!(format_frequency(6), "Every 6 months");
        assert_eq!(format_frequency(12), "Every year");
        assert_eq!(format_frequency(24), "Every 2 years");
        assert_eq!(format_frequency(18), "Every 18 months");
    }

    #[test]
    fn status_serialises_kebab_case() {
        assert_eq!(
            serde_json::to_string(&CheckupStatus::DueSoon).unwrap(),
            "\"due-soon\""
        );
    }
}
