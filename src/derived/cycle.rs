use chrono::{Duration, NaiveDate};
use serde::Serialize;

use super::parse_day;
use crate::model::{CycleSettings, OvulationLog, PeriodLog, PeriodRecord};

pub const DEFAULT_CYCLE_LENGTH: u32 = 28;
const LUTEAL_PHASE_DAYS: i64 = 14;
const MAX_PLAUSIBLE_GAP_DAYS: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CyclePrediction {
    pub average_cycle_length: u32,
    pub next_period: Option<NaiveDate>,
    pub ovulation: Option<NaiveDate>,
    /// Inclusive.
    pub fertile_window: Option<(NaiveDate, NaiveDate)>,
}

/// Period logs, oldest start first.
pub fn period_logs(records: &[PeriodRecord]) -> Vec<&PeriodLog> {
    let mut logs: Vec<&PeriodLog> = records
        .iter()
        .filter_map(|record| match record {
            PeriodRecord::Period(log) => Some(log),
            _ => None,
        })
        .collect();
    logs.sort_by(|a, b| a.start_date.cmp(&b.start_date));
    logs
}

/// Ovulation logs, most recent first.
pub fn ovulation_logs(records: &[PeriodRecord]) -> Vec<&OvulationLog> {
    let mut logs: Vec<&OvulationLog> = records
        .iter()
        .filter_map(|record| match record {
            PeriodRecord::Ovulation(log) => Some(log),
            _ => None,
        })
        .collect();
    logs.sort_by(|a, b| b.date.cmp(&a.date));
    logs
}

/// The settings record with the greatest id.
pub fn cycle_settings(records: &[PeriodRecord]) -> Option<&CycleSettings> {
    records
        .iter()
        .filter_map(|record| match record {
            PeriodRecord::Settings(settings) => Some(settings),
            _ => None,
        })
        .max_by(|a, b| a.id.cmp(&b.id))
}

/// Rounded mean of the gaps between consecutive starts, counting only gaps
/// strictly between 0 and 100 days. `fallback` when there are none.
pub fn average_cycle_length(logs: &[&PeriodLog], fallback: u32) -> u32 {
    let starts: Vec<Option<NaiveDate>> = logs.iter().map(|log| parse_day(&log.start_date)).collect();
    let gaps: Vec<i64> = starts
        .windows(2)
        .filter_map(|pair| match pair {
            [Some(prev), Some(curr)] => Some((*curr - *prev).num_days()),
            _ => None,
        })
        .filter(|gap| *gap > 0 && *gap < MAX_PLAUSIBLE_GAP_DAYS)
        .collect();
    if gaps.is_empty() {
        return fallback;
    }
    let mean = gaps.iter().sum::<i64>() as f64 / gaps.len() as f64;
    mean.round() as u32
}

pub fn predict_cycle(records: &[PeriodRecord]) -> CyclePrediction {
    let logs = period_logs(records);
    let fallback = cycle_settings(records)
        .map(|settings| settings.custom_cycle_length)
        .filter(|length| *length > 0)
        .unwrap_or(DEFAULT_CYCLE_LENGTH);
    let average = average_cycle_length(&logs, fallback);

    let next_period = logs
        .last()
        .and_then(|last| parse_day(&last.start_date))
        .map(|start| start + Duration::days(i64::from(average)));
    let ovulation = next_period.map(|next| next - Duration::days(LUTEAL_PHASE_DAYS));
    let fertile_window = ovulation.map(|day| (day - Duration::days(5), day + Duration::days(1)));

    CyclePrediction {
        average_cycle_length: average,
        next_period,
        ovulation,
        fertile_window,
    }
}

/// Days covered by a period log, inclusive. A missing end means one day.
pub fn period_duration(log: &PeriodLog) -> Option<i64> {
    let start = parse_day(&log.start_date)?;
    let end = if log.end_date.trim().is_empty() {
        start
    } else {
        parse_day(&log.end_date)?
    };
    Some((end - start).num_days() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(id: &str, start: &str, end: &str) -> PeriodRecord {
        PeriodRecord::Period(PeriodLog {
            id: id.into(),
            start_date: start.into(),
            end_date: end.into(),
            ..Default::default()
        })
    }

    fn settings(id: &str, length: u32) -> PeriodRecord {
        PeriodRecord::Settings(CycleSettings {
            id: id.into(),
            custom_cycle_length: length,
            ..Default::default()
        })
    }

    fn day(raw: &str) -> NaiveDate {
        parse_day(raw).unwrap()
    }

    #[test]
    fn averages_consecutive_gaps() {
        let records = vec![
            period("c", "2024-03-02", ""),
            period("a", "2024-01-01", "2024-01-05"),
            period("b", "2024-01-31", ""),
        ];
        // Gaps of 30 and 31 days round to 31.
        let prediction = predict_cycle(&records);
        assert_eq!(prediction.average_cycle_length, 31);
        assert_eq!(prediction.next_period, Some(day("2024-04-02")));
        assert_eq!(prediction.ovulation, Some(day("2024-03-19")));
        assert_eq!(
            prediction.fertile_window,
            Some((day("2024-03-14"), day("2024-03-20")))
        );
    }

    #[test]
    fn implausible_gaps_fall_back_to_latest_settings() {
        let records = vec![
            period("a", "2023-01-01", ""),
            period("b", "2024-01-01", ""),
            settings("s1", 30),
            settings("s2", 26),
        ];
        assert_eq!(predict_cycle(&records).average_cycle_length, 26);
    }

    #[test]
    fn defaults_without_data() {
        let prediction = predict_cycle(&[]);
        assert_eq!(prediction.average_cycle_length, DEFAULT_CYCLE_LENGTH);
        assert_eq!(prediction.next_period, None);
        assert_eq!(prediction.fertile_window, None);
    }

    #[test]
    fn duration_is_inclusive() {
        let PeriodRecord::Period(log) = period("a", "2024-01-01", "2024-01-05") else {
            unreachable!()
        };
        assert_eq!(period_duration(&log), Some(5));
        let PeriodRecord::Period(log) = period("a", "2024-01-01", "") else {
            unreachable!()
        };
        assert_eq!(period_duration(&log), Some(1));
    }

    #[test]
    fn ovulation_logs_most_recent_first() {
        let records = vec![
            PeriodRecord::Ovulation(OvulationLog {
                id: "o1".into(),
                date: "2024-01-14".into(),
                ..Default::default()
            }),
            PeriodRecord::Ovulation(OvulationLog {
                id: "o2".into(),
                date: "2024-02-14".into(),
                ..Default::default()
            }),
        ];
        assert_eq!(ovulation_logs(&records)[0].id, "o2");
    }
}
