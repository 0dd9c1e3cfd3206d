use chrono::{DateTime, SecondsFormat, Utc};

/// Current instant as `YYYY-MM-DDTHH:MM:SS.sssZ`, the shape stored for
/// checkup completions and family creation markers.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(now_iso().as_str() > "2020-01-01T00:00:00.000Z");
    }

    #[test]
    fn iso_uses_millis_and_zulu() {
        let instant = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_iso(instant), "2023-11-14T22:13:20.123Z");
    }
}
