use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot parse `{0}` as a timestamp")]
pub struct TimestampError(pub String);

const SECONDS_PER_DAY: f64 = 86_400.0;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a calendar timestamp
///
/// Accepts RFC 3339 strings (the offset is dropped, the wall-clock time is kept), date-times
/// with a space or `T` separator with or without seconds, and bare dates which are taken as
/// midnight.
///
/// # Errors
/// Returns a [`TimestampError`] if none of the accepted forms match.
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime, TimestampError> {
    let trimmed = input.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(with_offset.naive_local());
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| TimestampError(input.to_owned()))
}

/// Fractional day of year of a timestamp
///
/// The count starts at zero at midnight on the first of January. Sub-second precision is
/// discarded.
#[must_use]
pub fn day_of_year(timestamp: &NaiveDateTime) -> f64 {
    f64::from(timestamp.ordinal0())
        + f64::from(timestamp.hour()) / 24.
        + f64::from(timestamp.minute()) / 1440.
        + f64::from(timestamp.second()) / SECONDS_PER_DAY
}

/// Timestamp corresponding to the fractional `day_of_year` of `year`
///
/// Returns `None` if `day_of_year` is not finite or the result falls outside the range chrono
/// can represent.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn from_day_of_year(year: i32, day_of_year: f64) -> Option<NaiveDateTime> {
    if !day_of_year.is_finite() {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let milliseconds = (day_of_year * SECONDS_PER_DAY * 1e3).round();
    if milliseconds.abs() > i64::MAX as f64 {
        return None;
    }
    start.checked_add_signed(Duration::milliseconds(milliseconds as i64))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{day_of_year, from_day_of_year, parse_timestamp};

    #[test]
    fn accepted_timestamp_forms_parse_to_the_same_instant() {
        let expected = NaiveDate::from_ymd_opt(2017, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();

        for input in [
            "2017-05-01 12:30:00",
            "2017-05-01T12:30:00",
            "2017-05-01 12:30",
            "2017-05-01T12:30",
            "2017-05-01T12:30:00+00:00",
            " 2017-05-01 12:30:00 ",
        ] {
            assert_eq!(parse_timestamp(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn bare_dates_are_midnight() {
        let parsed = parse_timestamp("2017-01-02").unwrap();
        approx::assert_relative_eq!(day_of_year(&parsed), 1.0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_timestamp("first of may").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn day_of_year_is_zero_based_and_fractional() {
        let timestamp = NaiveDate::from_ymd_opt(2017, 2, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        // 31 days of January elapsed, plus a quarter day
        approx::assert_relative_eq!(day_of_year(&timestamp), 31.25);
    }

    #[test]
    fn day_of_year_survives_a_trip_through_a_timestamp() {
        let timestamp = from_day_of_year(2016, 100.5).unwrap();
        assert_eq!(
            timestamp,
            NaiveDate::from_ymd_opt(2016, 4, 10)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        );
        approx::assert_relative_eq!(day_of_year(&timestamp), 100.5);
    }

    #[test]
    fn non_finite_day_of_year_has_no_timestamp() {
        assert!(from_day_of_year(2016, f64::NAN).is_none());
        assert!(from_day_of_year(2016, f64::INFINITY).is_none());
    }
}
