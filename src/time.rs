use hifitime::{Duration, Epoch};

use crate::constants::Seconds;
use crate::seisdd_errors::SeisddError;

/// Signed difference `a - b` in seconds.
pub fn seconds_between(a: Epoch, b: Epoch) -> Seconds {
    (a - b).to_seconds()
}

/// Shift an epoch by a signed amount of seconds.
pub fn add_seconds(epoch: Epoch, seconds: Seconds) -> Epoch {
    epoch + Duration::from_seconds(seconds)
}

/// Parse a catalog timestamp in the format YYYY-MM-DDTHH:mm:ss[.sss],
/// interpreted as UTC, truncated to millisecond resolution.
///
/// Argument
/// --------
/// * `text`: the timestamp string
///
/// Return
/// ------
/// * The parsed epoch, or `InvalidCatalog` when the string is malformed
pub fn parse_timestamp(text: &str) -> Result<Epoch, SeisddError> {
    let epoch: Epoch = text
        .parse()
        .map_err(|e| SeisddError::InvalidCatalog(format!("bad timestamp '{text}': {e}")))?;
    Ok(epoch.round(Duration::from_milliseconds(1.0)))
}

#[cfg(test)]
mod time_test {
    use super::*;

    #[test]
    fn test_seconds_between() {
        let t0 = parse_timestamp("2021-01-01T00:00:00").unwrap();
        let t1 = parse_timestamp("2021-01-01T00:00:01.500").unwrap();
        assert_eq!(seconds_between(t1, t0), 1.5);
        assert_eq!(seconds_between(t0, t1), -1.5);
    }

    #[test]
    fn test_add_seconds_round_trip() {
        let t0 = parse_timestamp("2021-06-15T12:30:00").unwrap();
        let t1 = add_seconds(t0, 42.125);
        assert_eq!(seconds_between(t1, t0), 42.125);
    }

    #[test]
    fn test_parse_truncates_to_millisecond() {
        let t = parse_timestamp("2021-01-01T00:00:00.1234").unwrap();
        let t0 = parse_timestamp("2021-01-01T00:00:00").unwrap();
        assert_eq!(seconds_between(t, t0), 0.123);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("not a date").is_err());
    }
}
