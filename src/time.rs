//! JST/UTC conversion helpers (spec.md §3.1, §4.1, §4.6). The engine stores everything in UTC;
//! JST (`Asia/Tokyo`, a fixed UTC+09:00 offset with no DST) is only used for (a) interpreting
//! naive timestamps read from the legacy on-disk format and (b) the alert scheduler's
//! minute-resolution key.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const JST: Tz = Tz::Asia__Tokyo;

/// A minute-resolution JST calendar key, e.g. `"2024-08-15T12:25"` (spec.md §4.6). Seconds are
/// discarded: any two instants with the same floor-to-minute JST time produce the same key.
pub fn minute_key(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&JST).format("%Y-%m-%dT%H:%M").to_string()
}

/// Interprets a naive (timezone-less) timestamp read from disk as JST and converts it to UTC.
/// Used for the legacy on-disk format, where timestamps were written without an offset
/// (spec.md §4.1's "naive timestamp is interpreted as JST").
pub fn naive_as_jst_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    JST.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_minute_key_truncates_seconds() {
        let a = Utc.with_ymd_and_hms(2024, 8, 15, 3, 25, 0).unwrap(); // 12:25 JST
        let b = Utc.with_ymd_and_hms(2024, 8, 15, 3, 25, 38).unwrap(); // same minute
        assert_eq!(minute_key(a), "2024-08-15T12:25");
        assert_eq!(minute_key(a), minute_key(b));
    }

    #[test]
    fn test_naive_as_jst_to_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 8, 15)
            .unwrap()
            .and_hms_opt(12, 25, 0)
            .unwrap();
        let utc = naive_as_jst_to_utc(naive).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 8, 15, 3, 25, 0).unwrap());
    }
}
