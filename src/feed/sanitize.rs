//! Per-field normalization of raw feed values.
//!
//! Every extracted field passes through exactly one of these functions; the
//! choice is made in the parser at compile time.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use super::types::PublishedAt;

/// Parses a feed date into a UTC timestamp plus the original offset.
///
/// Accepts RFC 2822 (RSS) and RFC 3339 (Atom) first, then a few common
/// deviations: a weekday that does not match the date, a named UTC zone,
/// a missing seconds field, or no zone at all (read as UTC).
pub fn parse_date(raw: &str) -> Option<PublishedAt> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(published(dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(published(dt));
    }

    let without_weekday = match s.split_once(',') {
        Some((day, rest)) if day.trim().chars().all(|c| c.is_ascii_alphabetic()) => rest.trim(),
        _ => s,
    };
    let zoned = utc_name_to_offset(without_weekday);

    for fmt in [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %B %Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(&zoned, fmt) {
            return Some(published(dt));
        }
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(without_weekday, fmt) {
            return Some(PublishedAt {
                timestamp: naive.and_utc().timestamp(),
                offset_secs: 0,
            });
        }
    }

    NaiveDate::parse_from_str(without_weekday, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| PublishedAt {
            timestamp: naive.and_utc().timestamp(),
            offset_secs: 0,
        })
}

fn published(dt: DateTime<FixedOffset>) -> PublishedAt {
    PublishedAt {
        timestamp: dt.timestamp(),
        offset_secs: dt.offset().local_minus_utc(),
    }
}

fn utc_name_to_offset(s: &str) -> String {
    for suffix in [" GMT", " UTC", " UT", " Z"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return format!("{stripped} +0000");
        }
    }
    s.to_string()
}

/// Parses an iTunes duration (`hh:mm:ss`, `mm:ss` or plain seconds).
pub fn parse_duration(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split(':').map(str::trim).collect();
    if parts.len() > 3 {
        return None;
    }

    let (last, leading) = parts.split_last()?;
    let seconds: f64 = last.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    let seconds = seconds.floor() as u64;
    if leading.is_empty() {
        return Some(seconds);
    }

    let mut total = 0u64;
    for part in leading {
        total = total.checked_mul(60)?.checked_add(part.parse::<u64>().ok()?)?;
    }
    total.checked_mul(60)?.checked_add(seconds)
}

/// Map key for a category label: lowercase with spaces removed.
pub fn category_key(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parses a non-negative integer such as an iTunes episode or season number.
pub fn parse_number(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rfc2822_with_offset() {
        let p = parse_date("Tue, 10 Jun 2003 04:00:00 -0500").unwrap();
        assert_eq!(p.timestamp, 1_055_235_600);
        assert_eq!(p.offset_secs, -5 * 3600);
    }

    #[test]
    fn test_rfc2822_gmt() {
        let p = parse_date("Tue, 10 Jun 2003 09:00:00 GMT").unwrap();
        assert_eq!(p.timestamp, 1_055_235_600);
        assert_eq!(p.offset_secs, 0);
    }

    #[test]
    fn test_rfc3339() {
        let p = parse_date("2003-06-10T11:00:00+02:00").unwrap();
        assert_eq!(p.timestamp, 1_055_235_600);
        assert_eq!(p.offset_secs, 7200);
    }

    #[test]
    fn test_wrong_weekday_still_parses() {
        // 10 June 2003 was a Tuesday.
        let p = parse_date("Fri, 10 Jun 2003 09:00:00 GMT").unwrap();
        assert_eq!(p.timestamp, 1_055_235_600);
    }

    #[test]
    fn test_missing_seconds() {
        let p = parse_date("Tue, 10 Jun 2003 09:00 +0000").unwrap();
        assert_eq!(p.timestamp, 1_055_235_600);
    }

    #[test]
    fn test_naive_and_date_only() {
        assert_eq!(
            parse_date("2003-06-10 09:00:00").unwrap().timestamp,
            1_055_235_600
        );
        assert_eq!(
            parse_date("2003-06-10").unwrap().timestamp,
            1_055_203_200
        );
    }

    #[test]
    fn test_garbage_date() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("last tuesday"), None);
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration("1:02:03"), Some(3723));
        assert_eq!(parse_duration("02:03"), Some(123));
        assert_eq!(parse_duration("3600"), Some(3600));
        assert_eq!(parse_duration("95.7"), Some(95));
        assert_eq!(parse_duration(" 0:45 "), Some(45));
        assert_eq!(parse_duration("1:2:3:4"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_category_key() {
        assert_eq!(category_key("Society & Culture"), "society&culture");
        assert_eq!(category_key("TV  and Film"), "tvandfilm");
    }
}
