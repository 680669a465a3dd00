//! Lightweight UTC date/time utilities (no chrono dependency).
//!
//! Every timestamp the pipeline stores or compares goes through
//! [`canonicalize`], so signals, tensions, axioms and cycle state all carry
//! one textual form: `YYYY-MM-DDTHH:MM:SSZ`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp used when a stored value cannot be interpreted at all.
pub const EPOCH_ISO8601: &str = "1970-01-01T00:00:00Z";

/// Current UTC time as Unix seconds.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current UTC timestamp in ISO-8601 format.
pub fn now_iso8601() -> String {
    unix_to_iso8601(now_unix_secs())
}

/// Convert Unix seconds to ISO-8601 UTC string.
pub fn unix_to_iso8601(secs: u64) -> String {
    let days = (secs / 86400) as i64;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

/// Parse the date/time forms found in sources and older stores.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS[.fff]]` with an optional `Z`
/// or `±HH:MM` offset (a space may replace the `T`), and bare Unix seconds.
pub fn parse_to_unix(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        // Unix milliseconds are 13 digits; seconds stay 10 until 2286.
        let n: u64 = s.parse().ok()?;
        return Some(if s.len() >= 13 { n / 1000 } else { n });
    }

    let (date, rest) = match s.find(['T', ' ']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };

    let mut parts = date.split('-');
    let y: i64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let d: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }

    let mut secs_of_day: i64 = 0;
    let mut offset: i64 = 0;
    if let Some(rest) = rest {
        let (clock, tz) = split_offset(rest)?;
        let clock = clock.split('.').next()?;
        let mut fields = clock.split(':');
        let hh: i64 = fields.next()?.parse().ok()?;
        let mm: i64 = fields.next()?.parse().ok()?;
        let ss: i64 = match fields.next() {
            Some(v) => v.parse().ok()?,
            None => 0,
        };
        if hh > 23 || mm > 59 || ss > 60 {
            return None;
        }
        secs_of_day = hh * 3600 + mm * 60 + ss;
        offset = tz;
    }

    let total = days_from_civil(y, m, d) * 86400 + secs_of_day - offset;
    u64::try_from(total).ok()
}

/// Normalise any accepted timestamp form to canonical ISO-8601 UTC.
/// Returns `None` when the input is not a recognisable timestamp.
pub fn canonicalize(s: &str) -> Option<String> {
    parse_to_unix(s).map(unix_to_iso8601)
}

/// Like [`canonicalize`], falling back to the Unix epoch for garbage input.
pub fn canonicalize_or_epoch(s: &str) -> String {
    canonicalize(s).unwrap_or_else(|| EPOCH_ISO8601.to_string())
}

/// Split `HH:MM:SS[Z|±HH:MM]` into the clock part and an offset in seconds.
fn split_offset(s: &str) -> Option<(&str, i64)> {
    if let Some(clock) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        return Some((clock, 0));
    }
    if let Some(i) = s.rfind(['+', '-']) {
        let (clock, tz) = s.split_at(i);
        let sign = if tz.starts_with('-') { -1 } else { 1 };
        let tz = &tz[1..];
        let (h, m) = tz.split_once(':').unwrap_or((tz, "0"));
        let h: i64 = h.parse().ok()?;
        let m: i64 = m.parse().ok()?;
        return Some((clock, sign * (h * 3600 + m * 60)));
    }
    Some((s, 0))
}

/// Howard Hinnant's civil_from_days: Unix epoch days → (year, month, day).
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Inverse of `civil_from_days`: (year, month, day) → Unix epoch days.
fn days_from_civil(y: i64, m: u64, d: u64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe as i64 - 719468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        assert_eq!(unix_to_iso8601(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_known_date() {
        // 2026-02-21T00:00:00Z = 1771632000
        assert_eq!(unix_to_iso8601(1771632000), "2026-02-21T00:00:00Z");
    }

    #[test]
    fn test_now_is_recent() {
        let ts = now_iso8601();
        assert!(ts.starts_with("202"), "timestamp should be in 2020s: {ts}");
    }

    #[test]
    fn test_parse_roundtrips_canonical_form() {
        let ts = "2026-02-21T13:45:07Z";
        assert_eq!(canonicalize(ts).as_deref(), Some(ts));
    }

    #[test]
    fn test_parse_date_only() {
        assert_eq!(parse_to_unix("2026-02-21"), Some(1771632000));
    }

    #[test]
    fn test_parse_offset_and_fraction() {
        assert_eq!(
            canonicalize("2026-02-21T02:00:00.250+02:00").as_deref(),
            Some("2026-02-21T00:00:00Z")
        );
        assert_eq!(
            canonicalize("2026-02-20 22:30:00-01:30").as_deref(),
            Some("2026-02-21T00:00:00Z")
        );
    }

    #[test]
    fn test_parse_unix_seconds_and_millis() {
        assert_eq!(canonicalize("1771632000").as_deref(), Some("2026-02-21T00:00:00Z"));
        assert_eq!(
            canonicalize("1771632000000").as_deref(),
            Some("2026-02-21T00:00:00Z")
        );
    }

    #[test]
    fn test_garbage_falls_back_to_epoch() {
        assert_eq!(canonicalize("yesterday"), None);
        assert_eq!(canonicalize("2026-13-01"), None);
        assert_eq!(canonicalize_or_epoch(""), EPOCH_ISO8601);
    }

    #[test]
    fn test_days_from_civil_inverts_civil_from_days() {
        for days in [-1000i64, 0, 1, 365, 19_000, 20_505] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
    }
}
