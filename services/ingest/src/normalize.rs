//! Date/Number Normalizer
//!
//! Pure helpers shared by every stage of the pipeline:
//! - Parse heterogeneous vendor date strings into a canonical date-time
//! - Format dates for DATE columns (`YYYY-MM-DD`)
//! - Parse numeric strings with thousands separators
//! - Normalize free text for header and key comparison
//!
//! DETERMINISTIC: no clock, no locale, no I/O.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// One accepted textual shape, tried in declaration order
enum DatePattern {
    /// Pattern carries a time of day
    DateTime(&'static str),
    /// Date only; parsed value is midnight
    Date(&'static str),
}

/// Day-first and named-month shapes, tried after ISO 8601.
///
/// Order matters: `dd/MM/yyyy HH:mm` must win over `dd/MM/yyyy`, and nothing
/// here is allowed to read an ISO string as day-first.
const FALLBACK_PATTERNS: &[DatePattern] = &[
    DatePattern::DateTime("%d/%m/%Y %H:%M"),
    DatePattern::Date("%d/%m/%Y"),
    DatePattern::DateTime("%Y-%m-%d %H:%M:%S"),
    DatePattern::DateTime("%Y-%m-%d %H:%M"),
    DatePattern::Date("%Y-%m-%d"),
    // Generali: "15 Feb 2026", "26 January 2026"
    DatePattern::Date("%d %b %Y"),
    DatePattern::Date("%d %B %Y"),
    // "02-Jan-2026", "2-Jan-2026"
    DatePattern::Date("%d-%b-%Y"),
];

/// ISO 8601 shapes without an offset
const ISO_PATTERNS: &[DatePattern] = &[
    DatePattern::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    DatePattern::DateTime("%Y-%m-%dT%H:%M"),
    DatePattern::Date("%Y-%m-%d"),
];

fn try_pattern(s: &str, pattern: &DatePattern) -> Option<NaiveDateTime> {
    match pattern {
        DatePattern::DateTime(fmt) => NaiveDateTime::parse_from_str(s, fmt).ok(),
        DatePattern::Date(fmt) => NaiveDate::parse_from_str(s, fmt)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN)),
    }
}

/// Parse ISO 8601, with or without offset.
///
/// Offsets are dropped: the wall-clock date the vendor wrote is the date we keep.
fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    ISO_PATTERNS.iter().find_map(|p| try_pattern(s, p))
}

/// Parse a vendor date string.
///
/// Returns `None` for blank or unrecognised input; that is the common
/// "No valid date" path, not an error.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    parse_iso(s).or_else(|| FALLBACK_PATTERNS.iter().find_map(|p| try_pattern(s, p)))
}

/// Parse and truncate to the calendar date
pub fn parse_date_only(raw: &str) -> Option<NaiveDate> {
    parse_date(raw).map(|dt| dt.date())
}

/// Canonical `YYYY-MM-DD` string for DATE columns, or `None`
pub fn to_canonical_date_string(raw: Option<&str>) -> Option<String> {
    raw.and_then(parse_date_only)
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Parse a numeric cell.
///
/// Commas are thousands separators and are stripped. Anything that does not
/// parse to a finite number is `None`, never zero.
pub fn parse_numeric(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    if raw.trim().is_empty() {
        return None;
    }
    let cleaned = raw.replace(',', "");
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Lowercase, trim, collapse whitespace runs to a single space
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // -------------------------------------------------------------------------
    // DATE FORMAT TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_date_iso_date() {
        assert_eq!(parse_date_only("2026-01-15"), Some(ymd(2026, 1, 15)));
    }

    #[test]
    fn test_parse_date_iso_is_never_day_first() {
        let d = parse_date("2026-01-08").unwrap();
        assert_eq!(d.month(), 1);
        assert_eq!(d.day(), 8);
    }

    #[test]
    fn test_parse_date_iso_datetime() {
        let d = parse_date("2026-01-15T09:14:45").unwrap();
        assert_eq!(d.date(), ymd(2026, 1, 15));
        assert_eq!(d.hour(), 9);
        assert_eq!(d.minute(), 14);
    }

    #[test]
    fn test_parse_date_iso_with_offset_keeps_wall_clock_date() {
        let d = parse_date("2026-01-15T23:30:00+08:00").unwrap();
        assert_eq!(d.date(), ymd(2026, 1, 15));
    }

    #[test]
    fn test_parse_date_day_first_with_time() {
        let d = parse_date("05/02/2026 18:30").unwrap();
        assert_eq!(d.date(), ymd(2026, 2, 5));
        assert_eq!(d.hour(), 18);
    }

    #[test]
    fn test_parse_date_day_first() {
        assert_eq!(parse_date_only("05/02/2026"), Some(ymd(2026, 2, 5)));
        assert_eq!(parse_date_only("31/12/2025"), Some(ymd(2025, 12, 31)));
    }

    #[test]
    fn test_parse_date_space_separated_datetime() {
        assert_eq!(parse_date("2026-01-08 09:14:45").unwrap().hour(), 9);
        assert_eq!(parse_date("2026-01-08 9:14:45").unwrap().hour(), 9);
        assert_eq!(parse_date("2026-01-08 17:05").unwrap().hour(), 17);
    }

    #[test]
    fn test_parse_date_named_month() {
        assert_eq!(parse_date_only("15 Feb 2026"), Some(ymd(2026, 2, 15)));
        assert_eq!(parse_date_only("26 January 2026"), Some(ymd(2026, 1, 26)));
    }

    #[test]
    fn test_parse_date_dashed_named_month() {
        assert_eq!(parse_date_only("02-Jan-2026"), Some(ymd(2026, 1, 2)));
        assert_eq!(parse_date_only("2-Jan-2026"), Some(ymd(2026, 1, 2)));
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("pending"), None);
        assert_eq!(parse_date("31/02/2026"), None);
        assert_eq!(parse_date("2026-13-01"), None);
    }

    #[test]
    fn test_parse_date_trims_input() {
        assert_eq!(parse_date_only("  2026-03-01  "), Some(ymd(2026, 3, 1)));
    }

    #[test]
    fn test_canonical_date_round_trip() {
        for s in ["2024-02-29", "2026-01-01", "2025-12-31"] {
            assert_eq!(to_canonical_date_string(Some(s)).as_deref(), Some(s));
        }
    }

    #[test]
    fn test_canonical_date_drops_time() {
        assert_eq!(
            to_canonical_date_string(Some("05/02/2026 18:30")).as_deref(),
            Some("2026-02-05")
        );
        assert_eq!(to_canonical_date_string(None), None);
        assert_eq!(to_canonical_date_string(Some("n/a")), None);
    }

    // -------------------------------------------------------------------------
    // NUMERIC TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_numeric_thousands_separator() {
        assert_eq!(parse_numeric(Some("1,234.50")), Some(1234.5));
        assert_eq!(parse_numeric(Some("1,000,000")), Some(1_000_000.0));
    }

    #[test]
    fn test_parse_numeric_blank_is_none() {
        assert_eq!(parse_numeric(Some("")), None);
        assert_eq!(parse_numeric(Some("   ")), None);
        assert_eq!(parse_numeric(None), None);
    }

    #[test]
    fn test_parse_numeric_garbage_is_none_not_zero() {
        assert_eq!(parse_numeric(Some("abc")), None);
        assert_eq!(parse_numeric(Some("NaN")), None);
        assert_eq!(parse_numeric(Some("inf")), None);
    }

    #[test]
    fn test_parse_numeric_negative_and_padded() {
        assert_eq!(parse_numeric(Some(" -12.5 ")), Some(-12.5));
    }

    // -------------------------------------------------------------------------
    // TEXT NORMALIZATION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_text_collapses_whitespace() {
        assert_eq!(normalize_text("  Sum   Insured\t(RM) "), "sum insured (rm)");
        assert_eq!(normalize_text(""), "");
    }
}
