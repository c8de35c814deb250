//! Deduplication Engine (OCR rows only)
//!
//! The natural key is deliberately coarse: vehicle number + issue date.
//! OCR extraction is imprecise, so every other column is ignored.

use std::collections::HashSet;

use crate::normalize::{normalize_text, parse_date_only};

/// Composite key `"{vehicle}|{date}"`.
///
/// The date part is what the store keeps for `date_issue`: the canonical
/// `YYYY-MM-DD`, or empty when the text does not parse (stored as NULL).
/// A file row and its persisted copy therefore always share a key.
pub fn dedup_key(vehicle_no: Option<&str>, date_issue: Option<&str>) -> String {
    let vehicle = vehicle_no.map(normalize_text).unwrap_or_default();
    let date = date_issue
        .and_then(parse_date_only)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    format!("{}|{}", vehicle, date)
}

/// Keys seen so far: persisted rows first, then earlier rows of the batch
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    seen: HashSet<String>,
}

impl DedupSet {
    /// Seed from persisted `(vehicle_no, date_issue)` pairs
    pub fn seeded<I, V, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Option<V>, Option<D>)>,
        V: AsRef<str>,
        D: AsRef<str>,
    {
        let seen = pairs
            .into_iter()
            .map(|(v, d)| {
                let vehicle: Option<&str> = v.as_ref().map(|s| s.as_ref());
                let date: Option<&str> = d.as_ref().map(|s| s.as_ref());
                dedup_key(vehicle, date)
            })
            .collect();
        Self { seen }
    }

    /// Record the key; returns false if it was already present
    pub fn insert(&mut self, key: String) -> bool {
        self.seen.insert(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_case_and_space_insensitive() {
        assert_eq!(
            dedup_key(Some("  wxy  1234 "), Some("2026-01-15")),
            dedup_key(Some("WXY 1234"), Some("2026-01-15"))
        );
    }

    #[test]
    fn test_key_canonicalizes_dates() {
        assert_eq!(dedup_key(Some("ABC1"), Some("15/01/2026")), "abc1|2026-01-15");
        assert_eq!(dedup_key(Some("ABC1"), Some("15 Jan 2026")), "abc1|2026-01-15");
    }

    #[test]
    fn test_unparseable_date_keys_like_a_null_date() {
        assert_eq!(dedup_key(Some("ABC1"), Some(" Unknown  Date ")), "abc1|");
        assert_eq!(
            dedup_key(Some("WXY1234"), Some("pending")),
            dedup_key(Some("WXY1234"), None)
        );
        assert_eq!(dedup_key(None, None), "|");
    }

    #[test]
    fn test_seeded_set_catches_persisted_rows() {
        let mut set = DedupSet::seeded(vec![(Some("WXY 1234"), Some("2026-01-15"))]);
        assert!(!set.insert(dedup_key(Some("wxy 1234"), Some("15/01/2026"))));
        assert!(set.insert(dedup_key(Some("wxy 1234"), Some("16/01/2026"))));
        assert!(!set.insert(dedup_key(Some("wxy 1234"), Some("16 Jan 2026"))));
    }

    #[test]
    fn test_seeded_accepts_null_columns() {
        let mut set = DedupSet::seeded(vec![
            (None::<String>, Some("2026-01-15".to_string())),
            (Some("WXY1234".to_string()), None),
        ]);
        assert!(!set.insert("|2026-01-15".to_string()));
        assert!(!set.insert(dedup_key(Some("wxy1234"), Some("pending"))));
    }
}
