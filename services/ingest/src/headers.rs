//! Header Resolver
//!
//! Maps the header row of one uploaded file onto canonical fields:
//! 1. Exact match of the field's aliases, in priority order
//! 2. Substring fallback rule, for headers no exact alias claimed
//!
//! Built fresh per file; the same header row always yields the same mapping.

use std::collections::{HashMap, HashSet};

use crate::fields::FieldSpec;
use crate::normalize::normalize_text;
use crate::records::RawRecord;

#[derive(Debug, Clone, Default)]
pub struct HeaderResolver {
    /// normalized header -> header as written in the file (first occurrence)
    by_normalized: HashMap<String, String>,
    /// canonical column -> header as written in the file
    resolved: HashMap<&'static str, String>,
}

impl HeaderResolver {
    pub fn new(headers: &[String], fields: &'static [FieldSpec]) -> Self {
        // (normalized, original) in file order
        let normalized: Vec<(String, &String)> = headers
            .iter()
            .map(|h| (normalize_text(h.trim_start_matches('\u{feff}')), h))
            .collect();

        let mut by_normalized = HashMap::new();
        for (norm, original) in &normalized {
            by_normalized
                .entry(norm.clone())
                .or_insert_with(|| (*original).clone());
        }

        let mut resolved: HashMap<&'static str, String> = HashMap::new();
        let mut claimed: HashSet<String> = HashSet::new();

        // Pass 1: exact aliases
        for field in fields {
            let hit = field
                .aliases
                .iter()
                .find_map(|alias| by_normalized.get(&normalize_text(alias)));
            if let Some(original) = hit {
                resolved.insert(field.column, original.clone());
                claimed.insert(original.clone());
            }
        }

        // Pass 2: fallback rules over headers nobody claimed
        for field in fields {
            if resolved.contains_key(field.column) {
                continue;
            }
            let Some(rule) = field.fallback else {
                continue;
            };
            let hit = normalized
                .iter()
                .find(|(norm, original)| !claimed.contains(*original) && rule.matches(norm));
            if let Some((_, original)) = hit {
                resolved.insert(field.column, (*original).clone());
                claimed.insert((*original).clone());
            }
        }

        Self {
            by_normalized,
            resolved,
        }
    }

    /// Header in this file that backs a canonical column
    pub fn header_for(&self, column: &str) -> Option<&str> {
        self.resolved.get(column).map(String::as_str)
    }

    /// Canonical columns of `fields` that this file does not provide
    pub fn unresolved(&self, fields: &'static [FieldSpec]) -> Vec<&'static str> {
        fields
            .iter()
            .filter(|f| !self.resolved.contains_key(f.column))
            .map(|f| f.column)
            .collect()
    }

    /// Trimmed, non-empty value of a canonical column for one row
    pub fn field(&self, row: &RawRecord, column: &str) -> Option<String> {
        let header = self.header_for(column)?;
        non_empty(row.get(header))
    }

    /// First non-empty value among ranked alias keys.
    ///
    /// Keys are matched case- and whitespace-insensitively against this
    /// file's headers.
    pub fn get(&self, row: &RawRecord, aliases: &[&str]) -> Option<String> {
        aliases.iter().find_map(|alias| {
            let header = self.by_normalized.get(&normalize_text(alias))?;
            non_empty(row.get(header))
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
