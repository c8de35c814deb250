//! Record shapes flowing through the pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::fields::RecordKind;

/// One CSV data line, keyed by the file's own headers.
///
/// Values are kept exactly as read (no trimming) so rejected rows can be
/// quarantined verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Value under the exact header string
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// True when every value is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }

    /// Opaque JSON object in file column order
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (h, v) in &self.fields {
            map.entry(h.clone()).or_insert_with(|| Value::String(v.clone()));
        }
        Value::Object(map)
    }
}

/// Typed value of a canonical field after normalization
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Numeric(Option<f64>),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(Some(s)) => Value::String(s.clone()),
            Self::Date(Some(d)) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Numeric(Some(n)) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => s.as_deref(),
            _ => None,
        }
    }
}

/// A row mapped to canonical fields, ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct ImportableRecord {
    pub kind: RecordKind,
    pub company_id: Uuid,
    pub project: Option<String>,
    /// Canonical columns in field-table order
    pub values: Vec<(&'static str, FieldValue)>,
}

impl ImportableRecord {
    pub fn value(&self, column: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.value(column).and_then(FieldValue::as_text)
    }

    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        match self.value(column) {
            Some(FieldValue::Date(d)) => *d,
            _ => None,
        }
    }

    pub fn numeric(&self, column: &str) -> Option<f64> {
        match self.value(column) {
            Some(FieldValue::Numeric(n)) => *n,
            _ => None,
        }
    }

    /// Row object as the store would return it (without generated columns)
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("company_id".into(), Value::String(self.company_id.to_string()));
        if let Some(col) = self.kind.project_column() {
            row.insert(
                col.into(),
                self.project.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }
        for (column, value) in &self.values {
            row.insert((*column).into(), value.to_json());
        }
        row
    }
}

/// A single reason a row was not importable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoValidDate,
    MissingInsurer,
    Duplicate,
}

impl Rejection {
    pub fn message(self) -> &'static str {
        match self {
            Self::NoValidDate => "No valid date",
            Self::MissingInsurer => "Missing insurer",
            Self::Duplicate => "Duplicate",
        }
    }
}

/// All reasons for one rejected row, in check order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RejectionReason(Vec<Rejection>);

impl RejectionReason {
    pub fn push(&mut self, r: Rejection) {
        self.0.push(r);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Rejection> for RejectionReason {
    fn from(r: Rejection) -> Self {
        Self(vec![r])
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|r| r.message())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// A quarantined row, kept for operator review
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub company_id: Uuid,
    pub workflow: Option<String>,
    pub source: RecordKind,
    pub file_name: Option<String>,
    pub raw: RawRecord,
    pub reason: RejectionReason,
    pub created_at: DateTime<Utc>,
}

impl RejectedRecord {
    pub fn rejection_reason(&self) -> String {
        self.reason.to_string()
    }

    /// Row object as stored in `upload_errors`
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("company_id".into(), Value::String(self.company_id.to_string()));
        row.insert(
            "workflow".into(),
            self.workflow.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row.insert("source".into(), Value::String(self.source.source_label().into()));
        row.insert(
            "file_name".into(),
            self.file_name.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row.insert("raw_data".into(), self.raw.to_json());
        row.insert("rejection_reason".into(), Value::String(self.rejection_reason()));
        row.insert("created_at".into(), Value::String(self.created_at.to_rfc3339()));
        row
    }
}

/// Audit trail entry written after each ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub user_name: String,
    pub event_type: String,
    pub change: String,
    pub item_affected: String,
}

impl AuditEntry {
    pub fn upload(user: &str, kind: RecordKind, file_name: &str, change: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Utc::now(),
            user_name: user.to_string(),
            event_type: "Upload".to_string(),
            change,
            item_affected: format!("{}: {}", kind.source_label().replace('_', " "), file_name),
        }
    }
}
