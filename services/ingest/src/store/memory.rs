//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Rows are kept in
//! the same JSON shape the Postgres store returns, with `id` and
//! `created_at` filled in on insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::{Scope, Store, StoredRow};
use crate::error::StoreError;
use crate::fields::RecordKind;
use crate::records::{AuditEntry, ImportableRecord, RejectedRecord};

#[derive(Default)]
pub struct MemoryStore {
    companies: RwLock<HashMap<String, Uuid>>,
    rows: RwLock<HashMap<RecordKind, Vec<StoredRow>>>,
    rejected: RwLock<Vec<StoredRow>>,
    audit: RwLock<Vec<AuditEntry>>,
    fail_batches: AtomicBool,
    fail_quarantine: AtomicBool,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::new("in-memory store lock poisoned")
}

fn str_field<'a>(row: &'a StoredRow, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

/// Same filter the Postgres store applies: tenant always, project when given
fn in_scope(row: &StoredRow, scope: &Scope, project_key: Option<&str>) -> bool {
    let company = scope.company_id.to_string();
    if str_field(row, "company_id") != Some(company.as_str()) {
        return false;
    }
    match (project_key, scope.project.as_deref()) {
        (Some(key), Some(project)) => str_field(row, key) == Some(project),
        _ => true,
    }
}

fn stamp(mut row: StoredRow) -> StoredRow {
    row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    row.entry("created_at")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    row
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a company so `find_company` can resolve it
    pub fn with_company(self, name: &str, id: Uuid) -> Self {
        if let Ok(mut companies) = self.companies.write() {
            companies.insert(name.to_lowercase(), id);
        }
        self
    }

    /// Make `insert_batch` fail, as a constraint violation would
    pub fn set_fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    /// Make `insert_rejected` fail
    pub fn set_fail_quarantine(&self, fail: bool) {
        self.fail_quarantine.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self, kind: RecordKind) -> usize {
        self.rows
            .read()
            .map(|rows| rows.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn audit_count(&self) -> usize {
        self.audit.read().map(|a| a.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_company(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        let companies = self.companies.read().map_err(poisoned)?;
        Ok(companies.get(&name.trim().to_lowercase()).copied())
    }

    async fn existing_dedup_pairs(
        &self,
        scope: &Scope,
    ) -> Result<Vec<(Option<String>, Option<String>)>, StoreError> {
        let rows = self.rows.read().map_err(poisoned)?;
        let pairs = rows
            .get(&RecordKind::Ocr)
            .into_iter()
            .flatten()
            .filter(|row| in_scope(row, scope, RecordKind::Ocr.project_column()))
            .map(|row| {
                (
                    str_field(row, "vehicle_no").map(str::to_string),
                    str_field(row, "date_issue").map(str::to_string),
                )
            })
            .collect();
        Ok(pairs)
    }

    async fn insert_batch(
        &self,
        kind: RecordKind,
        records: &[ImportableRecord],
    ) -> Result<(), StoreError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(StoreError::new(format!(
                "duplicate key value violates unique constraint \"{}_pkey\"",
                kind.table()
            ))
            .with_detail("Key (id) already exists."));
        }
        let mut rows = self.rows.write().map_err(poisoned)?;
        rows.entry(kind)
            .or_default()
            .extend(records.iter().map(|r| stamp(r.to_row())));
        Ok(())
    }

    async fn insert_rejected(&self, records: &[RejectedRecord]) -> Result<(), StoreError> {
        if self.fail_quarantine.load(Ordering::SeqCst) {
            return Err(StoreError::new("relation \"upload_errors\" does not exist"));
        }
        let mut rejected = self.rejected.write().map_err(poisoned)?;
        rejected.extend(records.iter().map(|r| stamp(r.to_row())));
        Ok(())
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.audit.write().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }

    async fn query(&self, kind: RecordKind, scope: &Scope) -> Result<Vec<StoredRow>, StoreError> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|row| in_scope(row, scope, kind.project_column()))
            .cloned()
            .collect())
    }

    async fn query_rejected(&self, scope: &Scope) -> Result<Vec<StoredRow>, StoreError> {
        let rejected = self.rejected.read().map_err(poisoned)?;
        Ok(rejected
            .iter()
            .rev()
            .filter(|row| in_scope(row, scope, Some("workflow")))
            .cloned()
            .collect())
    }

    async fn query_audit(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let audit = self.audit.read().map_err(poisoned)?;
        let mut entries = audit.clone();
        entries.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::FieldValue;
    use chrono::NaiveDate;

    fn ocr_record(company_id: Uuid, project: &str, vehicle: &str) -> ImportableRecord {
        ImportableRecord {
            kind: RecordKind::Ocr,
            company_id,
            project: Some(project.into()),
            values: vec![
                ("date_issue", FieldValue::Date(NaiveDate::from_ymd_opt(2026, 1, 15))),
                ("vehicle_no", FieldValue::Text(Some(vehicle.into()))),
            ],
        }
    }

    #[tokio::test]
    async fn test_query_is_scoped_by_company_and_project() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .insert_batch(
                RecordKind::Ocr,
                &[
                    ocr_record(a, "imotorbike", "A1"),
                    ocr_record(a, "other", "A2"),
                    ocr_record(b, "imotorbike", "B1"),
                ],
            )
            .await
            .unwrap();

        let scoped = store
            .query(RecordKind::Ocr, &Scope::new(a, Some("imotorbike".into())))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0]["vehicle_no"], "A1");
        assert!(scoped[0].contains_key("id"));

        let all_projects = store.query(RecordKind::Ocr, &Scope::new(a, None)).await.unwrap();
        assert_eq!(all_projects.len(), 2);
    }

    #[tokio::test]
    async fn test_dedup_pairs_use_canonical_dates() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        store
            .insert_batch(RecordKind::Ocr, &[ocr_record(a, "imotorbike", "A1")])
            .await
            .unwrap();
        let pairs = store
            .existing_dedup_pairs(&Scope::new(a, Some("imotorbike".into())))
            .await
            .unwrap();
        assert_eq!(pairs, vec![(Some("A1".to_string()), Some("2026-01-15".to_string()))]);
    }

    #[tokio::test]
    async fn test_failure_toggles() {
        let store = MemoryStore::new();
        store.set_fail_batches(true);
        let err = store
            .insert_batch(RecordKind::Ocr, &[ocr_record(Uuid::nil(), "p", "A1")])
            .await
            .unwrap_err();
        assert!(err.message.contains("unique constraint"));
        assert!(err.detail.is_some());
        assert_eq!(store.row_count(RecordKind::Ocr), 0);

        store.set_fail_quarantine(true);
        assert!(store.insert_rejected(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_find_company_is_case_insensitive() {
        let id = Uuid::new_v4();
        let store = MemoryStore::new().with_company("iMotorbike", id);
        assert_eq!(store.find_company("IMOTORBIKE").await.unwrap(), Some(id));
        assert_eq!(store.find_company("acme").await.unwrap(), None);
    }
}
