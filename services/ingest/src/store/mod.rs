//! Store collaborator
//!
//! The pipeline only talks to persistence through [`Store`], so the
//! orchestrator runs unchanged against Postgres in production and against
//! [`memory::MemoryStore`] in tests.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`find_company`](Store::find_company) | Resolve a tenant id from the project name |
//! | [`existing_dedup_pairs`](Store::existing_dedup_pairs) | Seed OCR dedup from persisted rows |
//! | [`insert_batch`](Store::insert_batch) | Insert the valid partition in one batch |
//! | [`insert_rejected`](Store::insert_rejected) | Quarantine the rejected partition |
//! | [`insert_audit`](Store::insert_audit) | Append an audit entry |
//! | [`query`](Store::query) | Fetch imported rows for a view |
//! | [`query_rejected`](Store::query_rejected) | Fetch quarantined rows |
//! | [`query_audit`](Store::query_audit) | Fetch the audit trail |

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::fields::RecordKind;
use crate::records::{AuditEntry, ImportableRecord, RejectedRecord};

pub use memory::MemoryStore;
pub use pg::PgStore;

/// A persisted row as a JSON object keyed by column name
pub type StoredRow = Map<String, Value>;

/// Tenant and optional workflow/project a query or notification applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub company_id: Uuid,
    pub project: Option<String>,
}

impl Scope {
    pub fn new(company_id: Uuid, project: Option<String>) -> Self {
        Self {
            company_id,
            project,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Tenant id for a company name (case-insensitive)
    async fn find_company(&self, name: &str) -> Result<Option<Uuid>, StoreError>;

    /// `(vehicle_no, date_issue)` of every OCR row already in scope
    async fn existing_dedup_pairs(
        &self,
        scope: &Scope,
    ) -> Result<Vec<(Option<String>, Option<String>)>, StoreError>;

    /// Insert all records of one kind as a single batch
    async fn insert_batch(
        &self,
        kind: RecordKind,
        records: &[ImportableRecord],
    ) -> Result<(), StoreError>;

    async fn insert_rejected(&self, records: &[RejectedRecord]) -> Result<(), StoreError>;

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn query(&self, kind: RecordKind, scope: &Scope) -> Result<Vec<StoredRow>, StoreError>;

    /// Quarantined rows, newest first
    async fn query_rejected(&self, scope: &Scope) -> Result<Vec<StoredRow>, StoreError>;

    /// Audit entries, newest first
    async fn query_audit(&self) -> Result<Vec<AuditEntry>, StoreError>;
}
