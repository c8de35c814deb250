//! Postgres store (sqlx)
//!
//! Tables: `issuances`, `insurer_billing_data`, `ocr_data_table`,
//! `upload_errors`, `audit_logs`, `companies`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{Scope, Store, StoredRow};
use crate::error::StoreError;
use crate::fields::RecordKind;
use crate::records::{AuditEntry, FieldValue, ImportableRecord, RejectedRecord};

/// Rows per INSERT statement; keeps bind parameters under the protocol limit
const ROWS_PER_STATEMENT: usize = 1000;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

fn order_by(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::InsurerBilling => "issue_date ASC NULLS LAST",
        RecordKind::Ocr => "created_at DESC",
        RecordKind::Issuance => "created_at ASC",
    }
}

fn to_object(value: Value) -> Option<StoredRow> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_company(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM companies WHERE name ILIKE $1 ORDER BY name LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn existing_dedup_pairs(
        &self,
        scope: &Scope,
    ) -> Result<Vec<(Option<String>, Option<String>)>, StoreError> {
        let pairs = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            r#"
            SELECT vehicle_no, date_issue::text
            FROM ocr_data_table
            WHERE company_id = $1 AND ($2::text IS NULL OR project = $2)
            "#,
        )
        .bind(scope.company_id)
        .bind(scope.project.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(pairs)
    }

    async fn insert_batch(
        &self,
        kind: RecordKind,
        records: &[ImportableRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut columns = vec!["company_id"];
        columns.extend(kind.project_column());
        columns.extend(kind.fields().iter().map(|f| f.column));
        let head = format!("INSERT INTO {} ({}) ", kind.table(), columns.join(", "));

        // One transaction: either the whole batch lands or none of it does
        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&head);
            qb.push_values(chunk, |mut b, rec| {
                b.push_bind(rec.company_id);
                if kind.project_column().is_some() {
                    b.push_bind(rec.project.clone());
                }
                for (_, value) in &rec.values {
                    match value {
                        FieldValue::Text(s) => {
                            b.push_bind(s.clone());
                        }
                        FieldValue::Date(d) => {
                            b.push_bind(*d);
                        }
                        FieldValue::Numeric(n) => {
                            b.push_bind(*n);
                        }
                    }
                }
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(table = kind.table(), rows = records.len(), "inserted batch");
        Ok(())
    }

    async fn insert_rejected(&self, records: &[RejectedRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO upload_errors \
                 (company_id, workflow, source, file_name, raw_data, rejection_reason, created_at) ",
            );
            qb.push_values(chunk, |mut b, rec| {
                b.push_bind(rec.company_id)
                    .push_bind(rec.workflow.clone())
                    .push_bind(rec.source.source_label())
                    .push_bind(rec.file_name.clone())
                    .push_bind(rec.raw.to_json())
                    .push_bind(rec.rejection_reason())
                    .push_bind(rec.created_at);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(rows = records.len(), "quarantined rows");
        Ok(())
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, time, user_name, event_type, change, item_affected)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.time)
        .bind(&entry.user_name)
        .bind(&entry.event_type)
        .bind(&entry.change)
        .bind(&entry.item_affected)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, kind: RecordKind, scope: &Scope) -> Result<Vec<StoredRow>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT row_to_json(t)::jsonb FROM {} t WHERE company_id = ",
            kind.table()
        ));
        qb.push_bind(scope.company_id);
        if let (Some(col), Some(project)) = (kind.project_column(), scope.project.as_ref()) {
            qb.push(format!(" AND {} = ", col));
            qb.push_bind(project.clone());
        }
        qb.push(" ORDER BY ").push(order_by(kind));

        let rows: Vec<Value> = qb.build_query_scalar::<Value>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().filter_map(to_object).collect())
    }

    async fn query_rejected(&self, scope: &Scope) -> Result<Vec<StoredRow>, StoreError> {
        let rows = sqlx::query_scalar::<_, Value>(
            r#"
            SELECT row_to_json(e)::jsonb
            FROM upload_errors e
            WHERE company_id = $1 AND ($2::text IS NULL OR workflow = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(scope.company_id)
        .bind(scope.project.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(to_object).collect())
    }

    async fn query_audit(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, time, user_name, event_type, change, item_affected
            FROM audit_logs
            ORDER BY time DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
