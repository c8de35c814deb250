//! Ingestion Orchestrator
//!
//! One call ingests one uploaded file:
//! 1. Resolve the tenant scope (abort before touching the file if absent)
//! 2. Decode and parse the CSV
//! 3. Resolve headers, drop blank rows, classify every remaining row
//! 4. Insert the valid batch (fatal on failure)
//! 5. Quarantine the rejected batch (logged on failure)
//! 6. Write the audit entry (logged on failure)
//! 7. Notify dependent views
//!
//! Every non-blank data row ends up in exactly one of the two partitions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dedup::DedupSet;
use crate::error::IngestError;
use crate::fields::RecordKind;
use crate::headers::HeaderResolver;
use crate::notify::{Notifier, Topic};
use crate::records::{AuditEntry, ImportableRecord, RawRecord, RejectedRecord};
use crate::store::{Scope, Store};
use crate::validate::{Classifier, Outcome, RowContext};

/// Audit user when the upload does not say who sent it
const SYSTEM_USER: &str = "system";

// =============================================================================
// INPUT
// =============================================================================

/// Upload-time context supplied alongside the file
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub kind: RecordKind,
    /// Tenant; looked up from `project` when absent
    pub company_id: Option<Uuid>,
    /// Workflow/project the rows belong to
    pub project: Option<String>,
    /// Insurer chosen by the operator, overrides row values
    pub insurer: Option<String>,
    pub user: Option<String>,
}

impl IngestContext {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            company_id: None,
            project: None,
            insurer: None,
            user: None,
        }
    }
}

/// The uploaded file, either on disk or already in memory
#[derive(Debug, Clone)]
pub enum UploadFile {
    Path(PathBuf),
    Bytes { name: String, bytes: Vec<u8> },
}

impl UploadFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// File name as the operator uploaded it
    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Bytes { name, .. } => name.clone(),
        }
    }

    /// Decode as UTF-8, dropping a leading BOM; invalid bytes become U+FFFD
    pub async fn read_text(&self) -> Result<String, IngestError> {
        let bytes = match self {
            Self::Path(path) => read_bytes(path).await?,
            Self::Bytes { bytes, .. } => bytes.clone(),
        };
        let (text, _) = encoding_rs::UTF_8.decode_with_bom_removal(&bytes);
        Ok(text.into_owned())
    }
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, IngestError> {
    Ok(tokio::fs::read(path).await?)
}

// =============================================================================
// PARSE
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    /// Data rows with at least one non-empty value
    pub rows: Vec<RawRecord>,
    pub blank_rows: usize,
}

impl ParsedCsv {
    pub fn total_rows(&self) -> usize {
        self.rows.len() + self.blank_rows
    }
}

/// Strict parse: header row required, every record must match its width.
///
/// Empty lines are skipped by the reader; rows whose values are all
/// whitespace are counted as blank.
pub fn parse_csv(text: &str) -> Result<ParsedCsv, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(Trim::None)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut parsed = ParsedCsv {
        headers,
        ..ParsedCsv::default()
    };
    for result in reader.records() {
        let record = result?;
        let raw = RawRecord::new(
            parsed
                .headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect(),
        );
        if raw.is_blank() {
            parsed.blank_rows += 1;
        } else {
            parsed.rows.push(raw);
        }
    }
    Ok(parsed)
}

// =============================================================================
// CLASSIFY
// =============================================================================

/// Both partitions of one file, before anything is persisted
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    pub valid: Vec<ImportableRecord>,
    pub rejected: Vec<RejectedRecord>,
    pub blank_rows: usize,
    pub total_rows: usize,
}

/// Classify every parsed row. Pure: `seen` carries persisted dedup keys.
pub fn prepare(ctx: &RowContext, parsed: &ParsedCsv, seen: DedupSet, now: DateTime<Utc>) -> Prepared {
    let resolver = HeaderResolver::new(&parsed.headers, ctx.kind.fields());
    let missing = resolver.unresolved(ctx.kind.fields());
    if !missing.is_empty() {
        debug!(kind = %ctx.kind, ?missing, "columns not present in file");
    }
    let mut classifier = Classifier::new(ctx, &resolver, seen);

    let mut prepared = Prepared {
        blank_rows: parsed.blank_rows,
        total_rows: parsed.total_rows(),
        ..Prepared::default()
    };
    for row in &parsed.rows {
        match classifier.classify(row) {
            Outcome::Accepted(record) => prepared.valid.push(record),
            Outcome::Rejected(reason) => prepared.rejected.push(RejectedRecord {
                company_id: ctx.company_id,
                workflow: ctx.project.clone(),
                source: ctx.kind,
                file_name: Some(ctx.file_name.clone()),
                raw: row.clone(),
                reason,
                created_at: now,
            }),
        }
    }
    prepared
}

// =============================================================================
// RESULT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestionResult {
    pub imported_count: usize,
    pub rejected_count: usize,
    pub blank_rows_dropped: usize,
    pub total_data_rows: usize,
}

impl IngestionResult {
    /// Operator-facing one-liner
    pub fn summary(&self) -> String {
        let mut msg = format!("{} row(s) imported.", self.imported_count);
        if self.rejected_count > 0 {
            msg.push_str(&format!(
                " {} row(s) skipped — see Errors tab.",
                self.rejected_count
            ));
        }
        msg
    }
}

impl From<&Prepared> for IngestionResult {
    fn from(p: &Prepared) -> Self {
        Self {
            imported_count: p.valid.len(),
            rejected_count: p.rejected.len(),
            blank_rows_dropped: p.blank_rows,
            total_data_rows: p.total_rows,
        }
    }
}

// =============================================================================
// ORCHESTRATION
// =============================================================================

/// Tenant scope from context, looking the company up by project if needed
pub async fn resolve_scope<S>(store: &S, ctx: &IngestContext) -> Result<Scope, IngestError>
where
    S: Store + ?Sized,
{
    let project = ctx
        .project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let company_id = match (ctx.company_id, project.as_deref()) {
        (Some(id), _) if !id.is_nil() => id,
        (_, Some(name)) => store
            .find_company(name)
            .await?
            .ok_or_else(|| IngestError::MissingContext(format!("no company named '{}'", name)))?,
        _ => return Err(IngestError::MissingContext("company_id".into())),
    };
    Ok(Scope::new(company_id, project))
}

/// Ingest one file: classify, persist both partitions, audit, notify
pub async fn ingest<S, N>(
    store: &S,
    notifier: &N,
    file: &UploadFile,
    ctx: &IngestContext,
) -> Result<IngestionResult, IngestError>
where
    S: Store + ?Sized,
    N: Notifier + ?Sized,
{
    let scope = resolve_scope(store, ctx).await?;
    let file_name = file.name();

    let text = file.read_text().await?;
    let parsed = parse_csv(&text)?;

    let seen = if ctx.kind.deduplicates() {
        DedupSet::seeded(store.existing_dedup_pairs(&scope).await?)
    } else {
        DedupSet::default()
    };

    let row_ctx = RowContext {
        kind: ctx.kind,
        company_id: scope.company_id,
        project: scope.project.clone(),
        insurer: ctx.insurer.clone(),
        file_name: file_name.clone(),
    };
    let prepared = prepare(&row_ctx, &parsed, seen, Utc::now());
    let result = IngestionResult::from(&prepared);

    if !prepared.valid.is_empty() {
        if let Err(e) = store.insert_batch(ctx.kind, &prepared.valid).await {
            error!(kind = %ctx.kind, file = %file_name, error = %e, "valid batch insert failed");
            return Err(e.into());
        }
        notifier.notify(Topic::Records(ctx.kind), &scope);
    }

    if !prepared.rejected.is_empty() {
        match store.insert_rejected(&prepared.rejected).await {
            Ok(()) => notifier.notify(Topic::Rejected, &scope),
            Err(e) => warn!(
                file = %file_name,
                rows = prepared.rejected.len(),
                error = %e,
                "failed to quarantine rejected rows"
            ),
        }
    }

    let user = ctx.user.as_deref().unwrap_or(SYSTEM_USER);
    let entry = AuditEntry::upload(user, ctx.kind, &file_name, result.summary());
    match store.insert_audit(&entry).await {
        Ok(()) => notifier.notify(Topic::Audit, &scope),
        Err(e) => warn!(file = %file_name, error = %e, "failed to write audit entry"),
    }

    info!(
        kind = %ctx.kind,
        file = %file_name,
        imported = result.imported_count,
        rejected = result.rejected_count,
        blank = result.blank_rows_dropped,
        "ingestion finished"
    );
    Ok(result)
}
