//! API Service - HTTP surface for insurer-ops ingestion
//!
//! Endpoints:
//! - GET  /health - Health check
//! - POST /ingest/:kind - Upload one CSV (body) for a tenant
//! - GET  /records/:kind - Filtered, paginated view of imported rows
//! - GET  /errors - Quarantined rows
//! - GET  /errors/export - Quarantined rows as CSV
//! - GET  /audit-logs - Upload audit trail
//! - GET  /export/:kind - Filtered view as CSV download

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use ingest::export::{export_columns, export_file_name, to_csv, ExportColumn, ERRORS_EXPORT};
use ingest::notify::{spawn_change_log, ChangeFeed, Invalidation, Notifier, RowCache, Topic};
use ingest::view::{
    apply, dimension_options, filter_audit, filter_by_date, issuance_time_split, paginate,
    view_spec, AuditRange, Page, TimeSplit, ViewQuery, ViewSpec, ViewState, AUDIT_PAGE_SIZE,
    ERRORS_VIEW,
};
use ingest::records::AuditEntry;
use ingest::{
    Config, IngestContext, IngestError, PgStore, RecordKind, Scope, Store, StoreError, StoredRow,
    UploadFile,
};

// ============================================================================
// State
// ============================================================================

struct AppState {
    store: Arc<dyn Store>,
    feed: ChangeFeed,
    rows: RowCache<StoredRow>,
    audit: RowCache<AuditEntry>,
}

impl AppState {
    /// Starts the change log subscriber; needs a tokio runtime
    fn new(store: Arc<dyn Store>) -> Arc<Self> {
        let feed = ChangeFeed::new();
        spawn_change_log(feed.subscribe());
        Arc::new(Self {
            store,
            feed,
            rows: RowCache::new(),
            audit: RowCache::new(),
        })
    }

    /// Imported or quarantined rows, from cache when still valid
    async fn rows(&self, topic: Topic, scope: &Scope) -> Result<Arc<Vec<StoredRow>>, StoreError> {
        if let Some(rows) = self.rows.get(topic, scope) {
            return Ok(rows);
        }
        let generation = self.rows.generation();
        let rows = match topic {
            Topic::Records(kind) => self.store.query(kind, scope).await?,
            _ => self.store.query_rejected(scope).await?,
        };
        Ok(self.rows.put(topic, scope, rows, generation))
    }

    async fn audit_entries(&self) -> Result<Arc<Vec<AuditEntry>>, StoreError> {
        let scope = Scope::new(Uuid::nil(), None);
        if let Some(entries) = self.audit.get(Topic::Audit, &scope) {
            return Ok(entries);
        }
        let generation = self.audit.generation();
        let entries = self.store.query_audit().await?;
        Ok(self.audit.put(Topic::Audit, &scope, entries, generation))
    }
}

/// Cached rows are dropped before the change is published, so a read that
/// follows an upload always refetches
impl Notifier for AppState {
    fn notify(&self, topic: Topic, scope: &Scope) {
        let invalidation = Invalidation {
            topic,
            scope: scope.clone(),
        };
        self.rows.invalidate(&invalidation);
        self.audit.invalidate(&invalidation);
        self.feed.notify(topic, scope);
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct IngestResponse {
    imported_count: usize,
    rejected_count: usize,
    blank_rows_dropped: usize,
    total_data_rows: usize,
    message: String,
}

#[derive(Serialize)]
struct RecordsResponse {
    #[serde(flatten)]
    page: Page<StoredRow>,
    /// Send back as `prev` so a filter change returns to page 1
    filters_key: String,
    /// Options per categorical filter, after date filtering
    options: BTreeMap<&'static str, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuance_stats: Option<TimeSplit>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            details,
        }),
    )
        .into_response()
}

fn store_failure(e: StoreError) -> Response {
    error!(error = %e, "store query failed");
    error_response(StatusCode::BAD_GATEWAY, e.message, e.detail)
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct ScopeQuery {
    company_id: Uuid,
    project: Option<String>,
}

impl ScopeQuery {
    fn scope(&self) -> Scope {
        let project = self
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Scope::new(self.company_id, project)
    }
}

#[derive(Deserialize)]
struct IngestQuery {
    company_id: Option<Uuid>,
    project: Option<String>,
    insurer: Option<String>,
    file_name: Option<String>,
    user: Option<String>,
}

#[derive(Deserialize)]
struct AuditQuery {
    range: Option<AuditRange>,
    q: Option<String>,
    page: Option<usize>,
}

// ============================================================================
// View plumbing
// ============================================================================

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Filtered rows plus the option lists the filters were reconciled against
fn filtered_view(
    rows: &[StoredRow],
    spec: &ViewSpec,
    query: &ViewQuery,
    today: NaiveDate,
) -> Result<(Vec<StoredRow>, ViewState, BTreeMap<&'static str, Vec<String>>), String> {
    let mut state = query.state()?;

    let dated = filter_by_date(rows, spec.date_field, state.filters().preset, today);
    let mut options = BTreeMap::new();
    for dimension in spec.dimensions {
        let opts = dimension_options(&dated, dimension);
        state.reconcile_options(dimension, &opts);
        options.insert(*dimension, opts);
    }

    let filtered = apply(rows, spec, state.filters(), today);
    Ok((filtered, state, options))
}

fn csv_download(rows: &[StoredRow], columns: &[ExportColumn], prefix: &str) -> Response {
    match to_csv(rows, columns) {
        Ok(body) => {
            let disposition = format!(
                "attachment; filename=\"{}\"",
                export_file_name(prefix, today())
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                body,
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<RecordKind>,
    Query(params): Query<IngestQuery>,
    body: Bytes,
) -> Response {
    let file_name = params
        .file_name
        .unwrap_or_else(|| format!("{}_upload.csv", kind));
    let file = UploadFile::from_bytes(file_name, body.to_vec());
    let ctx = IngestContext {
        kind,
        company_id: params.company_id,
        project: params.project,
        insurer: params.insurer,
        user: params.user,
    };

    match ingest::ingest(state.store.as_ref(), state.as_ref(), &file, &ctx).await {
        Ok(result) => Json(IngestResponse {
            imported_count: result.imported_count,
            rejected_count: result.rejected_count,
            blank_rows_dropped: result.blank_rows_dropped,
            total_data_rows: result.total_data_rows,
            message: result.summary(),
        })
        .into_response(),
        Err(IngestError::Store(e)) => error_response(StatusCode::BAD_GATEWAY, e.message, e.detail),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string(), None),
    }
}

async fn records_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<RecordKind>,
    Query(scope): Query<ScopeQuery>,
    Query(view): Query<ViewQuery>,
) -> Response {
    let rows = match state.rows(Topic::Records(kind), &scope.scope()).await {
        Ok(rows) => rows,
        Err(e) => return store_failure(e),
    };

    let (filtered, view_state, options) = match filtered_view(&rows, view_spec(kind), &view, today()) {
        Ok(v) => v,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg, None),
    };

    let issuance_stats = (kind == RecordKind::Issuance).then(|| issuance_time_split(&filtered));
    Json(RecordsResponse {
        page: paginate(&filtered, view_state.page(), view_spec(kind).page_size),
        filters_key: view_state.filters().key(),
        options,
        issuance_stats,
    })
    .into_response()
}

async fn errors_handler(
    State(state): State<Arc<AppState>>,
    Query(scope): Query<ScopeQuery>,
    Query(view): Query<ViewQuery>,
) -> Response {
    let rows = match state.rows(Topic::Rejected, &scope.scope()).await {
        Ok(rows) => rows,
        Err(e) => return store_failure(e),
    };

    match filtered_view(&rows, &ERRORS_VIEW, &view, today()) {
        Ok((filtered, view_state, options)) => Json(RecordsResponse {
            page: paginate(&filtered, view_state.page(), ERRORS_VIEW.page_size),
            filters_key: view_state.filters().key(),
            options,
            issuance_stats: None,
        })
        .into_response(),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, msg, None),
    }
}

async fn audit_logs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQuery>,
) -> Response {
    let entries = match state.audit_entries().await {
        Ok(entries) => entries,
        Err(e) => return store_failure(e),
    };
    let filtered: Vec<AuditEntry> = filter_audit(
        &entries,
        params.range.unwrap_or_default(),
        params.q.as_deref().unwrap_or(""),
        Utc::now(),
    );
    Json(paginate(&filtered, params.page.unwrap_or(1), AUDIT_PAGE_SIZE)).into_response()
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<RecordKind>,
    Query(scope): Query<ScopeQuery>,
    Query(view): Query<ViewQuery>,
) -> Response {
    let rows = match state.rows(Topic::Records(kind), &scope.scope()).await {
        Ok(rows) => rows,
        Err(e) => return store_failure(e),
    };
    match filtered_view(&rows, view_spec(kind), &view, today()) {
        Ok((filtered, _, _)) => csv_download(&filtered, export_columns(kind), kind.source_label()),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, msg, None),
    }
}

async fn errors_export_handler(
    State(state): State<Arc<AppState>>,
    Query(scope): Query<ScopeQuery>,
    Query(view): Query<ViewQuery>,
) -> Response {
    let rows = match state.rows(Topic::Rejected, &scope.scope()).await {
        Ok(rows) => rows,
        Err(e) => return store_failure(e),
    };
    match filtered_view(&rows, &ERRORS_VIEW, &view, today()) {
        Ok((filtered, _, _)) => csv_download(&filtered, ERRORS_EXPORT, "upload_errors"),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, msg, None),
    }
}

// ============================================================================
// Router
// ============================================================================

fn app(state: Arc<AppState>) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ingest/:kind", post(ingest_handler))
        .route("/records/:kind", get(records_handler))
        .route("/errors", get(errors_handler))
        .route("/errors/export", get(errors_export_handler))
        .route("/audit-logs", get(audit_logs_handler))
        .route("/export/:kind", get(export_handler))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    println!("=== Insurer Ops API ===");
    println!("Connecting to database...");

    let store = PgStore::connect(&config.db_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let state = AppState::new(Arc::new(store));
    let app = app(state);

    info!(bind = %config.api_bind, "starting API");
    println!("API listening on http://{}", config.api_bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  POST /ingest/:kind?company_id=&project=&insurer=&file_name=&user=");
    println!("  GET  /records/:kind?company_id=&project=&preset=&from=&to=&insurer=&partner=&q=&sort=&page=");
    println!("  GET  /errors?company_id=&project=&q=&page=");
    println!("  GET  /errors/export?company_id=&project=&q=");
    println!("  GET  /audit-logs?range=&q=&page=");
    println!("  GET  /export/:kind?company_id=&project=&preset=&insurer=&q=");

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
