//! Insurer-ops CSV ingestion
//!
//! Turns vendor CSV exports (insurer billing, OCR extracts, partner
//! issuance reports) into canonical rows, quarantines what cannot be
//! imported, and serves filtered views over the result.
//!
//! | Module | Role |
//! |--------|------|
//! | [`normalize`] | Date and number parsing, text normalization |
//! | [`fields`] | Canonical field tables per record kind |
//! | [`headers`] | Per-file header to field mapping |
//! | [`validate`] | Row classification and record building |
//! | [`dedup`] | OCR natural-key deduplication |
//! | [`ingest`] | One-file orchestration |
//! | [`store`] | Persistence trait, Postgres and in-memory stores |
//! | [`notify`] | View invalidation feed |
//! | [`view`] | Presets, filters, search, sort, pagination |
//! | [`export`] | CSV export projections |

pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod fields;
pub mod headers;
pub mod ingest;
pub mod normalize;
pub mod notify;
pub mod records;
pub mod store;
pub mod validate;
pub mod view;

pub use config::Config;
pub use error::{IngestError, StoreError};
pub use fields::RecordKind;
pub use ingest::{ingest, IngestContext, IngestionResult, UploadFile};
pub use store::{MemoryStore, PgStore, Scope, Store, StoredRow};
