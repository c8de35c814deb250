//! Ingest CLI - Loads one vendor CSV into the ops database
//!
//! Responsibilities:
//! - Read a billing, OCR or issuance CSV from disk
//! - Classify every row (importable vs quarantined)
//! - Persist both partitions and an audit entry
//! - Print an operator summary
//!
//! `--dry-run` classifies without connecting to the database.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use uuid::Uuid;

use ingest::dedup::DedupSet;
use ingest::ingest::{parse_csv, prepare};
use ingest::notify::ChangeFeed;
use ingest::validate::RowContext;
use ingest::{Config, IngestContext, IngestionResult, PgStore, RecordKind, UploadFile};

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Ingests insurer-ops CSV exports")]
struct Args {
    /// Record kind: issuance, insurer-billing, ocr
    #[arg(long)]
    kind: RecordKind,

    /// CSV file to ingest
    #[arg(long)]
    file: PathBuf,

    /// Tenant id (UUID); looked up from --project when omitted
    #[arg(long)]
    company_id: Option<Uuid>,

    /// Workflow/project name
    #[arg(long)]
    project: Option<String>,

    /// Insurer for every row, overriding the file's insurer column
    #[arg(long)]
    insurer: Option<String>,

    /// User recorded in the audit log
    #[arg(long)]
    user: Option<String>,

    /// Classify only; nothing is written
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let file = UploadFile::from_path(&args.file);

    println!("=== Insurer Ops Ingest ===");
    println!("Kind: {}", args.kind);
    println!("File: {}", args.file.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    if args.dry_run {
        return dry_run(&args, &file).await;
    }

    let config = Config::from_env()?;
    let store = PgStore::connect(&config.db_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    let feed = ChangeFeed::new();

    let ctx = IngestContext {
        kind: args.kind,
        company_id: args.company_id,
        project: args.project.clone(),
        insurer: args.insurer.clone(),
        user: args.user.clone(),
    };

    let result = match ingest::ingest(&store, &feed, &file, &ctx).await {
        Ok(result) => result,
        Err(e) => {
            if let Some(detail) = e.detail() {
                eprintln!("Detail: {}", detail);
            }
            return Err(e).context("Ingestion failed");
        }
    };

    print_result(&result);
    Ok(())
}

/// Classify the file and report, without a database
async fn dry_run(args: &Args, file: &UploadFile) -> Result<()> {
    let text = file.read_text().await.context("Failed to read file")?;
    let parsed = parse_csv(&text).context("Failed to parse CSV")?;
    println!("Headers: {}", parsed.headers.join(" | "));

    let ctx = RowContext {
        kind: args.kind,
        company_id: args.company_id.unwrap_or_else(Uuid::nil),
        project: args.project.clone(),
        insurer: args.insurer.clone(),
        file_name: file.name(),
    };
    // No persisted rows to seed from: only in-file duplicates are caught
    let prepared = prepare(&ctx, &parsed, DedupSet::default(), Utc::now());

    for rejected in prepared.rejected.iter().take(5) {
        println!("  skipped: {}", rejected.rejection_reason());
    }
    if prepared.rejected.len() > 5 {
        println!("  ... and {} more", prepared.rejected.len() - 5);
    }

    print_result(&IngestionResult::from(&prepared));
    println!("Dry run: nothing written");
    Ok(())
}

fn print_result(result: &IngestionResult) {
    println!("\n=== Summary ===");
    println!("Data rows: {}", result.total_data_rows);
    println!("Blank rows dropped: {}", result.blank_rows_dropped);
    println!("Imported: {}", result.imported_count);
    println!("Skipped: {}", result.rejected_count);
    println!("{}", result.summary());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "ingest",
            "--kind",
            "insurer-billing",
            "--file",
            "billing.csv",
            "--project",
            "imotorbike",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.kind, RecordKind::InsurerBilling);
        assert!(args.dry_run);
        assert_eq!(args.company_id, None);
    }

    #[test]
    fn test_args_reject_unknown_kind() {
        assert!(Args::try_parse_from(["ingest", "--kind", "claims", "--file", "x.csv"]).is_err());
    }
}
