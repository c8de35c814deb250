//! Canonical field tables per record kind
//!
//! Known column mappings are explicit, never inferred: every canonical field
//! lists the exact header spellings seen in vendor exports (priority order),
//! plus an optional substring rule for the few columns whose naming varies
//! too much for an alias list.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared storage type of a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    DateOnly,
    Numeric,
}

/// Substring fallback used only when no exact alias matched.
///
/// Inclusion and exclusion live in the same rule so they cannot drift apart.
#[derive(Debug, Clone, Copy)]
pub struct FallbackRule {
    /// Every one of these must appear in the normalized header
    pub all_of: &'static [&'static str],
    /// None of these may appear in the normalized header
    pub none_of: &'static [&'static str],
}

impl FallbackRule {
    pub fn matches(&self, normalized_header: &str) -> bool {
        self.all_of.iter().all(|s| normalized_header.contains(s))
            && !self.none_of.iter().any(|s| normalized_header.contains(s))
    }
}

/// One canonical field of a record kind
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Storage column name, also the canonical field identifier
    pub column: &'static str,
    pub ty: FieldType,
    /// Normalized header spellings, highest priority first
    pub aliases: &'static [&'static str],
    pub fallback: Option<FallbackRule>,
}

const fn text(column: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, ty: FieldType::Text, aliases, fallback: None }
}

const fn date(column: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, ty: FieldType::DateOnly, aliases, fallback: None }
}

const fn numeric(column: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, ty: FieldType::Numeric, aliases, fallback: None }
}

const fn fuzzy(
    spec: FieldSpec,
    all_of: &'static [&'static str],
    none_of: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        fallback: Some(FallbackRule { all_of, none_of }),
        ..spec
    }
}

// =============================================================================
// INSURER BILLING - Allianz / Generali billing exports
// =============================================================================

pub const BILLING_FIELDS: &[FieldSpec] = &[
    fuzzy(text("insurer", &["insurer", "insurer name"]), &["insurer"], &["contact", "name of insured"]),
    text("row_number", &["no.", "no"]),
    fuzzy(text("policy_no", &["policy no.", "policy no", "policy_no"]), &["policy", "no"], &["prev"]),
    text("client_name", &["name of insured", "client", "client_name"]),
    fuzzy(text("vehicle_no", &["vehicle no", "vehicle no.", "vehicle_no"]), &["vehicle", "no"], &["type", "make"]),
    text("status", &["status"]),
    fuzzy(
        numeric("sum_insured", &["sum insured (rm)", "sum insured", "sum_insured"]),
        &["sum", "insured"],
        &["name of insured"],
    ),
    text("cn_no", &["c/n no.", "c/n no", "cn_no"]),
    text("account_no", &["account no.", "account no", "account_no"]),
    fuzzy(date("issue_date", &["issue date", "issue_date"]), &["issue", "date"], &["issued by"]),
    text("issued_by", &["issued by", "issued_by"]),
    text("type", &["type"]),
    date("effective_date", &["effective date", "effective_date"]),
    date("expiry_date", &["expiry date", "expiry_date"]),
    text("vehicle_type", &["vehicle type", "vehicle_type"]),
    text("coverage_type", &["coverage type", "coverage_type"]),
    text("chassis", &["chassis"]),
    text("jpj_status", &["jpj status", "jpj_status"]),
    fuzzy(
        numeric("gross_premium", &["gross premium (rm)", "gross premium", "gross_premium"]),
        &["gross", "premium"],
        &[],
    ),
    numeric("rebate", &["rebate (rm)", "rebate"]),
    numeric("gst", &["gst (rm)", "gst"]),
    fuzzy(
        numeric("service_tax", &["serv. tax (rm)", "serv. tax", "service_tax"]),
        &["serv", "tax"],
        &[],
    ),
    numeric("stamp", &["stamp (rm)", "stamp"]),
    numeric("premium_due", &["premium due (rm)", "premium due", "premium_due"]),
    numeric("commission", &["commission (rm)", "commission"]),
    numeric("gst_commission", &["gst commission (rm)", "gst commission", "gst_commission"]),
    numeric("nett_premium", &["nett premium (rm)", "nett premium", "nett_premium"]),
    fuzzy(
        numeric(
            "amount_payable",
            &["amount payable (rounded) (rm)", "amount payable", "amount_payable"],
        ),
        &["amount", "payable"],
        &[],
    ),
    numeric("ptv_amount", &["ptv amount", "ptv_amount"]),
    numeric("premium_due_after_ptv", &["premium due after ptv", "premium_due_after_ptv"]),
    text("agent_code", &["agent code", "agent_code"]),
    text("user_id", &["userid", "user_id"]),
    date("transaction_date", &["date", "transaction date", "transaction_date"]),
    text("transaction_time", &["time", "transaction time", "transaction_time"]),
    text("class_product", &["class & product", "class_product"]),
    text("quotation", &["quotation"]),
    text("repl_prev_no", &["repl/prev no.", "repl/prev no", "repl_prev_no"]),
    text("trx_status", &["trx status", "trx_status"]),
    numeric("total_amount", &["totalamt", "total_amount"]),
];

// =============================================================================
// OCR - rows extracted from scanned cover notes
// =============================================================================

pub const OCR_FIELDS: &[FieldSpec] = &[
    fuzzy(
        date("date_issue", &["date issue", "date_issue", "date of issue", "issue date"]),
        &["date", "issue"],
        &["issued by"],
    ),
    fuzzy(
        text("vehicle_no", &["vehicle no", "vehicle no.", "vehicle_no", "vehicle number"]),
        &["vehicle"],
        &["make", "model", "type"],
    ),
    text("insured_name", &["insured name", "insured_name", "name of insured"]),
    text("insured_ic_no", &["insured ic no", "insured_ic_no", "ic no"]),
    text("insurer_contact_no", &["insurer contact no", "insurer_contact_no", "contact no"]),
    text("insured_email", &["insured email", "insured_email", "email"]),
    text("vehicle_make_model", &["vehicle make/model", "vehicle_make_model", "vehicle make model"]),
    text("type_of_cover", &["type of cover", "type_of_cover"]),
    fuzzy(text("sum_insured", &["sum insured", "sum_insured"]), &["sum", "insured"], &["name of insured"]),
    text("premium", &["premium"]),
    text("ncd", &["ncd"]),
    text("total_base_premium", &["total base premium", "total_base_premium"]),
    text("total_extra_coverage", &["total extra coverage", "total_extra_coverage"]),
    text("gross_premium", &["gross premium", "gross_premium"]),
    text("service_tax", &["service tax", "service_tax"]),
    text("stamp_duty", &["stamp duty", "stamp_duty"]),
    fuzzy(
        text(
            "total_amount_payable_rounded",
            &[
                "total amount payable (rounded)",
                "total amount payable",
                "total_amount_payable_rounded",
            ],
        ),
        &["payable"],
        &[],
    ),
    fuzzy(text("insurer", &["insurer", "insurer name"]), &["insurer"], &["contact"]),
    text("file_name", &["file_name", "file name", "filename", "source_filename"]),
    text("created_timestamp", &["created timestamp", "created_timestamp"]),
    text("formatted_timestamp", &["formatted timestamp", "formatted_timestamp"]),
    text("process_duration", &["process duration", "process_duration"]),
];

// =============================================================================
// ISSUANCE - partner issuance reports
// =============================================================================

pub const ISSUANCE_FIELDS: &[FieldSpec] = &[
    text("purchased_date", &["purchased date", "purchaseddate", "date"]),
    text("plate_no", &["plate no", "plate no.", "plateno", "plate"]),
    text("customer", &["customer"]),
    text("instant_quotation", &["instant quotation", "instantquotation", "quotation"]),
    text("insurer", &["insurer"]),
    text("coverage", &["coverage"]),
    text("time_lapsed", &["time lapsed", "timelapsed", "time"]),
    text("partner", &["partner"]),
];

// =============================================================================
// RECORD KINDS
// =============================================================================

/// The fixed set of record shapes this pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Issuance,
    #[serde(alias = "insurer-billing", alias = "billing")]
    InsurerBilling,
    Ocr,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [Self::Issuance, Self::InsurerBilling, Self::Ocr];

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Issuance => ISSUANCE_FIELDS,
            Self::InsurerBilling => BILLING_FIELDS,
            Self::Ocr => OCR_FIELDS,
        }
    }

    pub fn field(self, column: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.column == column)
    }

    /// Destination table in the store
    pub fn table(self) -> &'static str {
        match self {
            Self::Issuance => "issuances",
            Self::InsurerBilling => "insurer_billing_data",
            Self::Ocr => "ocr_data_table",
        }
    }

    /// Label written to `upload_errors.source`
    pub fn source_label(self) -> &'static str {
        match self {
            Self::Issuance => "issuance",
            Self::InsurerBilling => "insurer_billing",
            Self::Ocr => "ocr",
        }
    }

    /// Workflow/project column, when the table has one
    pub fn project_column(self) -> Option<&'static str> {
        match self {
            Self::Issuance => None,
            Self::InsurerBilling | Self::Ocr => Some("project"),
        }
    }

    /// Only OCR rows are deduplicated; repeat billing entries are legitimate
    pub fn deduplicates(self) -> bool {
        matches!(self, Self::Ocr)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_label())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "issuance" | "issuances" => Ok(Self::Issuance),
            "insurer_billing" | "billing" => Ok(Self::InsurerBilling),
            "ocr" => Ok(Self::Ocr),
            other => Err(format!(
                "Unknown record kind: '{}'. Available: issuance, insurer-billing, ocr",
                other
            )),
        }
    }
}
