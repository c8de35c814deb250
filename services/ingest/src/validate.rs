//! Row Validator & Classifier
//!
//! Decides, per non-blank data row, whether it is importable and builds
//! either the canonical record or the rejection reason:
//! - Insurer billing: needs a valid date and an insurer
//! - OCR: needs an insurer, then must not repeat a seen dedup key
//! - Issuance: always importable

use chrono::NaiveDate;
use uuid::Uuid;

use crate::dedup::{dedup_key, DedupSet};
use crate::fields::{FieldType, RecordKind};
use crate::headers::HeaderResolver;
use crate::normalize::{parse_date_only, parse_numeric};
use crate::records::{FieldValue, ImportableRecord, RawRecord, Rejection, RejectionReason};

/// Insurers recognised from upload file names
const FILE_NAME_INSURERS: &[(&str, &str)] = &[("generali", "Generali"), ("allianz", "Allianz")];

/// Upload-time facts shared by every row of one file
#[derive(Debug, Clone)]
pub struct RowContext {
    pub kind: RecordKind,
    pub company_id: Uuid,
    pub project: Option<String>,
    /// Insurer picked by the operator before upload; wins over the row
    pub insurer: Option<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(ImportableRecord),
    Rejected(RejectionReason),
}

/// Insurer hinted by the upload's file name, e.g. `generali_jan.csv`
pub fn insurer_from_file_name(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase();
    FILE_NAME_INSURERS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, name)| *name)
}

/// Stateful per-file classifier (OCR dedup state lives here)
pub struct Classifier<'a> {
    ctx: &'a RowContext,
    resolver: &'a HeaderResolver,
    seen: DedupSet,
    file_insurer: Option<&'static str>,
}

impl<'a> Classifier<'a> {
    pub fn new(ctx: &'a RowContext, resolver: &'a HeaderResolver, seen: DedupSet) -> Self {
        Self {
            ctx,
            resolver,
            seen,
            file_insurer: insurer_from_file_name(&ctx.file_name),
        }
    }

    pub fn classify(&mut self, row: &RawRecord) -> Outcome {
        match self.ctx.kind {
            RecordKind::InsurerBilling => self.classify_billing(row),
            RecordKind::Ocr => self.classify_ocr(row),
            RecordKind::Issuance => {
                let insurer = self.resolver.field(row, "insurer");
                Outcome::Accepted(self.build(row, insurer, None))
            }
        }
    }

    fn classify_billing(&self, row: &RawRecord) -> Outcome {
        let date = self.billing_date(row);
        let insurer = self.resolve_insurer(row);

        let mut reason = RejectionReason::default();
        if date.is_none() {
            reason.push(Rejection::NoValidDate);
        }
        if insurer.is_none() {
            reason.push(Rejection::MissingInsurer);
        }
        if !reason.is_empty() {
            return Outcome::Rejected(reason);
        }
        Outcome::Accepted(self.build(row, insurer, date))
    }

    fn classify_ocr(&mut self, row: &RawRecord) -> Outcome {
        let Some(insurer) = self.resolve_insurer(row) else {
            return Outcome::Rejected(Rejection::MissingInsurer.into());
        };
        let key = dedup_key(
            self.resolver.field(row, "vehicle_no").as_deref(),
            self.resolver.field(row, "date_issue").as_deref(),
        );
        if !self.seen.insert(key) {
            return Outcome::Rejected(Rejection::Duplicate.into());
        }
        Outcome::Accepted(self.build(row, Some(insurer), None))
    }

    /// Issue date, falling back to the transaction date column
    fn billing_date(&self, row: &RawRecord) -> Option<NaiveDate> {
        ["issue_date", "transaction_date"]
            .iter()
            .filter_map(|column| self.resolver.field(row, column))
            .find_map(|raw| parse_date_only(&raw))
    }

    /// Context insurer, then the row's column, then the file name hint
    fn resolve_insurer(&self, row: &RawRecord) -> Option<String> {
        self.ctx
            .insurer
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.resolver.field(row, "insurer"))
            .or_else(|| self.file_insurer.map(str::to_string))
    }

    fn build(
        &self,
        row: &RawRecord,
        insurer: Option<String>,
        billing_date: Option<NaiveDate>,
    ) -> ImportableRecord {
        let kind = self.ctx.kind;
        let values = kind
            .fields()
            .iter()
            .map(|spec| {
                let raw = self.resolver.field(row, spec.column);
                let value = match (spec.column, spec.ty) {
                    ("insurer", _) => FieldValue::Text(insurer.clone()),
                    ("issue_date", _) if billing_date.is_some() => FieldValue::Date(billing_date),
                    ("file_name", _) if kind == RecordKind::Ocr => {
                        FieldValue::Text(raw.or_else(|| Some(self.ctx.file_name.clone())))
                    }
                    (_, FieldType::Text) => FieldValue::Text(raw),
                    (_, FieldType::DateOnly) => {
                        FieldValue::Date(raw.as_deref().and_then(parse_date_only))
                    }
                    (_, FieldType::Numeric) => FieldValue::Numeric(parse_numeric(raw.as_deref())),
                };
                (spec.column, value)
            })
            .collect();

        ImportableRecord {
            kind,
            company_id: self.ctx.company_id,
            project: self.ctx.project.clone(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kind: RecordKind, insurer: Option<&str>, file_name: &str) -> RowContext {
        RowContext {
            kind,
            company_id: Uuid::nil(),
            project: Some("imotorbike".into()),
            insurer: insurer.map(str::to_string),
            file_name: file_name.into(),
        }
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(headers: &[String], values: &[&str]) -> RawRecord {
        RawRecord::new(
            headers
                .iter()
                .cloned()
                .zip(values.iter().map(|v| v.to_string()))
                .collect(),
        )
    }

    fn reason(outcome: Outcome) -> String {
        match outcome {
            Outcome::Rejected(r) => r.to_string(),
            Outcome::Accepted(_) => panic!("expected rejection"),
        }
    }

    fn accepted(outcome: Outcome) -> ImportableRecord {
        match outcome {
            Outcome::Accepted(r) => r,
            Outcome::Rejected(r) => panic!("unexpected rejection: {}", r),
        }
    }

    // -------------------------------------------------------------------------
    // INSURER BILLING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_billing_valid_row_is_transformed() {
        let h = headers(&["Issue Date", "Insurer", "Sum Insured (RM)", "Policy No.", "Expiry Date"]);
        let ctx = ctx(RecordKind::InsurerBilling, None, "billing.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::InsurerBilling.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let rec = accepted(c.classify(&row(&h, &["15/01/2026", "Allianz", "12,500.00", " P-1 ", "bad"])));
        assert_eq!(rec.date("issue_date"), NaiveDate::from_ymd_opt(2026, 1, 15));
        assert_eq!(rec.text("insurer"), Some("Allianz"));
        assert_eq!(rec.numeric("sum_insured"), Some(12500.0));
        assert_eq!(rec.text("policy_no"), Some("P-1"));
        assert_eq!(rec.value("expiry_date"), Some(&FieldValue::Date(None)));
        assert_eq!(rec.value("chassis"), Some(&FieldValue::Text(None)));
        assert_eq!(rec.project.as_deref(), Some("imotorbike"));
    }

    #[test]
    fn test_billing_reason_composition() {
        let h = headers(&["Issue Date", "Insurer"]);
        let ctx = ctx(RecordKind::InsurerBilling, None, "upload.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::InsurerBilling.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        assert_eq!(reason(c.classify(&row(&h, &["", "Allianz"]))), "No valid date");
        assert_eq!(reason(c.classify(&row(&h, &["2026-01-02", " "]))), "Missing insurer");
        assert_eq!(
            reason(c.classify(&row(&h, &["not a date", ""]))),
            "No valid date; Missing insurer"
        );
    }

    #[test]
    fn test_billing_falls_back_to_transaction_date() {
        let h = headers(&["Date", "Time", "Insurer"]);
        let ctx = ctx(RecordKind::InsurerBilling, None, "upload.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::InsurerBilling.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let rec = accepted(c.classify(&row(&h, &["02-Jan-2026", "09:14", "Generali"])));
        assert_eq!(rec.date("issue_date"), NaiveDate::from_ymd_opt(2026, 1, 2));
        assert_eq!(rec.date("transaction_date"), NaiveDate::from_ymd_opt(2026, 1, 2));
        assert_eq!(rec.text("transaction_time"), Some("09:14"));
    }

    #[test]
    fn test_billing_context_insurer_wins_over_row() {
        let h = headers(&["Issue Date", "Insurer"]);
        let ctx = ctx(RecordKind::InsurerBilling, Some("Generali"), "upload.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::InsurerBilling.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let rec = accepted(c.classify(&row(&h, &["2026-01-02", "Allianz"])));
        assert_eq!(rec.text("insurer"), Some("Generali"));
    }

    #[test]
    fn test_billing_file_name_hint_fills_missing_insurer() {
        let h = headers(&["Issue Date", "Insurer"]);
        let ctx = ctx(RecordKind::InsurerBilling, None, "Allianz_Jan2026.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::InsurerBilling.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let rec = accepted(c.classify(&row(&h, &["2026-01-02", ""])));
        assert_eq!(rec.text("insurer"), Some("Allianz"));
    }

    #[test]
    fn test_billing_duplicates_are_allowed() {
        let h = headers(&["Issue Date", "Insurer", "Vehicle No"]);
        let ctx = ctx(RecordKind::InsurerBilling, None, "upload.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::InsurerBilling.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let r = row(&h, &["2026-01-02", "Allianz", "ABC 1"]);
        assert!(matches!(c.classify(&r), Outcome::Accepted(_)));
        assert!(matches!(c.classify(&r), Outcome::Accepted(_)));
    }

    // -------------------------------------------------------------------------
    // OCR TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_ocr_in_batch_duplicate() {
        let h = headers(&["Date Issue", "Vehicle No", "Insurer", "Insured Name"]);
        let ctx = ctx(RecordKind::Ocr, None, "ocr.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::Ocr.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let first = row(&h, &["15/01/2026", "WXY 1234", "Allianz", "Ali"]);
        let second = row(&h, &["2026-01-15", "wxy  1234", "Allianz", "Ali Bin Abu"]);
        let rec = accepted(c.classify(&first));
        assert_eq!(rec.text("file_name"), Some("ocr.csv"));
        assert_eq!(reason(c.classify(&second)), "Duplicate");
    }

    #[test]
    fn test_ocr_persisted_duplicate() {
        let h = headers(&["Date Issue", "Vehicle No", "Insurer"]);
        let ctx = ctx(RecordKind::Ocr, None, "ocr.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::Ocr.fields());
        let seen = DedupSet::seeded(vec![(Some("WXY1234"), Some("2026-01-15"))]);
        let mut c = Classifier::new(&ctx, &resolver, seen);

        assert_eq!(
            reason(c.classify(&row(&h, &["15 Jan 2026", "wxy1234", "Allianz"]))),
            "Duplicate"
        );
    }

    #[test]
    fn test_ocr_insurer_checked_before_duplicate() {
        let h = headers(&["Date Issue", "Vehicle No", "Insurer"]);
        let ctx = ctx(RecordKind::Ocr, None, "ocr.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::Ocr.fields());
        let seen = DedupSet::seeded(vec![(Some("WXY1234"), Some("2026-01-15"))]);
        let mut c = Classifier::new(&ctx, &resolver, seen);

        assert_eq!(
            reason(c.classify(&row(&h, &["2026-01-15", "WXY1234", ""]))),
            "Missing insurer"
        );
    }

    #[test]
    fn test_ocr_rejected_row_does_not_claim_key() {
        let h = headers(&["Date Issue", "Vehicle No", "Insurer"]);
        let ctx = ctx(RecordKind::Ocr, None, "ocr.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::Ocr.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        assert_eq!(reason(c.classify(&row(&h, &["2026-01-15", "A1", ""]))), "Missing insurer");
        assert!(matches!(
            c.classify(&row(&h, &["2026-01-15", "A1", "Allianz"])),
            Outcome::Accepted(_)
        ));
    }

    // -------------------------------------------------------------------------
    // ISSUANCE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_issuance_always_accepted() {
        let h = headers(&["Purchased Date", "Plate No.", "Partner"]);
        let ctx = ctx(RecordKind::Issuance, None, "issuance.csv");
        let resolver = HeaderResolver::new(&h, RecordKind::Issuance.fields());
        let mut c = Classifier::new(&ctx, &resolver, DedupSet::default());

        let rec = accepted(c.classify(&row(&h, &["05/02/2026 18:30", "ABC 1", "Shopee"])));
        assert_eq!(rec.text("purchased_date"), Some("05/02/2026 18:30"));
        assert_eq!(rec.text("insurer"), None);
        assert_eq!(rec.text("partner"), Some("Shopee"));
    }

    #[test]
    fn test_insurer_from_file_name() {
        assert_eq!(insurer_from_file_name("GENERALI-feb.csv"), Some("Generali"));
        assert_eq!(insurer_from_file_name("allianz.csv"), Some("Allianz"));
        assert_eq!(insurer_from_file_name("billing.csv"), None);
    }
}
