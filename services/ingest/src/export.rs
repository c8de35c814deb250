//! CSV export of a filtered view
//!
//! Each view exports a fixed column projection, not the stored record.

use chrono::NaiveDate;
use csv::WriterBuilder;
use serde_json::Value;

use crate::fields::RecordKind;
use crate::store::StoredRow;
use crate::view::raw_display_value;

/// Where an exported cell comes from
#[derive(Debug, Clone, Copy)]
pub enum Source {
    Field(&'static str),
    /// Best match among `raw_data` headers (quarantined rows)
    Raw(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct ExportColumn {
    pub header: &'static str,
    pub source: Source,
}

const fn col(header: &'static str, field: &'static str) -> ExportColumn {
    ExportColumn {
        header,
        source: Source::Field(field),
    }
}

pub const BILLING_EXPORT: &[ExportColumn] = &[
    col("Issue Date", "issue_date"),
    col("Insurer", "insurer"),
    col("Policy No.", "policy_no"),
    col("Name of Insured", "client_name"),
    col("Vehicle No", "vehicle_no"),
    col("Sum Insured (RM)", "sum_insured"),
    col("Gross Premium (RM)", "gross_premium"),
    col("Nett Premium (RM)", "nett_premium"),
    col("Amount Payable (RM)", "amount_payable"),
    col("Status", "status"),
];

pub const OCR_EXPORT: &[ExportColumn] = &[
    col("Date Issue", "date_issue"),
    col("Vehicle No", "vehicle_no"),
    col("Insured Name", "insured_name"),
    col("Insurer", "insurer"),
    col("Type of Cover", "type_of_cover"),
    col("Sum Insured", "sum_insured"),
    col("Gross Premium", "gross_premium"),
    col("Total Amount Payable", "total_amount_payable_rounded"),
    col("File Name", "file_name"),
];

pub const ISSUANCE_EXPORT: &[ExportColumn] = &[
    col("Purchased Date", "purchased_date"),
    col("Plate No", "plate_no"),
    col("Customer", "customer"),
    col("Insurer", "insurer"),
    col("Coverage", "coverage"),
    col("Partner", "partner"),
    col("Time Lapsed", "time_lapsed"),
];

pub const ERRORS_EXPORT: &[ExportColumn] = &[
    col("Source", "source"),
    col("Reason", "rejection_reason"),
    ExportColumn {
        header: "Client",
        source: Source::Raw(&["name of insured", "client", "client_name"]),
    },
    ExportColumn {
        header: "Vehicle No",
        source: Source::Raw(&["vehicle no", "vehicle no.", "vehicle_no"]),
    },
    ExportColumn {
        header: "Policy No",
        source: Source::Raw(&["policy no.", "policy no", "policy_no"]),
    },
    col("File Name", "file_name"),
    col("Uploaded At", "created_at"),
];

pub fn export_columns(kind: RecordKind) -> &'static [ExportColumn] {
    match kind {
        RecordKind::InsurerBilling => BILLING_EXPORT,
        RecordKind::Ocr => OCR_EXPORT,
        RecordKind::Issuance => ISSUANCE_EXPORT,
    }
}

/// `<prefix>_export_<YYYY-MM-DD>.csv`
pub fn export_file_name(prefix: &str, today: NaiveDate) -> String {
    format!("{}_export_{}.csv", prefix, today.format("%Y-%m-%d"))
}

fn cell(row: &StoredRow, source: Source) -> String {
    match source {
        Source::Field(field) => match row.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        },
        Source::Raw(keys) => match row.get("raw_data").and_then(Value::as_object) {
            Some(raw) => raw_display_value(raw, keys),
            None => String::new(),
        },
    }
}

/// Serialize rows with a header line, one record per row
pub fn to_csv(rows: &[StoredRow], columns: &[ExportColumn]) -> Result<String, csv::Error> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(columns.iter().map(|c| c.header))?;
    for row in rows {
        writer.write_record(columns.iter().map(|c| cell(row, c.source)))?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> StoredRow {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_export_file_name() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        assert_eq!(export_file_name("insurer_billing", today), "insurer_billing_export_2026-02-07.csv");
    }

    #[test]
    fn test_projection_order_and_nulls() {
        let rows = vec![row(json!({
            "purchased_date": "05/02/2026 18:30",
            "plate_no": "ABC 1",
            "customer": "Tan, Ah Kow",
            "insurer": null,
            "partner": "Shopee",
            "id": "ignored"
        }))];
        let csv = to_csv(&rows, ISSUANCE_EXPORT).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Purchased Date,Plate No,Customer,Insurer,Coverage,Partner,Time Lapsed")
        );
        assert_eq!(lines.next(), Some("05/02/2026 18:30,ABC 1,\"Tan, Ah Kow\",,,Shopee,"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_numbers_are_written_plainly() {
        let rows = vec![row(json!({"issue_date": "2026-01-15", "sum_insured": 12000.5}))];
        let csv = to_csv(&rows, BILLING_EXPORT).unwrap();
        assert!(csv.lines().nth(1).unwrap().starts_with("2026-01-15,,,,,12000.5,"));
    }

    #[test]
    fn test_errors_projection_reads_raw_payload() {
        let rows = vec![row(json!({
            "source": "insurer_billing",
            "rejection_reason": "No valid date",
            "raw_data": {"Policy No.": "P-2", "Insurer": "Allianz"},
            "file_name": "billing.csv",
            "created_at": "2026-02-01T10:00:00+00:00"
        }))];
        let csv = to_csv(&rows, ERRORS_EXPORT).unwrap();
        assert_eq!(
            csv.lines().nth(1),
            Some("insurer_billing,No valid date,—,—,P-2,billing.csv,2026-02-01T10:00:00+00:00")
        );
    }
}
