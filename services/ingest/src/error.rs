//! Error taxonomy for the ingestion pipeline
//!
//! Row-level problems are never errors: they become quarantined rows.
//! Only structural failures and store failures on the valid batch reach here.

use thiserror::Error;

/// Failure reported by the store collaborator.
///
/// The message (and detail, when the store gives one) is kept verbatim so an
/// operator can diagnose constraint violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub detail: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let detail = db_err
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string);
                Self {
                    message: db_err.message().to_string(),
                    detail,
                }
            }
            _ => Self::new(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Required upload context is absent; raised before the file is read
    #[error("missing context: {0}")]
    MissingContext(String),

    #[error("failed to read upload: {0}")]
    Read(#[from] std::io::Error),

    /// CSV is structurally malformed; no rows were processed
    #[error("CSV parse error: {0}")]
    Parse(#[from] csv::Error),

    /// Store rejected the valid batch (or the dedup snapshot); nothing was imported
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Store-side detail, when available
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Store(e) => e.detail.as_deref(),
            _ => None,
        }
    }

    /// Caller-side problem (bad file or context) rather than a store failure
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_message_is_verbatim() {
        let err = IngestError::from(
            StoreError::new("duplicate key value violates unique constraint")
                .with_detail("Key (policy_no)=(P1) already exists."),
        );
        assert_eq!(err.to_string(), "duplicate key value violates unique constraint");
        assert_eq!(err.detail(), Some("Key (policy_no)=(P1) already exists."));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_missing_context_is_client_error() {
        let err = IngestError::MissingContext("company".into());
        assert!(err.is_client_error());
        assert_eq!(err.detail(), None);
    }
}
