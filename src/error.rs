use chrono::NaiveDate;
use thiserror::Error;

/// Errors reported by the description codec.
///
/// Always recoverable during history seeding (the offending row is
/// skipped); surfaced to the caller only from explicit decode requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("description has no recognized type keyword: {0:?}")]
    UnknownType(String),
    #[error("description note does not match any known pattern: {0:?}")]
    UnknownNote(String),
    #[error("number {0:?} in description cannot be parsed")]
    BadNumber(String),
}

/// Error type raised by the store. The engine treats the store as an
/// opaque collaborator, so its failures come through boxed.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The import error taxonomy.
///
/// `Grouping`, `UnknownAccount`, `UnconfiguredAccount` and `NoPeriod`
/// abort the whole run. `Classification` and `Unsupported` follow the
/// configured [`ErrorPolicy`](crate::config::ErrorPolicy). `Codec`
/// never escalates during seeding. Duplicates are not errors at all.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot generate a stable id for group at line {line}: {reason}")]
    Grouping { line: usize, reason: String },

    #[error("cannot classify group {group_id}: {reason}")]
    Classification { group_id: String, reason: String },

    #[error("account number {number} does not exist in the ledger")]
    UnknownAccount { number: String },

    #[error("account role `{role}` is not configured")]
    UnconfiguredAccount { role: String },

    #[error("no accounting period covers {date}")]
    NoPeriod { date: NaiveDate },

    #[error("transaction residual {residual:.2} exceeds the rounding tolerance")]
    Imbalance { residual: f64 },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ledger store error: {0}")]
    Store(#[source] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for ImportError {
    fn from(err: StoreError) -> Self {
        ImportError::Store(err)
    }
}

impl ImportError {
    /// Whether this error aborts the remaining groups regardless of the
    /// configured error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::Grouping { .. }
                | ImportError::UnknownAccount { .. }
                | ImportError::UnconfiguredAccount { .. }
                | ImportError::NoPeriod { .. }
                | ImportError::Store(_)
                | ImportError::Io(_)
                | ImportError::Csv(_)
                | ImportError::Config(_)
        )
    }
}
