//! Ledger storage abstraction.
//!
//! The engine talks to the bookkeeping database only through
//! [`LedgerStore`]; the sqlite backend in [`sqlite`] implements the
//! Tilitin file layout. Entry magnitudes are unsigned at this seam,
//! paired with a debit flag, matching the on-disk convention.

use chrono::NaiveDate;

use crate::error::StoreError;

pub mod sqlite;

/// Ledger-side account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub i64);

/// Accounting period id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodId(pub i64);

/// Document id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentId(pub i64);

/// One chart-of-accounts row.
#[derive(Debug, Clone)]
pub struct AccountRef {
    pub id: AccountId,
    pub number: String,
    pub name: String,
}

/// A document to create: a dated cover for a balanced entry set.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub period: PeriodId,
    pub number: i64,
    pub date: NaiveDate,
}

/// One entry row to write. `amount` is an unsigned magnitude; the
/// debit flag carries the side.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub document: DocumentId,
    pub account: AccountId,
    pub is_debit: bool,
    pub amount: f64,
    pub description: String,
    pub row_number: i64,
}

/// An existing entry row, as needed for duplicate comparison.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub document: DocumentId,
    pub account: AccountId,
    pub is_debit: bool,
    pub amount: f64,
}

/// A historical description row, newest first.
#[derive(Debug, Clone)]
pub struct HistoricalDescription {
    pub description: String,
}

/// Persisted cost-basis state of one symbol for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub average: f64,
}

/// Operations the import engine needs from a ledger database.
pub trait LedgerStore {
    /// The full chart of accounts.
    fn accounts(&self) -> Result<Vec<AccountRef>, StoreError>;

    /// The period containing the date, if one exists. Periods are
    /// never created implicitly.
    fn find_period(&self, date: NaiveDate) -> Result<Option<PeriodId>, StoreError>;

    /// Highest document number in use within a period, zero when the
    /// period has no documents yet. Numbering restarts per period.
    fn max_document_number(&self, period: PeriodId) -> Result<i64, StoreError>;

    fn create_document(&self, document: &NewDocument) -> Result<DocumentId, StoreError>;

    fn create_entry(&self, entry: &NewEntry) -> Result<(), StoreError>;

    /// All entries of documents dated exactly `date` inside the
    /// period, grouped by their document for equivalence checks.
    fn entries_by_document_date(
        &self,
        period: PeriodId,
        date: NaiveDate,
    ) -> Result<Vec<StoredEntry>, StoreError>;

    /// Whether `(service_tag, group_id)` was imported before.
    fn has_import_mark(&self, service_tag: &str, group_id: &str) -> Result<bool, StoreError>;

    fn add_import_mark(
        &self,
        service_tag: &str,
        group_id: &str,
        document: DocumentId,
    ) -> Result<(), StoreError>;

    /// Entry descriptions matching a SQL LIKE pattern, newest
    /// document first. Fallback seeding source for ledgers written
    /// before position snapshots existed.
    fn historical_descriptions(
        &self,
        pattern: &str,
    ) -> Result<Vec<HistoricalDescription>, StoreError>;

    /// All persisted position snapshots of a service.
    fn position_snapshots(
        &self,
        service_tag: &str,
    ) -> Result<Vec<PositionSnapshot>, StoreError>;

    /// Persist (or overwrite) one position snapshot.
    fn save_position_snapshot(
        &self,
        service_tag: &str,
        snapshot: &PositionSnapshot,
    ) -> Result<(), StoreError>;

    /// Signed balance of an account over all its entries, debits
    /// positive. Opening-balance rows are excluded.
    fn account_balance(&self, account: AccountId) -> Result<f64, StoreError>;
}
