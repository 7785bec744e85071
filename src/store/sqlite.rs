//! Sqlite ledger backend.
//!
//! Works directly against the Tilitin bookkeeping file layout:
//! `account`, `period`, `document` and `entry` tables with dates
//! stored as milliseconds since the epoch. The `imports` side table
//! for idempotency marks is ours and is created lazily so a pristine
//! ledger file stays byte-compatible until the first import.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{
    AccountId, AccountRef, DocumentId, HistoricalDescription, LedgerStore, NewDocument, NewEntry,
    PeriodId, PositionSnapshot, StoredEntry,
};

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS account (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    number TEXT NOT NULL,
    name TEXT NOT NULL,
    type INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS period (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_date INTEGER NOT NULL,
    end_date INTEGER NOT NULL,
    locked INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS document (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    number INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    date INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS entry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL,
    debit INTEGER NOT NULL,
    amount REAL NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    row_number INTEGER NOT NULL,
    flags INTEGER NOT NULL DEFAULT 0
);
"#;

const POSITIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_tag TEXT NOT NULL,
    symbol TEXT NOT NULL,
    quantity REAL NOT NULL,
    average REAL NOT NULL,
    UNIQUE (service_tag, symbol)
);
"#;

const IMPORTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_tag TEXT NOT NULL,
    tx_id TEXT NOT NULL,
    document_id INTEGER,
    UNIQUE (service_tag, tx_id)
);
CREATE INDEX IF NOT EXISTS idx_imports_document ON imports (document_id);
"#;

pub struct SqliteStore {
    conn: Connection,
}

fn date_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        .timestamp_millis()
}

impl SqliteStore {
    /// Open an existing ledger file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open a ledger file, creating the base tables when missing.
    pub fn open_or_create(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(BASE_SCHEMA)?;
        Ok(Self { conn })
    }

    fn has_table(&self, name: &str) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn ensure_side_table(&self, name: &str, schema: &str) -> Result<(), StoreError> {
        if !self.has_table(name)? {
            debug!(table = name, "creating side table");
            self.conn.execute_batch(schema)?;
        }
        Ok(())
    }

    /// Insert a chart-of-accounts row. Mostly useful for setting up
    /// fresh ledgers and test fixtures.
    pub fn create_account(&self, number: &str, name: &str) -> Result<AccountId, StoreError> {
        self.conn.execute(
            "INSERT INTO account (number, name) VALUES (?1, ?2)",
            params![number, name],
        )?;
        Ok(AccountId(self.conn.last_insert_rowid()))
    }

    /// Insert an accounting period covering `[start, end]`.
    pub fn create_period(&self, start: NaiveDate, end: NaiveDate) -> Result<PeriodId, StoreError> {
        self.conn.execute(
            "INSERT INTO period (start_date, end_date) VALUES (?1, ?2)",
            params![date_millis(start), date_millis(end)],
        )?;
        Ok(PeriodId(self.conn.last_insert_rowid()))
    }

    /// Number of documents in the ledger.
    pub fn document_count(&self) -> Result<i64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM document", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl LedgerStore for SqliteStore {
    fn accounts(&self) -> Result<Vec<AccountRef>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, number, name FROM account ORDER BY number")?;
        let rows = stmt.query_map([], |row| {
            Ok(AccountRef {
                id: AccountId(row.get(0)?),
                number: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_period(&self, date: NaiveDate) -> Result<Option<PeriodId>, StoreError> {
        let millis = date_millis(date);
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM period WHERE start_date <= ?1 AND end_date >= ?1",
                params![millis],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(PeriodId))
    }

    fn max_document_number(&self, period: PeriodId) -> Result<i64, StoreError> {
        let number: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(number), 0) FROM document WHERE period_id = ?1",
            params![period.0],
            |row| row.get(0),
        )?;
        Ok(number)
    }

    fn create_document(&self, document: &NewDocument) -> Result<DocumentId, StoreError> {
        self.conn.execute(
            "INSERT INTO document (number, period_id, date) VALUES (?1, ?2, ?3)",
            params![document.number, document.period.0, date_millis(document.date)],
        )?;
        Ok(DocumentId(self.conn.last_insert_rowid()))
    }

    fn create_entry(&self, entry: &NewEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO entry (document_id, account_id, debit, amount, description, row_number, flags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                entry.document.0,
                entry.account.0,
                i64::from(entry.is_debit),
                entry.amount,
                entry.description,
                entry.row_number,
            ],
        )?;
        Ok(())
    }

    fn entries_by_document_date(
        &self,
        period: PeriodId,
        date: NaiveDate,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT entry.document_id, entry.account_id, entry.debit, entry.amount
             FROM entry
             JOIN document ON document.id = entry.document_id
             WHERE document.period_id = ?1 AND document.date = ?2
             ORDER BY entry.document_id, entry.row_number",
        )?;
        let rows = stmt.query_map(params![period.0, date_millis(date)], |row| {
            Ok(StoredEntry {
                document: DocumentId(row.get(0)?),
                account: AccountId(row.get(1)?),
                is_debit: row.get::<_, i64>(2)? != 0,
                amount: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn has_import_mark(&self, service_tag: &str, group_id: &str) -> Result<bool, StoreError> {
        if !self.has_table("imports")? {
            return Ok(false);
        }
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM imports WHERE service_tag = ?1 AND tx_id = ?2",
                params![service_tag, group_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_import_mark(
        &self,
        service_tag: &str,
        group_id: &str,
        document: DocumentId,
    ) -> Result<(), StoreError> {
        self.ensure_side_table("imports", IMPORTS_SCHEMA)?;
        self.conn.execute(
            "INSERT INTO imports (service_tag, tx_id, document_id) VALUES (?1, ?2, ?3)",
            params![service_tag, group_id, document.0],
        )?;
        Ok(())
    }

    fn historical_descriptions(
        &self,
        pattern: &str,
    ) -> Result<Vec<HistoricalDescription>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT entry.description
             FROM entry
             LEFT JOIN document ON document.id = entry.document_id
             WHERE entry.description LIKE ?1
             ORDER BY document.date DESC, entry.id DESC",
        )?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok(HistoricalDescription {
                description: row.get(0)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn position_snapshots(
        &self,
        service_tag: &str,
    ) -> Result<Vec<PositionSnapshot>, StoreError> {
        if !self.has_table("positions")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT symbol, quantity, average FROM positions WHERE service_tag = ?1 ORDER BY symbol",
        )?;
        let rows = stmt.query_map(params![service_tag], |row| {
            Ok(PositionSnapshot {
                symbol: row.get(0)?,
                quantity: row.get(1)?,
                average: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn save_position_snapshot(
        &self,
        service_tag: &str,
        snapshot: &PositionSnapshot,
    ) -> Result<(), StoreError> {
        self.ensure_side_table("positions", POSITIONS_SCHEMA)?;
        self.conn.execute(
            "INSERT INTO positions (service_tag, symbol, quantity, average)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (service_tag, symbol)
             DO UPDATE SET quantity = excluded.quantity, average = excluded.average",
            params![service_tag, snapshot.symbol, snapshot.quantity, snapshot.average],
        )?;
        Ok(())
    }

    fn account_balance(&self, account: AccountId) -> Result<f64, StoreError> {
        // Debit rows add, credit rows subtract. Opening balances are
        // marked by their fixed description and stay out of the sum.
        let balance: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(debit * amount) + SUM((debit - 1) * amount), 0)
             FROM entry
             WHERE account_id = ?1 AND description <> 'Alkusaldo'",
            params![account.0],
            |row| row.get(0),
        )?;
        Ok(balance)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_ledger() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "kirjuri-store-test-{}-{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("ledger.sqlite")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn periods_resolve_by_containment() {
        let store = SqliteStore::open_or_create(&temp_ledger()).unwrap();
        let period = store
            .create_period(date(2018, 1, 1), date(2018, 12, 31))
            .unwrap();
        assert_eq!(store.find_period(date(2018, 6, 15)).unwrap(), Some(period));
        assert_eq!(store.find_period(date(2019, 1, 1)).unwrap(), None);
    }

    #[test]
    fn document_numbers_grow_from_max_within_period() {
        let store = SqliteStore::open_or_create(&temp_ledger()).unwrap();
        let period = store
            .create_period(date(2018, 1, 1), date(2018, 12, 31))
            .unwrap();
        let next_period = store
            .create_period(date(2019, 1, 1), date(2019, 12, 31))
            .unwrap();
        assert_eq!(store.max_document_number(period).unwrap(), 0);
        store
            .create_document(&NewDocument {
                period,
                number: 5,
                date: date(2018, 3, 1),
            })
            .unwrap();
        assert_eq!(store.max_document_number(period).unwrap(), 5);
        // Numbering restarts in the next period.
        assert_eq!(store.max_document_number(next_period).unwrap(), 0);
    }

    #[test]
    fn import_marks_are_unique_per_service() {
        let store = SqliteStore::open_or_create(&temp_ledger()).unwrap();
        assert!(!store.has_import_mark("KRAKEN", "tx-1").unwrap());
        store
            .add_import_mark("KRAKEN", "tx-1", DocumentId(1))
            .unwrap();
        assert!(store.has_import_mark("KRAKEN", "tx-1").unwrap());
        assert!(!store.has_import_mark("COINMOTION", "tx-1").unwrap());
        assert!(store
            .add_import_mark("KRAKEN", "tx-1", DocumentId(2))
            .is_err());
    }

    #[test]
    fn position_snapshots_upsert() {
        let store = SqliteStore::open_or_create(&temp_ledger()).unwrap();
        assert!(store.position_snapshots("KRAKEN").unwrap().is_empty());
        let snapshot = PositionSnapshot {
            symbol: "ETH".to_string(),
            quantity: 2.0,
            average: 99.0,
        };
        store.save_position_snapshot("KRAKEN", &snapshot).unwrap();
        store
            .save_position_snapshot(
                "KRAKEN",
                &PositionSnapshot {
                    symbol: "ETH".to_string(),
                    quantity: 1.0,
                    average: 99.0,
                },
            )
            .unwrap();
        let snapshots = store.position_snapshots("KRAKEN").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].quantity, 1.0);
        assert!(store.position_snapshots("NORDNET").unwrap().is_empty());
    }

    #[test]
    fn balance_excludes_opening_rows() {
        let store = SqliteStore::open_or_create(&temp_ledger()).unwrap();
        let period = store
            .create_period(date(2018, 1, 1), date(2018, 12, 31))
            .unwrap();
        let account = store.create_account("1930", "Käyttötili").unwrap();
        let document = store
            .create_document(&NewDocument {
                period,
                number: 1,
                date: date(2018, 1, 1),
            })
            .unwrap();
        for (is_debit, amount, description, row_number) in [
            (true, 1000.0, "Alkusaldo", 1),
            (true, 250.0, "Talletus", 2),
            (false, 100.0, "Nosto", 3),
        ] {
            store
                .create_entry(&NewEntry {
                    document,
                    account,
                    is_debit,
                    amount,
                    description: description.to_string(),
                    row_number,
                })
                .unwrap();
        }
        assert_eq!(store.account_balance(account).unwrap(), 150.0);
    }
}
