//! Idempotent transaction writer.
//!
//! Writes one balanced transaction at a time, strictly sequentially.
//! A transaction lands at most once: the import mark filters re-runs
//! of the same source group, and an equivalence check against the
//! day's existing documents catches the same money arriving without a
//! mark (hand-entered or imported before marks existed).

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::amount::cents;
use crate::error::ImportError;
use crate::store::{AccountId, DocumentId, LedgerStore, NewDocument, NewEntry, StoredEntry};
use crate::txo::Tx;

/// What writing one transaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created(DocumentId),
    /// An equivalent document already exists, or the group carries an
    /// import mark; nothing was written.
    Duplicate,
}

pub struct LedgerWriter<'a> {
    store: &'a dyn LedgerStore,
    account_by_number: HashMap<String, AccountId>,
}

impl<'a> LedgerWriter<'a> {
    /// Load the chart of accounts and build the number index.
    pub fn new(store: &'a dyn LedgerStore) -> Result<Self, ImportError> {
        let account_by_number = store
            .accounts()?
            .into_iter()
            .map(|account| (account.number, account.id))
            .collect();
        Ok(Self {
            store,
            account_by_number,
        })
    }

    pub fn account_id(&self, number: &str) -> Result<AccountId, ImportError> {
        self.account_by_number
            .get(number)
            .copied()
            .ok_or_else(|| ImportError::UnknownAccount {
                number: number.to_string(),
            })
    }

    /// Write one transaction unless it is already in the ledger.
    pub fn write(
        &self,
        tx: &Tx,
        service_tag: &str,
        group_id: &str,
        force: bool,
    ) -> Result<WriteOutcome, ImportError> {
        let marked = self.store.has_import_mark(service_tag, group_id)?;
        if marked && !force {
            debug!(group_id, "already imported, skipping");
            return Ok(WriteOutcome::Duplicate);
        }

        // Resolve every account up front so nothing half-written
        // remains when one is missing.
        let mut resolved: Vec<(AccountId, f64, Option<&str>)> = Vec::with_capacity(tx.entries.len());
        for entry in &tx.entries {
            resolved.push((
                self.account_id(&entry.number)?,
                entry.amount,
                entry.description.as_deref(),
            ));
        }

        let period = self
            .store
            .find_period(tx.date)?
            .ok_or(ImportError::NoPeriod { date: tx.date })?;

        let candidate = signature(resolved.iter().map(|(account, amount, _)| (*account, cents(*amount))));
        for existing in same_day_signatures(self.store.entries_by_document_date(period, tx.date)?) {
            if existing == candidate {
                info!(group_id, date = %tx.date, "equivalent document exists, skipping");
                return Ok(WriteOutcome::Duplicate);
            }
        }

        let number = self.store.max_document_number(period)? + 1;
        let document = self.store.create_document(&NewDocument {
            period,
            number,
            date: tx.date,
        })?;
        for (row, (account, amount, description)) in resolved.iter().enumerate() {
            self.store.create_entry(&NewEntry {
                document,
                account: *account,
                is_debit: *amount >= 0.0,
                amount: amount.abs(),
                description: description.unwrap_or(&tx.description).to_string(),
                row_number: (row + 1) as i64,
            })?;
        }
        if !marked {
            self.store.add_import_mark(service_tag, group_id, document)?;
        }
        info!(group_id, number, date = %tx.date, "document created");
        Ok(WriteOutcome::Created(document))
    }
}

/// Order-insensitive signature of an entry set: the sorted multiset of
/// `(account, signed cents)` pairs, debits positive.
fn signature(entries: impl Iterator<Item = (AccountId, i64)>) -> Vec<(AccountId, i64)> {
    let mut pairs: Vec<(AccountId, i64)> = entries.collect();
    pairs.sort_unstable();
    pairs
}

fn same_day_signatures(entries: Vec<StoredEntry>) -> Vec<Vec<(AccountId, i64)>> {
    let mut by_document: BTreeMap<i64, Vec<(AccountId, i64)>> = BTreeMap::new();
    for entry in entries {
        let signed = if entry.is_debit {
            cents(entry.amount)
        } else {
            -cents(entry.amount)
        };
        by_document
            .entry(entry.document.0)
            .or_default()
            .push((entry.account, signed));
    }
    by_document.into_values().map(|pairs| signature(pairs.into_iter())).collect()
}
