//! The import engine.
//!
//! Single-threaded and strictly chronological: the running cost-basis
//! state is one mutable sequence threaded through the groups, and the
//! duplicate check must stay race-free against the write following it,
//! so every group runs start to finish before the next one begins.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::amount::round_cents;
use crate::config::{ErrorPolicy, ImportConfig};
use crate::describe;
use crate::entries;
use crate::error::ImportError;
use crate::format::{file_line_id, BrokerFormat};
use crate::loans;
use crate::position::{self, EngineState, RunningPosition};
use crate::store::{LedgerStore, PositionSnapshot};
use crate::txo::{balance_residual, Tx, TxEntry, TxKind, TransactionGroup, TransactionObject};
use crate::writer::{LedgerWriter, WriteOutcome};

/// Residuals above this are real imbalances, not float noise.
const ROUNDING_TOLERANCE: f64 = 0.05;

/// Outcome of one import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub created: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: Vec<FailedGroup>,
}

/// A group that could not be imported, kept with its source rows for
/// manual reprocessing.
#[derive(Debug)]
pub struct FailedGroup {
    pub group: TransactionGroup,
    pub error: ImportError,
}

pub struct Engine<'a> {
    store: &'a dyn LedgerStore,
    format: &'a dyn BrokerFormat,
    config: &'a ImportConfig,
    state: EngineState,
}

impl<'a> Engine<'a> {
    pub fn new(
        store: &'a dyn LedgerStore,
        format: &'a dyn BrokerFormat,
        config: &'a ImportConfig,
    ) -> Self {
        Self {
            store,
            format,
            config,
            state: EngineState::default(),
        }
    }

    /// Import one export file into the ledger.
    pub fn import(&mut self, file: &Path) -> Result<ImportReport, ImportError> {
        let records = self.format.load(file)?;
        info!(file = %file.display(), records = records.len(), "loaded export");

        let mut groups: Vec<TransactionGroup> = Vec::new();
        for members in self.format.grouping(records)? {
            let id = self
                .format
                .group_id(&members)
                .unwrap_or_else(|| file_line_id(file, &members));
            groups.push(TransactionGroup {
                id,
                records: members,
            });
        }
        groups.sort_by_key(|group| {
            group
                .records
                .first()
                .map(|record| self.format.time(record))
                .unwrap_or(0)
        });

        let writer = LedgerWriter::new(self.store)?;
        self.seed_positions(&groups)?;
        self.seed_loan_balances(&writer)?;

        let mut report = ImportReport::default();
        for group in groups {
            // Marked groups drop out before classification: a re-run
            // of already-imported rows must not move the cost-basis
            // state they already moved once.
            if !self.config.force && self.store.has_import_mark(&self.config.service, &group.id)? {
                debug!(group_id = group.id.as_str(), "already imported, dropping");
                report.duplicates += 1;
                continue;
            }
            match self.process_group(&group, &writer) {
                Ok(Some(WriteOutcome::Created(_))) => report.created += 1,
                Ok(Some(WriteOutcome::Duplicate)) => report.duplicates += 1,
                Ok(None) => {}
                Err(err) if err.is_fatal() => {
                    error!(group_id = group.id.as_str(), %err, "fatal error, aborting run");
                    return Err(err);
                }
                Err(err) => match self.config.error_policy {
                    ErrorPolicy::Fail => {
                        error!(group_id = group.id.as_str(), %err, "aborting run");
                        return Err(err);
                    }
                    ErrorPolicy::Skip => {
                        warn!(group_id = group.id.as_str(), %err, "skipping group");
                        report.skipped += 1;
                        report.failed.push(FailedGroup { group, error: err });
                    }
                    ErrorPolicy::ImportErrors => {
                        warn!(group_id = group.id.as_str(), %err, "booking import error placeholder");
                        match self.write_placeholder(&group, &writer) {
                            Ok(()) => report.failed.push(FailedGroup { group, error: err }),
                            Err(placeholder_err) => return Err(placeholder_err),
                        }
                    }
                },
            }
        }
        info!(
            created = report.created,
            duplicates = report.duplicates,
            skipped = report.skipped,
            failed = report.failed.len(),
            "import finished"
        );
        Ok(report)
    }

    /// Seed positions for the symbols this file trades: explicit
    /// overrides first, then stored snapshots, and last the historical
    /// description scan for symbols snapshots do not cover yet.
    fn seed_positions(&mut self, groups: &[TransactionGroup]) -> Result<(), ImportError> {
        position::seed_from_overrides(&mut self.state, self.config);
        if self.config.no_profit {
            return Ok(());
        }
        let mut targets: BTreeSet<String> = BTreeSet::new();
        for group in groups {
            let Ok(kind) = self.format.recognize(group) else {
                continue;
            };
            if matches!(kind, TxKind::Buy | TxKind::Sell | TxKind::Dividend) {
                if let Ok(target) = self.format.target(group, kind) {
                    targets.insert(target);
                }
            }
        }
        position::seed_from_snapshots(&mut self.state, self.store, self.config, &targets)?;
        position::seed_from_history(&mut self.state, self.store, self.config, &targets)
    }

    /// Initialize loan balances from the accumulated ledger entries of
    /// every tracked account.
    fn seed_loan_balances(&mut self, writer: &LedgerWriter<'_>) -> Result<(), ImportError> {
        for number in self.config.loan_tracked_numbers() {
            let account = writer.account_id(&number)?;
            let balance = self.store.account_balance(account)?;
            info!(account = number.as_str(), balance, "using ledger balance");
            self.state.init_loan_balance(&number, balance);
        }
        Ok(())
    }

    fn process_group(
        &mut self,
        group: &TransactionGroup,
        writer: &LedgerWriter<'_>,
    ) -> Result<Option<WriteOutcome>, ImportError> {
        let txo = self.build_transaction(group)?;
        self.dump_transaction(&txo);
        if self.config.dry_run {
            return Ok(None);
        }
        let outcome = writer.write(&txo.tx, &self.config.service, &group.id, self.config.force)?;
        // Duplicates still ran through the tracker to produce the
        // entries the signature check compares, so their state drift
        // must not reach the snapshot table.
        if matches!(outcome, WriteOutcome::Created(_)) {
            self.save_snapshot(&txo)?;
        }
        Ok(Some(outcome))
    }

    /// Persist the post-transaction position of the symbol this group
    /// moved, so the next run seeds from the snapshot table instead of
    /// parsing descriptions.
    fn save_snapshot(&self, txo: &TransactionObject) -> Result<(), ImportError> {
        let symbol = match txo.kind {
            TxKind::Buy | TxKind::Sell => txo.target_symbol()?,
            TxKind::Fx => txo.currency.as_str(),
            _ => return Ok(()),
        };
        let position = self.state.position(symbol);
        self.store.save_position_snapshot(
            &self.config.service,
            &PositionSnapshot {
                symbol: symbol.to_string(),
                quantity: position.quantity,
                average: position.average,
            },
        )?;
        Ok(())
    }

    /// Run one group through the whole pipeline, producing the final
    /// balanced transaction.
    fn build_transaction(&mut self, group: &TransactionGroup) -> Result<TransactionObject, ImportError> {
        let first = group
            .records
            .first()
            .ok_or_else(|| ImportError::Classification {
                group_id: group.id.clone(),
                reason: "empty group".to_string(),
            })?;
        let date = self.format.date(first)?;
        let kind = self.format.recognize(group)?;
        let currency = self.format.currency(group, kind)?;
        let rate = self.format.rate(group, kind)?;
        let total = self.format.total(group, kind)?;
        let fee = self.format.fee(group, kind)?;
        let tax = self.format.tax(group, kind, rate)?;
        let target = if matches!(kind, TxKind::Deposit | TxKind::Withdrawal) {
            None
        } else {
            Some(self.format.target(group, kind)?)
        };
        let amount = if matches!(kind, TxKind::Deposit | TxKind::Withdrawal | TxKind::Fx) {
            None
        } else {
            Some(self.format.amount(group, kind)?)
        };

        let mut txo = TransactionObject {
            group: group.clone(),
            kind,
            total,
            currency,
            rate,
            target,
            amount,
            fee,
            tax,
            target_average: None,
            target_total: None,
            tx: Tx {
                date,
                description: String::new(),
                entries: Vec::new(),
            },
        };

        let holding_role = match (kind.is_trade(), &txo.target) {
            (true, Some(target)) => Some(self.format.holding_role(target)),
            _ => None,
        };
        let average_before = match &txo.target {
            Some(target) => self.state.position(target).average,
            None => 0.0,
        };

        let entries = entries::synthesize(&txo, average_before, self.config, holding_role.as_deref())?;
        let entries = loans::check_loans(entries, &mut self.state, self.config);
        self.track(&mut txo)?;

        txo.tx.description = describe::describe(&txo, self.config)?;
        txo.tx.entries = self.fix_rounding(entries, &group.id)?;
        Ok(txo)
    }

    /// Apply the transaction to the running positions and record the
    /// post-transaction totals on it.
    fn track(&mut self, txo: &mut TransactionObject) -> Result<(), ImportError> {
        match txo.kind {
            TxKind::Buy => {
                let target = txo.target_symbol()?.to_string();
                let amount = txo.amount.unwrap_or(0.0);
                if self.config.zero_moves && txo.total == 0.0 {
                    debug!(target = target.as_str(), amount, "zero move, position untouched");
                } else {
                    self.state
                        .apply_buy(&target, round_cents(txo.total - txo.fee), amount);
                }
                let position = self.state.position(&target);
                txo.target_average = Some(position.average);
                txo.target_total = Some(position.quantity);
            }
            TxKind::Sell => {
                let target = txo.target_symbol()?.to_string();
                self.state.apply_sell(&target, txo.amount.unwrap_or(0.0));
                let position = self.state.position(&target);
                txo.target_average = Some(position.average);
                txo.target_total = Some(position.quantity);
            }
            TxKind::Fx => {
                if txo.target_symbol()? != "EUR" {
                    return Err(ImportError::Unsupported(
                        "selling currency via exchange".to_string(),
                    ));
                }
                let acquired = txo.currency.clone();
                self.state.apply_buy(
                    &acquired,
                    round_cents(txo.total - txo.fee),
                    txo.total / txo.rate,
                );
                let position = self.state.position(&acquired);
                txo.target_average = Some(position.average);
                txo.target_total = Some(position.quantity);
            }
            TxKind::Deposit | TxKind::Withdrawal | TxKind::Dividend | TxKind::Interest => {}
        }
        Ok(())
    }

    /// Append a correcting entry for a sub-tolerance residual; larger
    /// residuals are real imbalances and fail the group.
    fn fix_rounding(
        &self,
        mut entries: Vec<TxEntry>,
        group_id: &str,
    ) -> Result<Vec<TxEntry>, ImportError> {
        let residual = balance_residual(&entries);
        if residual == 0.0 {
            return Ok(entries);
        }
        if residual.abs() > ROUNDING_TOLERANCE {
            return Err(ImportError::Imbalance { residual });
        }
        debug!(group_id, residual, "appending rounding correction");
        entries.push(TxEntry::new(self.config.account("rounding")?, -residual));
        Ok(entries)
    }

    /// Book a visible zero-amount placeholder so a failed group shows
    /// up in the ledger and is not retried on the next run.
    fn write_placeholder(
        &self,
        group: &TransactionGroup,
        writer: &LedgerWriter<'_>,
    ) -> Result<(), ImportError> {
        if self.config.dry_run {
            return Ok(());
        }
        let first = group.records.first();
        let Some(date) = first.and_then(|record| self.format.date(record).ok()) else {
            // Without a date there is nothing bookable; leave the
            // group unmarked for a retry.
            return Ok(());
        };
        let tx = Tx {
            date,
            description: format!("{}Tuonti epäonnistui: {}", self.config.tags_prefix(), group.id),
            entries: vec![TxEntry::new(self.config.account("imbalance")?, 0.0)],
        };
        writer.write(&tx, &self.config.service, &group.id, self.config.force)?;
        Ok(())
    }

    fn dump_transaction(&self, txo: &TransactionObject) {
        debug!(
            date = %txo.tx.date,
            kind = txo.kind.as_str(),
            total = txo.total,
            currency = txo.currency.as_str(),
            rate = txo.rate,
            target = txo.target.as_deref().unwrap_or("-"),
            amount = txo.amount.unwrap_or(0.0),
            owned = txo.target_total.unwrap_or(0.0),
            average = txo.target_average.unwrap_or(0.0),
            fee = txo.fee,
            description = txo.tx.description.as_str(),
            "transaction"
        );
        for entry in &txo.tx.entries {
            debug!(
                account = entry.number.as_str(),
                amount = entry.amount,
                description = entry.description.as_deref().unwrap_or(""),
                "entry"
            );
        }
    }
}

/// Recover the positions a service holds, snapshots first, then
/// historical descriptions (newest first, one hit per symbol) for
/// anything booked before the snapshot table existed.
pub fn recover_positions(
    store: &dyn LedgerStore,
    service: &str,
) -> Result<Vec<(String, RunningPosition)>, ImportError> {
    let service = service.to_uppercase();
    let mut state = EngineState::default();
    for snapshot in store.position_snapshots(&service)? {
        state.seed_position(&snapshot.symbol, snapshot.quantity, snapshot.average);
    }
    let pattern = format!("%[{}]%k.h.%", service);
    for row in store.historical_descriptions(&pattern)? {
        let Ok(decoded) = describe::decode(&row.description) else {
            continue;
        };
        let (Some(quantity), Some(average)) = (decoded.target_total, decoded.target_average) else {
            continue;
        };
        state.seed_position(&decoded.target, quantity, average);
    }
    Ok(state
        .symbols()
        .map(|(symbol, position)| (symbol.to_string(), position))
        .collect())
}
