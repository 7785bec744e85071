//! Engine-local running state: per-symbol positions (quantity owned
//! and weighted-average cost) and per-account loan balances.
//!
//! The state is threaded explicitly through the pipeline stages; no
//! stage other than the tracker functions here may mutate it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::amount::{round_cents, round_qty};
use crate::config::ImportConfig;
use crate::describe;
use crate::error::ImportError;
use crate::store::LedgerStore;

/// Running position of one traded symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningPosition {
    pub quantity: f64,
    pub average: f64,
}

/// All mutable state of one import run.
#[derive(Debug, Default)]
pub struct EngineState {
    positions: BTreeMap<String, RunningPosition>,
    loan_balances: BTreeMap<String, f64>,
}

impl EngineState {
    /// Current position for a symbol; zero when never seen.
    pub fn position(&self, symbol: &str) -> RunningPosition {
        self.positions.get(symbol).copied().unwrap_or_default()
    }

    /// Whether a symbol has seeded or accumulated state already.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Install a seeded position. Existing state wins: seeding never
    /// overwrites values accumulated or explicitly configured earlier.
    pub fn seed_position(&mut self, symbol: &str, quantity: f64, average: f64) {
        self.positions
            .entry(symbol.to_string())
            .or_insert(RunningPosition { quantity, average });
    }

    /// Apply a purchase: the weighted average absorbs the new cost,
    /// the quantity grows by the signed amount.
    pub fn apply_buy(&mut self, symbol: &str, cost: f64, amount: f64) {
        let position = self.positions.entry(symbol.to_string()).or_default();
        let new_quantity = position.quantity + amount;
        if new_quantity.abs() > f64::EPSILON {
            position.average =
                (position.quantity * position.average + cost) / new_quantity;
        }
        position.quantity = round_qty(new_quantity);
    }

    /// Apply a disposal: quantity shrinks (`amount` is negative), the
    /// average cost of the remaining lot is untouched.
    pub fn apply_sell(&mut self, symbol: &str, amount: f64) {
        let position = self.positions.entry(symbol.to_string()).or_default();
        position.quantity = round_qty(position.quantity + amount);
    }

    /// Current running balance of a loan-tracked account.
    pub fn loan_balance(&self, number: &str) -> f64 {
        self.loan_balances.get(number).copied().unwrap_or(0.0)
    }

    /// Whether balance tracking was initialized for an account.
    pub fn tracks_loan_balance(&self, number: &str) -> bool {
        self.loan_balances.contains_key(number)
    }

    /// Install the starting balance for a loan-tracked account.
    pub fn init_loan_balance(&mut self, number: &str, balance: f64) {
        self.loan_balances.insert(number.to_string(), balance);
    }

    /// Update a tracked balance; untracked accounts are ignored.
    /// Re-rounded to cents so the balance never accumulates drift.
    pub fn add_loan_balance(&mut self, number: &str, delta: f64) {
        if let Some(balance) = self.loan_balances.get_mut(number) {
            *balance = round_cents(*balance + delta);
            debug!(
                account = number,
                delta, balance = *balance, "updated loan balance"
            );
        }
    }

    /// Symbols with known positions, for reporting.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, RunningPosition)> {
        self.positions
            .iter()
            .map(|(symbol, position)| (symbol.as_str(), *position))
    }
}

/// Apply explicit `SERVICE:SYMBOL=value` seed overrides from the
/// configuration. Overrides beat history, so this runs first.
pub fn seed_from_overrides(state: &mut EngineState, config: &ImportConfig) {
    let symbols: BTreeSet<&String> = config
        .seed_averages
        .keys()
        .chain(config.seed_quantities.keys())
        .collect();
    for symbol in symbols {
        let average = config.seed_averages.get(symbol).copied().unwrap_or(0.0);
        let quantity = config.seed_quantities.get(symbol).copied().unwrap_or(0.0);
        info!(symbol = symbol.as_str(), quantity, average, "seeding position from override");
        state.seed_position(symbol, quantity, average);
    }
}

/// Seed positions from the snapshot table kept alongside the ledger.
/// Snapshots are the primary persisted source; symbols missing from
/// the table fall back to the description scan below.
pub fn seed_from_snapshots(
    state: &mut EngineState,
    store: &dyn LedgerStore,
    config: &ImportConfig,
    targets: &BTreeSet<String>,
) -> Result<(), ImportError> {
    if config.service.is_empty() {
        return Ok(());
    }
    for snapshot in store.position_snapshots(&config.service)? {
        if !targets.contains(&snapshot.symbol) || state.has_position(&snapshot.symbol) {
            continue;
        }
        info!(
            symbol = snapshot.symbol.as_str(),
            quantity = snapshot.quantity,
            average = snapshot.average,
            "seeding position from snapshot"
        );
        state.seed_position(&snapshot.symbol, snapshot.quantity, snapshot.average);
    }
    Ok(())
}

/// Recover positions for the given symbols from historical ledger
/// descriptions, newest first.
///
/// Descriptions that fail to decode are skipped: seeding is a
/// best-effort optimization over free text, never fatal. The scan
/// stops once every needed symbol is resolved or history runs out.
pub fn seed_from_history(
    state: &mut EngineState,
    store: &dyn LedgerStore,
    config: &ImportConfig,
    targets: &BTreeSet<String>,
) -> Result<(), ImportError> {
    let mut needed: BTreeSet<&str> = targets
        .iter()
        .map(String::as_str)
        .filter(|symbol| !state.has_position(symbol))
        .collect();
    if needed.is_empty() || config.service.is_empty() {
        return Ok(());
    }

    let pattern = format!("%[{}]%k.h.%", config.service);
    for row in store.historical_descriptions(&pattern)? {
        let decoded = match describe::decode(&row.description) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!(description = row.description.as_str(), %err, "skipping undecodable history row");
                continue;
            }
        };
        if !needed.contains(decoded.target.as_str()) {
            continue;
        }
        let (Some(quantity), Some(average)) = (decoded.target_total, decoded.target_average)
        else {
            continue;
        };
        info!(
            symbol = decoded.target.as_str(),
            quantity, average, "seeding position from history"
        );
        needed.remove(decoded.target.as_str());
        state.seed_position(&decoded.target, quantity, average);
        if needed.is_empty() {
            break;
        }
    }
    Ok(())
}
