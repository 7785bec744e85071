//! The central working records of the import pipeline: transaction
//! groups, the transaction object built from a group, and the signed
//! ledger entries synthesized from it.

use chrono::NaiveDate;

use crate::amount::round_cents;
use crate::record::SourceRecord;

/// Classified transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Deposit,
    Withdrawal,
    Buy,
    Sell,
    Dividend,
    Fx,
    Interest,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Dividend => "dividend",
            Self::Fx => "fx",
            Self::Interest => "interest",
        }
    }

    /// Kinds that trade a target symbol and so carry a position.
    pub fn is_trade(self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

/// An ordered set of source records believed to form one logical
/// financial event, with a stable import identifier.
#[derive(Debug, Clone)]
pub struct TransactionGroup {
    /// Stable idempotency id. Never empty, never contains `undefined`.
    pub id: String,
    pub records: Vec<SourceRecord>,
}

impl TransactionGroup {
    /// Line number of the first record, for error reporting.
    pub fn first_line(&self) -> usize {
        self.records.first().map_or(0, |r| r.line)
    }
}

/// One signed ledger entry: positive amounts debit the account,
/// negative amounts credit it. Conversion to `(magnitude, is_debit)`
/// happens only in the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct TxEntry {
    pub number: String,
    pub amount: f64,
    /// Overrides the transaction description for this row (used by
    /// loan entries).
    pub description: Option<String>,
}

impl TxEntry {
    pub fn new(number: impl Into<String>, amount: f64) -> Self {
        Self {
            number: number.into(),
            amount,
            description: None,
        }
    }
}

/// The resulting bookkeeping transaction.
#[derive(Debug, Clone)]
pub struct Tx {
    pub date: NaiveDate,
    pub description: String,
    pub entries: Vec<TxEntry>,
}

/// The transaction object built from one group.
///
/// Built in two phases: classification fields first, then quantity and
/// entries once the cost-basis state for the run is known. Mutated
/// once by the cost-basis tracker, consumed once by the entry
/// synthesizer, immutable afterwards.
#[derive(Debug, Clone)]
pub struct TransactionObject {
    pub group: TransactionGroup,
    pub kind: TxKind,
    /// Positive transaction magnitude in the base currency, cents.
    pub total: f64,
    pub currency: String,
    /// Conversion rate of `currency` to the base currency.
    pub rate: f64,
    /// Traded symbol or counter-currency, absent for plain transfers.
    pub target: Option<String>,
    /// Signed quantity change of the target, negative on disposals.
    pub amount: Option<f64>,
    pub fee: f64,
    pub tax: Option<f64>,
    /// Weighted-average cost of the target after this transaction.
    pub target_average: Option<f64>,
    /// Quantity of the target owned after this transaction.
    pub target_total: Option<f64>,
    pub tx: Tx,
}

impl TransactionObject {
    /// The target symbol, failing with a classification error when a
    /// trade unexpectedly has none.
    pub fn target_symbol(&self) -> Result<&str, crate::error::ImportError> {
        self.target
            .as_deref()
            .ok_or_else(|| crate::error::ImportError::Classification {
                group_id: self.group.id.clone(),
                reason: format!("{} transaction has no target", self.kind.as_str()),
            })
    }
}

/// Signed sum over an entry set, rounded to cents. Zero for a
/// balanced transaction.
pub fn balance_residual(entries: &[TxEntry]) -> f64 {
    round_cents(entries.iter().map(|entry| entry.amount).sum())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn residual_of_balanced_entries_is_zero() {
        let entries = vec![
            TxEntry::new("1543", 198.0),
            TxEntry::new("9690", 2.0),
            TxEntry::new("1960", -200.0),
        ];
        assert_eq!(balance_residual(&entries), 0.0);
    }

    #[test]
    fn residual_detects_sub_cent_drift() {
        let entries = vec![TxEntry::new("1543", 10.004), TxEntry::new("1960", -10.0)];
        assert_eq!(balance_residual(&entries), 0.0);
        let entries = vec![TxEntry::new("1543", 10.01), TxEntry::new("1960", -10.0)];
        assert_eq!(balance_residual(&entries), 0.01);
    }
}
