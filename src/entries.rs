//! Entry synthesis.
//!
//! Turns one classified transaction into a balanced set of signed
//! entries (debit positive). Each arm is a pure function of the
//! transaction and the account configuration; nothing here mutates
//! the running cost-basis state.

use crate::amount::round_cents;
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::txo::{TransactionObject, TxEntry, TxKind};

/// Build the entries for one transaction.
///
/// `average_before` is the weighted-average cost of the target before
/// this transaction applies; only the sell arm reads it. `holding_role`
/// names the account role holding the traded target (`eth`, `shares`,
/// …) and is required for the trade arms.
pub fn synthesize(
    txo: &TransactionObject,
    average_before: f64,
    config: &ImportConfig,
    holding_role: Option<&str>,
) -> Result<Vec<TxEntry>, ImportError> {
    let currency_account = config.account(&txo.currency)?.to_string();
    let holding_account = || -> Result<String, ImportError> {
        let role = holding_role.ok_or_else(|| ImportError::Classification {
            group_id: txo.group.id.clone(),
            reason: format!("{} transaction has no holding account", txo.kind.as_str()),
        })?;
        Ok(config.account(role)?.to_string())
    };

    let entries = match txo.kind {
        TxKind::Deposit => {
            if txo.fee > 0.0 {
                vec![
                    TxEntry::new(&currency_account, round_cents(txo.total - txo.fee)),
                    TxEntry::new(config.account("fees")?, txo.fee),
                    TxEntry::new(config.account("bank")?, -txo.total),
                ]
            } else {
                vec![
                    TxEntry::new(&currency_account, txo.total),
                    TxEntry::new(config.account("bank")?, -txo.total),
                ]
            }
        }
        TxKind::Withdrawal => {
            if txo.fee > 0.0 {
                vec![
                    TxEntry::new(config.account("bank")?, round_cents(txo.total - txo.fee)),
                    TxEntry::new(config.account("fees")?, txo.fee),
                    TxEntry::new(&currency_account, -txo.total),
                ]
            } else {
                vec![
                    TxEntry::new(config.account("bank")?, txo.total),
                    TxEntry::new(&currency_account, -txo.total),
                ]
            }
        }
        TxKind::Buy => vec![
            TxEntry::new(holding_account()?, round_cents(txo.total - txo.fee)),
            TxEntry::new(config.account("fees")?, txo.fee),
            TxEntry::new(&currency_account, -txo.total),
        ],
        TxKind::Sell => {
            let mut entries = vec![
                TxEntry::new(&currency_account, round_cents(txo.total - txo.fee)),
                TxEntry::new(config.account("fees")?, txo.fee),
            ];
            let amount = txo.amount.unwrap_or(0.0);
            let buy_price = if average_before > 0.0 {
                round_cents(-amount * average_before)
            } else {
                txo.total
            };
            if config.no_profit {
                entries.push(TxEntry::new(holding_account()?, -txo.total));
            } else {
                let diff = round_cents(buy_price - txo.total);
                if diff > 0.0 {
                    // Sold below the average price.
                    entries.push(TxEntry::new(config.account("losses")?, diff));
                    entries.push(TxEntry::new(holding_account()?, -buy_price));
                } else if diff < 0.0 {
                    entries.push(TxEntry::new(config.account("profits")?, diff));
                    entries.push(TxEntry::new(holding_account()?, -buy_price));
                } else {
                    entries.push(TxEntry::new(holding_account()?, -txo.total));
                }
            }
            entries
        }
        TxKind::Dividend => {
            let mut entries = vec![TxEntry::new(
                config.account("dividends")?,
                round_cents(-txo.total),
            )];
            match txo.tax {
                Some(tax) if tax > 0.0 => {
                    let tax = round_cents(tax);
                    let tax_role = if txo.currency == "EUR" { "tax" } else { "srctax" };
                    entries.push(TxEntry::new(&currency_account, round_cents(txo.total - tax)));
                    entries.push(TxEntry::new(config.account(tax_role)?, tax));
                }
                _ => entries.push(TxEntry::new(&currency_account, txo.total)),
            }
            entries
        }
        TxKind::Fx => {
            let target = txo.target_symbol()?;
            vec![
                TxEntry::new(&currency_account, txo.total),
                TxEntry::new(config.account(target)?, round_cents(-txo.total)),
            ]
        }
        TxKind::Interest => vec![
            TxEntry::new(&currency_account, round_cents(-txo.total)),
            TxEntry::new(config.account("interest")?, txo.total),
        ],
    };

    Ok(entries)
}
