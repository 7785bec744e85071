//! Automatic loan handling.
//!
//! Accounts configured with a loan counterpart keep a running balance
//! during the run. A balance dropping below zero raises a loan for the
//! full deficit; money coming back in repays the outstanding loan, at
//! most the incoming amount. The appended pairs carry fixed Finnish
//! descriptions of their own and are not re-fed through the scan.

use tracing::debug;

use crate::amount::round_cents;
use crate::config::ImportConfig;
use crate::position::EngineState;
use crate::txo::TxEntry;

/// Scan an entry set, update the tracked balances and append the loan
/// pairs the balances call for.
pub fn check_loans(
    mut entries: Vec<TxEntry>,
    state: &mut EngineState,
    config: &ImportConfig,
) -> Vec<TxEntry> {
    let mut appended: Vec<TxEntry> = Vec::new();

    for entry in &entries {
        state.add_loan_balance(&entry.number, entry.amount);
        let Some(loan_account) = config.loan_counterpart(&entry.number) else {
            continue;
        };
        let balance = state.loan_balance(&entry.number);
        if balance < 0.0 {
            let deficit = round_cents(-balance);
            let description = format!(
                "{}{}-palvelun laina",
                config.tags_prefix(),
                config.service_name
            );
            debug!(account = %entry.number, deficit, "raising loan");
            appended.push(loan_entry(&entry.number, deficit, &description));
            appended.push(loan_entry(loan_account, balance, &description));
        } else if balance > 0.0 {
            let outstanding = -state.loan_balance(loan_account);
            let payment = round_cents(outstanding.min(entry.amount));
            if payment > 0.0 {
                let description = format!(
                    "{}{}-palvelun lainan lyhennys",
                    config.tags_prefix(),
                    config.service_name
                );
                debug!(account = %entry.number, payment, "repaying loan");
                appended.push(loan_entry(&entry.number, -payment, &description));
                appended.push(loan_entry(loan_account, payment, &description));
            }
        }
    }

    // Balance effects of the appended pairs apply once, after the scan.
    for entry in &appended {
        state.add_loan_balance(&entry.number, entry.amount);
    }

    entries.append(&mut appended);
    entries
}

fn loan_entry(number: &str, amount: f64, description: &str) -> TxEntry {
    TxEntry {
        number: number.to_string(),
        amount,
        description: Some(description.to_string()),
    }
}
