//! Immutable configuration for one import run.
//!
//! Account numbers are configured per *role* (`bank`, `eur`, `fees`,
//! `rounding`, …) rather than per ledger account id; trade targets
//! resolve to the role named by their lowercased symbol, with `eth`
//! and `btc` falling back to a generic `crypto` role.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ImportError;

/// What to do when a group cannot be classified or a required field
/// cannot be extracted. All other error classes ignore this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Abort the remaining groups (already committed ones are kept).
    #[default]
    Fail,
    /// Log the failure, keep the group for the report, continue.
    Skip,
    /// Book a visible placeholder into the `imbalance` account and
    /// mark the group imported so it is not retried.
    ImportErrors,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Short service tag used in `[TAG]` description prefixes and in
    /// import marks, e.g. `KRAKEN`.
    pub service: String,
    /// Human-readable service name used inside description texts,
    /// e.g. `Kraken`.
    pub service_name: String,
    /// Optional fund tag added after the service tag.
    pub fund: Option<String>,
    /// Account role → account number.
    pub accounts: BTreeMap<String, String>,
    /// Account role → loan counterpart account number. Presence turns
    /// the loan balancer on for that role's account.
    pub loans: BTreeMap<String, String>,
    pub error_policy: ErrorPolicy,
    /// Disable the realized profit/loss branch on sells.
    pub no_profit: bool,
    /// Do not grow positions for assets moved in without payment.
    pub zero_moves: bool,
    /// Bypass the import-mark dedup filter.
    pub force: bool,
    /// Run the full pipeline without writing to the store.
    pub dry_run: bool,
    /// Explicit average-cost seeds per symbol, overriding history.
    pub seed_averages: BTreeMap<String, f64>,
    /// Explicit owned-quantity seeds per symbol, overriding history.
    pub seed_quantities: BTreeMap<String, f64>,
}

impl ImportConfig {
    /// Load the base configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ImportError> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|err| ImportError::Config(format!("{}: {err}", path.display())))
    }

    /// The `[SERVICE][FUND] ` description prefix, empty when no tags
    /// are configured.
    pub fn tags_prefix(&self) -> String {
        let mut prefix = String::new();
        if !self.service.is_empty() {
            prefix.push_str(&format!("[{}]", self.service));
        }
        if let Some(fund) = self.fund.as_deref() {
            prefix.push_str(&format!("[{fund}]"));
        }
        if prefix.is_empty() {
            prefix
        } else {
            prefix + " "
        }
    }

    /// Resolve an account role to its configured number. `eth` and
    /// `btc` fall back to the `crypto` role.
    pub fn account(&self, role: &str) -> Result<&str, ImportError> {
        let role = role.to_lowercase();
        if let Some(number) = self.accounts.get(&role) {
            return Ok(number.as_str());
        }
        if matches!(role.as_str(), "eth" | "btc") {
            if let Some(number) = self.accounts.get("crypto") {
                return Ok(number.as_str());
            }
        }
        Err(ImportError::UnconfiguredAccount { role })
    }

    /// The configured role for an account number, if any.
    pub fn role_for_number(&self, number: &str) -> Option<&str> {
        self.accounts
            .iter()
            .find(|(_, n)| n.as_str() == number)
            .map(|(role, _)| role.as_str())
    }

    /// The loan counterpart account for a tracked account number.
    pub fn loan_counterpart(&self, number: &str) -> Option<&str> {
        let role = self.role_for_number(number)?;
        self.loans.get(role).map(String::as_str)
    }

    /// Every account number whose balance the loan balancer tracks:
    /// each loan-configured role's account plus the loan account.
    pub fn loan_tracked_numbers(&self) -> Vec<String> {
        let mut numbers = Vec::new();
        for (role, loan_number) in &self.loans {
            if let Some(number) = self.accounts.get(role) {
                numbers.push(number.clone());
            }
            numbers.push(loan_number.clone());
        }
        numbers
    }
}

/// Parse one `SERVICE:SYMBOL=value` seed override. Returns the symbol
/// and value when the service matches, `None` when the override is
/// addressed to a different service.
pub fn parse_seed_override(
    spec: &str,
    service: &str,
) -> Result<Option<(String, f64)>, ImportError> {
    let bad = || ImportError::Config(format!("invalid seed override `{spec}`, expected SERVICE:SYMBOL=value"));
    let (head, value) = spec.split_once('=').ok_or_else(bad)?;
    let (seed_service, symbol) = head.split_once(':').ok_or_else(bad)?;
    if seed_service.is_empty() || symbol.is_empty() {
        return Err(bad());
    }
    let value: f64 = value.parse().map_err(|_| bad())?;
    if seed_service.eq_ignore_ascii_case(service) {
        Ok(Some((symbol.to_uppercase(), value)))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config_with(accounts: &[(&str, &str)], loans: &[(&str, &str)]) -> ImportConfig {
        ImportConfig {
            service: "KRAKEN".to_string(),
            service_name: "Kraken".to_string(),
            accounts: accounts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            loans: loans
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..ImportConfig::default()
        }
    }

    #[test]
    fn crypto_fallback() {
        let config = config_with(&[("crypto", "1549"), ("eth", "1548")], &[]);
        assert_eq!(config.account("ETH").unwrap(), "1548");
        assert_eq!(config.account("btc").unwrap(), "1549");
        assert!(matches!(
            config.account("doge"),
            Err(ImportError::UnconfiguredAccount { .. })
        ));
    }

    #[test]
    fn tags_prefix_forms() {
        let mut config = config_with(&[], &[]);
        assert_eq!(config.tags_prefix(), "[KRAKEN] ");
        config.fund = Some("KRY".to_string());
        assert_eq!(config.tags_prefix(), "[KRAKEN][KRY] ");
        config.service = String::new();
        config.fund = None;
        assert_eq!(config.tags_prefix(), "");
    }

    #[test]
    fn loan_counterpart_lookup() {
        let config = config_with(&[("eur", "1960")], &[("eur", "2870")]);
        assert_eq!(config.loan_counterpart("1960"), Some("2870"));
        assert_eq!(config.loan_counterpart("1910"), None);
        assert_eq!(config.loan_tracked_numbers(), vec!["1960", "2870"]);
    }

    #[test]
    fn seed_override_parsing() {
        assert_eq!(
            parse_seed_override("KRAKEN:ETH=99.5", "KRAKEN").unwrap(),
            Some(("ETH".to_string(), 99.5))
        );
        assert_eq!(parse_seed_override("GDAX:ETH=1", "KRAKEN").unwrap(), None);
        assert!(parse_seed_override("missing-delimiter", "KRAKEN").is_err());
    }
}
