//! GDAX (Coinbase Pro) account statement.
//!
//! Fills share a `trade id`: a trade is a `match` row per asset plus
//! an optional `fee` row. Deposits and withdrawals are single rows
//! keyed by `transfer id`; when the moved asset is not euros the row
//! is a crypto transfer in or out, booked as a zero-cost trade.

use chrono::{DateTime, NaiveDate};

use crate::amount::round_cents;
use crate::error::ImportError;
use crate::format::{classification_error, group_by_key, BrokerFormat};
use crate::record::SourceRecord;
use crate::txo::{TransactionGroup, TxKind};

pub struct Gdax;

fn field<'a>(record: &'a SourceRecord, name: &str) -> &'a str {
    record.get(name).unwrap_or("")
}

fn parse_amount(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

fn is_transfer(record: &SourceRecord) -> bool {
    matches!(field(record, "type"), "deposit" | "withdrawal")
}

fn group_key(record: &SourceRecord) -> Option<String> {
    let key = if is_transfer(record) {
        record.get_non_empty("transfer_id")
    } else {
        record.get_non_empty("trade_id")
    };
    key.map(str::to_string)
}

fn match_rows<'a>(group: &'a TransactionGroup) -> impl Iterator<Item = &'a SourceRecord> {
    group
        .records
        .iter()
        .filter(|record| field(record, "type") == "match")
}

fn euro_match<'a>(group: &'a TransactionGroup) -> Option<&'a SourceRecord> {
    match_rows(group).find(|record| field(record, "amount_balance_unit") == "EUR")
}

fn asset_match<'a>(group: &'a TransactionGroup) -> Option<&'a SourceRecord> {
    match_rows(group).find(|record| field(record, "amount_balance_unit") != "EUR")
}

/// A single-row group moving a crypto asset without payment.
fn moved_asset<'a>(group: &'a TransactionGroup) -> Option<&'a SourceRecord> {
    match group.records.as_slice() {
        [record] if is_transfer(record) && field(record, "amount_balance_unit") != "EUR" => {
            Some(record)
        }
        _ => None,
    }
}

impl BrokerFormat for Gdax {
    fn name(&self) -> &'static str {
        "gdax"
    }

    fn service_name(&self) -> &'static str {
        "GDAX"
    }

    fn grouping(&self, records: Vec<SourceRecord>) -> Result<Vec<Vec<SourceRecord>>, ImportError> {
        for record in &records {
            if group_key(record).is_none() {
                return Err(ImportError::Grouping {
                    line: record.line,
                    reason: "row has neither trade id nor transfer id".to_string(),
                });
            }
        }
        Ok(group_by_key(records, group_key))
    }

    fn group_id(&self, group: &[SourceRecord]) -> Option<String> {
        group.first().and_then(group_key)
    }

    fn date(&self, record: &SourceRecord) -> Result<NaiveDate, ImportError> {
        let time = field(record, "time");
        let date = time.get(..10).unwrap_or(time);
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|err| ImportError::Grouping {
            line: record.line,
            reason: format!("bad time field {time:?}: {err}"),
        })
    }

    fn time(&self, record: &SourceRecord) -> i64 {
        DateTime::parse_from_rfc3339(field(record, "time"))
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    }

    fn recognize(&self, group: &TransactionGroup) -> Result<TxKind, ImportError> {
        if let [record] = group.records.as_slice() {
            if is_transfer(record) {
                if field(record, "amount_balance_unit") == "EUR" {
                    return Ok(if field(record, "type") == "deposit" {
                        TxKind::Deposit
                    } else {
                        TxKind::Withdrawal
                    });
                }
                // Crypto arriving or leaving without money moving.
                let amount = parse_amount(field(record, "amount"));
                return Ok(if amount > 0.0 { TxKind::Buy } else { TxKind::Sell });
            }
        }
        if let Some(euro) = euro_match(group) {
            let amount = parse_amount(field(euro, "amount"));
            return Ok(if amount > 0.0 { TxKind::Sell } else { TxKind::Buy });
        }
        Err(classification_error(group, "unrecognized statement row shape"))
    }

    fn currency(&self, _group: &TransactionGroup, _kind: TxKind) -> Result<String, ImportError> {
        Ok("EUR".to_string())
    }

    fn rate(&self, _group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        Ok(1.0)
    }

    fn total(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError> {
        // An asset moved without payment has no money side at all.
        if moved_asset(group).is_some() {
            return Ok(0.0);
        }
        let total = match kind {
            TxKind::Deposit | TxKind::Withdrawal => group
                .records
                .iter()
                .map(|record| parse_amount(field(record, "amount")).abs())
                .sum(),
            TxKind::Buy => {
                let euro = euro_match(group)
                    .ok_or_else(|| classification_error(group, "trade without a euro fill"))?;
                parse_amount(field(euro, "amount")).abs() + self.fee(group, kind)?
            }
            TxKind::Sell => {
                let euro = euro_match(group)
                    .ok_or_else(|| classification_error(group, "trade without a euro fill"))?;
                parse_amount(field(euro, "amount")).abs()
            }
            _ => return Err(classification_error(group, "no total for this kind")),
        };
        Ok(round_cents(total))
    }

    fn fee(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let mut fee = 0.0;
        for record in group
            .records
            .iter()
            .filter(|record| field(record, "type") == "fee")
        {
            if field(record, "amount_balance_unit") != "EUR" {
                return Err(classification_error(group, "fee charged in a non-euro asset"));
            }
            fee += parse_amount(field(record, "amount")).abs();
        }
        Ok(round_cents(fee))
    }

    fn tax(
        &self,
        _group: &TransactionGroup,
        _kind: TxKind,
        _rate: f64,
    ) -> Result<Option<f64>, ImportError> {
        Ok(None)
    }

    fn target(&self, group: &TransactionGroup, _kind: TxKind) -> Result<String, ImportError> {
        if let Some(record) = moved_asset(group) {
            return Ok(field(record, "amount_balance_unit").to_string());
        }
        asset_match(group)
            .map(|record| field(record, "amount_balance_unit").to_string())
            .ok_or_else(|| classification_error(group, "cannot find trade target"))
    }

    fn amount(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let record = moved_asset(group)
            .or_else(|| asset_match(group))
            .ok_or_else(|| classification_error(group, "cannot find trade amount"))?;
        field(record, "amount")
            .parse()
            .map_err(|_| classification_error(group, "unparseable trade amount"))
    }
}
