//! Coinmotion account statement.
//!
//! Rows carry their unit inside the cell (`-500.00 €`, `0.25 BTC`) and
//! there is no confirmation number; rows belonging to one event share
//! the same date and type, which becomes the group id.

use chrono::{NaiveDate, NaiveDateTime};

use crate::amount::round_cents;
use crate::error::ImportError;
use crate::format::{classification_error, group_by_key, BrokerFormat};
use crate::record::SourceRecord;
use crate::txo::{TransactionGroup, TxKind};

pub struct Coinmotion;

fn field<'a>(record: &'a SourceRecord, name: &str) -> &'a str {
    record.get(name).unwrap_or("")
}

/// Parse a cell like `-1 234,56 €` or `0.25 BTC` into a number.
fn parse_cell(value: &str) -> f64 {
    let number: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | ',' | ' '))
        .filter(|c| *c != ' ')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    number.parse().unwrap_or(0.0)
}

fn euro_rows<'a>(group: &'a TransactionGroup) -> impl Iterator<Item = &'a SourceRecord> {
    group
        .records
        .iter()
        .filter(|record| field(record, "Account") == "EUR")
}

impl BrokerFormat for Coinmotion {
    fn name(&self) -> &'static str {
        "coinmotion"
    }

    fn service_name(&self) -> &'static str {
        "Coinmotion"
    }

    fn grouping(&self, records: Vec<SourceRecord>) -> Result<Vec<Vec<SourceRecord>>, ImportError> {
        Ok(group_by_key(records, |record| {
            let date = record.get_non_empty("Date")?;
            let kind = record.get_non_empty("Type")?;
            Some(format!("{date}/{kind}"))
        }))
    }

    fn group_id(&self, group: &[SourceRecord]) -> Option<String> {
        let first = group.first()?;
        let date = first.get_non_empty("Date")?;
        let kind = first.get_non_empty("Type")?;
        Some(format!("{date}/{kind}"))
    }

    fn date(&self, record: &SourceRecord) -> Result<NaiveDate, ImportError> {
        let date = field(record, "Date");
        let day_part = date.split_whitespace().next().unwrap_or(date);
        NaiveDate::parse_from_str(day_part, "%d.%m.%Y").map_err(|err| ImportError::Grouping {
            line: record.line,
            reason: format!("bad date {date:?}: {err}"),
        })
    }

    fn time(&self, record: &SourceRecord) -> i64 {
        let date = field(record, "Date");
        NaiveDateTime::parse_from_str(date, "%d.%m.%Y %H:%M")
            .map(|dt| dt.and_utc().timestamp_millis())
            .or_else(|_| {
                NaiveDate::parse_from_str(date, "%d.%m.%Y")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp_millis())
            })
            .unwrap_or(0)
    }

    fn recognize(&self, group: &TransactionGroup) -> Result<TxKind, ImportError> {
        let kind = group
            .records
            .first()
            .map(|record| field(record, "Type"))
            .unwrap_or("");
        if group.records.len() == 1 {
            match kind {
                "Deposit" => return Ok(TxKind::Deposit),
                "Withdraw" | "Withdrawal" => return Ok(TxKind::Withdrawal),
                _ => {}
            }
        }
        if group.records.len() >= 2 {
            match kind {
                "Buy" | "Buy stop" | "Limit buy" => return Ok(TxKind::Buy),
                "Sell" | "Sell stop" => return Ok(TxKind::Sell),
                _ => {}
            }
        }
        Err(classification_error(
            group,
            format!("unrecognized statement row type {kind:?}"),
        ))
    }

    fn currency(&self, _group: &TransactionGroup, _kind: TxKind) -> Result<String, ImportError> {
        Ok("EUR".to_string())
    }

    fn rate(&self, _group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        Ok(1.0)
    }

    fn total(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let total = euro_rows(group)
            .map(|record| parse_cell(field(record, "Amount")).abs())
            .sum();
        Ok(round_cents(total))
    }

    fn fee(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let fee = euro_rows(group)
            .map(|record| parse_cell(field(record, "Fee")).abs())
            .sum();
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
        let crypto = group
            .records
            .iter()
            .map(|record| field(record, "Account"))
            .find(|account| !account.is_empty() && *account != "EUR");
        match crypto {
            Some("BTC") => Ok("BTC".to_string()),
            Some("ETH") => Ok("ETH".to_string()),
            Some(other) => Err(classification_error(
                group,
                format!("unknown Coinmotion account {other:?}"),
            )),
            None => Err(classification_error(group, "no trade target row")),
        }
    }

    fn amount(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError> {
        let target = self.target(group, kind)?;
        let quantity: f64 = group
            .records
            .iter()
            .filter(|record| field(record, "Account") == target)
            .map(|record| parse_cell(field(record, "Amount")).abs())
            .sum();
        Ok(if kind == TxKind::Sell { -quantity } else { quantity })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(line: usize, fields: &[(&str, &str)]) -> SourceRecord {
        SourceRecord::new(
            line,
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn buy_group() -> TransactionGroup {
        TransactionGroup {
            id: "15.1.2018 12:00/Buy".to_string(),
            records: vec![
                record(
                    1,
                    &[
                        ("Date", "15.1.2018 12:00"),
                        ("Type", "Buy"),
                        ("Account", "EUR"),
                        ("Amount", "-500,00 €"),
                        ("Fee", "5,00 €"),
                    ],
                ),
                record(
                    2,
                    &[
                        ("Date", "15.1.2018 12:00"),
                        ("Type", "Buy"),
                        ("Account", "BTC"),
                        ("Amount", "0.05 BTC"),
                        ("Fee", ""),
                    ],
                ),
            ],
        }
    }

    #[test]
    fn parses_unit_cells() {
        assert_eq!(parse_cell("-1 234,56 €"), -1234.56);
        assert_eq!(parse_cell("0.25 BTC"), 0.25);
        assert_eq!(parse_cell(""), 0.0);
    }

    #[test]
    fn extracts_buy_fields() {
        let cm = Coinmotion;
        let group = buy_group();
        assert_eq!(cm.recognize(&group).unwrap(), TxKind::Buy);
        assert_eq!(cm.total(&group, TxKind::Buy).unwrap(), 500.0);
        assert_eq!(cm.fee(&group, TxKind::Buy).unwrap(), 5.0);
        assert_eq!(cm.target(&group, TxKind::Buy).unwrap(), "BTC");
        assert_eq!(cm.amount(&group, TxKind::Buy).unwrap(), 0.05);
    }

    #[test]
    fn sell_amount_is_negative() {
        let cm = Coinmotion;
        let mut group = buy_group();
        for record in &mut group.records {
            // Rebuild records as a sell of the same shape.
            let mut fields: BTreeMap<String, String> = BTreeMap::new();
            for key in ["Date", "Account", "Amount", "Fee"] {
                fields.insert(key.to_string(), record.get(key).unwrap_or("").to_string());
            }
            fields.insert("Type".to_string(), "Sell".to_string());
            *record = SourceRecord::new(record.line, fields);
        }
        assert_eq!(cm.recognize(&group).unwrap(), TxKind::Sell);
        assert_eq!(cm.amount(&group, TxKind::Sell).unwrap(), -0.05);
    }

    #[test]
    fn dated_group_id() {
        let cm = Coinmotion;
        let group = buy_group();
        assert_eq!(
            cm.group_id(&group.records),
            Some("15.1.2018 12:00/Buy".to_string())
        );
        assert_eq!(
            cm.date(&group.records[0]).unwrap(),
            NaiveDate::from_ymd_opt(2018, 1, 15).unwrap()
        );
    }
}
