//! Kraken ledger export.
//!
//! Rows pair up by `refid`: a trade is one `ZEUR` row plus one crypto
//! asset row, deposits and withdrawals are single `ZEUR` rows.

use chrono::{NaiveDate, NaiveDateTime};

use crate::amount::round_cents;
use crate::error::ImportError;
use crate::format::{classification_error, group_by_key, BrokerFormat};
use crate::record::SourceRecord;
use crate::txo::{TransactionGroup, TxKind};

pub struct Kraken;

const BASE_ASSET: &str = "ZEUR";

fn field<'a>(record: &'a SourceRecord, name: &str) -> &'a str {
    record.get(name).unwrap_or("")
}

fn parse_amount(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

fn euro_rows<'a>(group: &'a TransactionGroup) -> impl Iterator<Item = &'a SourceRecord> {
    group
        .records
        .iter()
        .filter(|record| field(record, "asset") == BASE_ASSET)
}

fn crypto_row<'a>(group: &'a TransactionGroup) -> Option<&'a SourceRecord> {
    group
        .records
        .iter()
        .find(|record| field(record, "asset") != BASE_ASSET)
}

impl BrokerFormat for Kraken {
    fn name(&self) -> &'static str {
        "kraken"
    }

    fn service_name(&self) -> &'static str {
        "Kraken"
    }

    fn grouping(&self, records: Vec<SourceRecord>) -> Result<Vec<Vec<SourceRecord>>, ImportError> {
        Ok(group_by_key(records, |record| {
            record.get_non_empty("refid").map(str::to_string)
        }))
    }

    fn group_id(&self, group: &[SourceRecord]) -> Option<String> {
        group
            .first()
            .and_then(|record| record.get_non_empty("refid"))
            .map(str::to_string)
    }

    fn date(&self, record: &SourceRecord) -> Result<NaiveDate, ImportError> {
        let time = field(record, "time");
        let date = time.get(..10).unwrap_or(time);
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|err| {
            ImportError::Grouping {
                line: record.line,
                reason: format!("bad time field {time:?}: {err}"),
            }
        })
    }

    fn time(&self, record: &SourceRecord) -> i64 {
        let time = field(record, "time");
        NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S%.f")
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0)
    }

    fn recognize(&self, group: &TransactionGroup) -> Result<TxKind, ImportError> {
        if let [record] = group.records.as_slice() {
            if field(record, "asset") == BASE_ASSET {
                match field(record, "type") {
                    "deposit" => return Ok(TxKind::Deposit),
                    "withdrawal" => return Ok(TxKind::Withdrawal),
                    _ => {}
                }
            }
        }
        if group.records.len() == 2 {
            if let Some(euro) = euro_rows(group).next() {
                let amount = parse_amount(field(euro, "amount"));
                return Ok(if amount < 0.0 { TxKind::Buy } else { TxKind::Sell });
            }
        }
        Err(classification_error(group, "unrecognized ledger row shape"))
    }

    fn currency(&self, _group: &TransactionGroup, _kind: TxKind) -> Result<String, ImportError> {
        Ok("EUR".to_string())
    }

    fn rate(&self, _group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        Ok(1.0)
    }

    fn total(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError> {
        // On sells the euro amount is already net of the fee; on all
        // other kinds the fee comes on top of the row amount.
        let mut total = 0.0;
        for record in euro_rows(group) {
            total += parse_amount(field(record, "amount")).abs();
            if kind != TxKind::Sell {
                total += parse_amount(field(record, "fee")).abs();
            }
        }
        Ok(round_cents(total))
    }

    fn fee(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let fee = euro_rows(group)
            .map(|record| parse_amount(field(record, "fee")).abs())
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
        let Some(record) = crypto_row(group) else {
            return Err(classification_error(group, "no trade target row"));
        };
        match field(record, "asset") {
            "XETH" => Ok("ETH".to_string()),
            "XXBT" => Ok("BTC".to_string()),
            other => Err(classification_error(
                group,
                format!("unknown Kraken asset {other:?}"),
            )),
        }
    }

    fn amount(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let Some(record) = crypto_row(group) else {
            return Err(classification_error(group, "no trade amount row"));
        };
        field(record, "amount")
            .parse()
            .map_err(|_| classification_error(group, "unparseable trade amount"))
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

    fn group(records: Vec<SourceRecord>) -> TransactionGroup {
        TransactionGroup {
            id: "REF1".to_string(),
            records,
        }
    }

    fn trade(euro_amount: &str, euro_fee: &str, crypto_amount: &str) -> TransactionGroup {
        group(vec![
            record(
                1,
                &[
                    ("refid", "REF1"),
                    ("time", "2018-03-09 14:10:32"),
                    ("type", "trade"),
                    ("asset", "ZEUR"),
                    ("amount", euro_amount),
                    ("fee", euro_fee),
                ],
            ),
            record(
                2,
                &[
                    ("refid", "REF1"),
                    ("time", "2018-03-09 14:10:32"),
                    ("type", "trade"),
                    ("asset", "XETH"),
                    ("amount", crypto_amount),
                    ("fee", "0"),
                ],
            ),
        ])
    }

    #[test]
    fn recognizes_buy_and_sell() {
        let kraken = Kraken;
        assert_eq!(kraken.recognize(&trade("-198.00", "2.00", "2.0")).unwrap(), TxKind::Buy);
        assert_eq!(kraken.recognize(&trade("150.00", "1.00", "-1.0")).unwrap(), TxKind::Sell);
    }

    #[test]
    fn recognizes_transfers() {
        let kraken = Kraken;
        let deposit = group(vec![record(
            1,
            &[
                ("refid", "REF1"),
                ("time", "2018-01-01 08:00:00"),
                ("type", "deposit"),
                ("asset", "ZEUR"),
                ("amount", "500.00"),
                ("fee", "0"),
            ],
        )]);
        assert_eq!(kraken.recognize(&deposit).unwrap(), TxKind::Deposit);
    }

    #[test]
    fn buy_total_includes_fee() {
        let kraken = Kraken;
        let buy = trade("-198.00", "2.00", "2.0");
        assert_eq!(kraken.total(&buy, TxKind::Buy).unwrap(), 200.0);
        assert_eq!(kraken.fee(&buy, TxKind::Buy).unwrap(), 2.0);
        assert_eq!(kraken.amount(&buy, TxKind::Buy).unwrap(), 2.0);
        assert_eq!(kraken.target(&buy, TxKind::Buy).unwrap(), "ETH");
    }

    #[test]
    fn sell_total_excludes_fee_and_amount_is_negative() {
        let kraken = Kraken;
        let sell = trade("150.00", "1.00", "-1.0");
        assert_eq!(kraken.total(&sell, TxKind::Sell).unwrap(), 150.0);
        assert_eq!(kraken.amount(&sell, TxKind::Sell).unwrap(), -1.0);
    }

    #[test]
    fn groups_by_refid() {
        let kraken = Kraken;
        let records = vec![
            record(1, &[("refid", "A"), ("asset", "ZEUR")]),
            record(2, &[("refid", "B"), ("asset", "ZEUR")]),
            record(3, &[("refid", "A"), ("asset", "XETH")]),
        ];
        let groups = kraken.grouping(records).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(kraken.group_id(&groups[0]), Some("A".to_string()));
    }
}
