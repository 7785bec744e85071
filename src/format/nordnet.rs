//! Nordnet transaction report.
//!
//! Semicolon-separated export with Finnish headers, decimal commas and
//! space thousand separators. Rows that settle together share a
//! confirmation number, which doubles as the idempotency id.

use chrono::NaiveDate;
use std::path::Path;

use crate::amount::round_cents;
use crate::error::ImportError;
use crate::format::{classification_error, group_by_key, BrokerFormat};
use crate::record::{load_csv, CsvOptions, SourceRecord};
use crate::txo::{TransactionGroup, TxKind};

pub struct Nordnet;

fn field<'a>(record: &'a SourceRecord, name: &str) -> &'a str {
    record.get(name).unwrap_or("")
}

/// Parse `-1 234,56` style numbers.
fn parse_number(value: &str) -> f64 {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse().unwrap_or(0.0)
}

/// Normalize an entry type for matching: non-word characters become
/// underscores, so `VALUUTAN OSTO` and `VALUUTAN-OSTO` compare equal.
fn entry_type(record: &SourceRecord) -> String {
    field(record, "Tapahtumatyyppi")
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn row_rate(record: &SourceRecord) -> f64 {
    let rate = parse_number(field(record, "Valuuttakurssi"));
    if rate == 0.0 {
        1.0
    } else {
        rate
    }
}

/// The row money was paid out of.
fn given_row<'a>(group: &'a TransactionGroup) -> Option<&'a SourceRecord> {
    group
        .records
        .iter()
        .find(|record| parse_number(field(record, "Summa")) < 0.0)
}

/// The row money came in on.
fn received_row<'a>(group: &'a TransactionGroup) -> Option<&'a SourceRecord> {
    group
        .records
        .iter()
        .find(|record| parse_number(field(record, "Summa")) > 0.0)
}

impl BrokerFormat for Nordnet {
    fn name(&self) -> &'static str {
        "nordnet"
    }

    fn service_name(&self) -> &'static str {
        "Nordnet"
    }

    fn load(&self, path: &Path) -> Result<Vec<SourceRecord>, ImportError> {
        load_csv(
            path,
            &CsvOptions {
                delimiter: b';',
                headers: None,
            },
        )
    }

    fn grouping(&self, records: Vec<SourceRecord>) -> Result<Vec<Vec<SourceRecord>>, ImportError> {
        // Rows without a confirmation number never settled; the
        // statement repeats them later with one, so drop them here.
        Ok(group_by_key(records, |record| {
            record
                .get_non_empty("Vahvistusnumero_Laskelma")
                .map(str::to_string)
        }))
    }

    fn group_id(&self, group: &[SourceRecord]) -> Option<String> {
        group
            .first()?
            .get_non_empty("Vahvistusnumero_Laskelma")
            .map(str::to_string)
    }

    fn date(&self, record: &SourceRecord) -> Result<NaiveDate, ImportError> {
        let date = field(record, "Kirjausp_iv_");
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(date, "%d.%m.%Y"))
            .map_err(|err| ImportError::Grouping {
                line: record.line,
                reason: format!("bad date {date:?}: {err}"),
            })
    }

    fn time(&self, record: &SourceRecord) -> i64 {
        // The running entry id preserves statement order within a day.
        field(record, "Id").trim().parse().unwrap_or(0)
    }

    fn recognize(&self, group: &TransactionGroup) -> Result<TxKind, ImportError> {
        let types: Vec<String> = group.records.iter().map(entry_type).collect();
        let has = |name: &str| types.iter().any(|t| t == name);
        if has("OSINKO") {
            Ok(TxKind::Dividend)
        } else if has("VALUUTAN_OSTO") {
            Ok(TxKind::Fx)
        } else if has("MYYNTI") {
            Ok(TxKind::Sell)
        } else if has("OSTO") {
            Ok(TxKind::Buy)
        } else if has("LAINAKORKO") {
            Ok(TxKind::Interest)
        } else if has("TALLETUS") {
            Ok(TxKind::Deposit)
        } else if has("NOSTO") {
            Ok(TxKind::Withdrawal)
        } else {
            Err(classification_error(
                group,
                format!("unrecognized entry types {types:?}"),
            ))
        }
    }

    fn currency(&self, group: &TransactionGroup, _kind: TxKind) -> Result<String, ImportError> {
        let row = received_row(group).or_else(|| given_row(group));
        match row.map(|record| field(record, "Valuutta")) {
            Some(currency @ ("EUR" | "USD")) => Ok(currency.to_string()),
            other => Err(classification_error(
                group,
                format!("cannot figure out currency from {other:?}"),
            )),
        }
    }

    fn rate(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let rate = group
            .records
            .iter()
            .filter(|record| field(record, "Valuutta") != "EUR")
            .fold(1.0, |_, record| row_rate(record));
        Ok(rate)
    }

    fn total(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError> {
        let total = if kind == TxKind::Fx {
            // Value of a conversion is its euro leg.
            group
                .records
                .iter()
                .filter(|record| field(record, "Valuutta") == "EUR")
                .map(|record| parse_number(field(record, "Summa")).abs())
                .sum()
        } else {
            group
                .records
                .iter()
                .map(|record| parse_number(field(record, "Summa")).abs() * row_rate(record))
                .sum()
        };
        Ok(round_cents(total))
    }

    fn fee(&self, group: &TransactionGroup, _kind: TxKind) -> Result<f64, ImportError> {
        let fee = group
            .records
            .iter()
            .map(|record| parse_number(field(record, "Maksut")).abs() * row_rate(record))
            .sum();
        Ok(round_cents(fee))
    }

    fn tax(
        &self,
        group: &TransactionGroup,
        _kind: TxKind,
        _rate: f64,
    ) -> Result<Option<f64>, ImportError> {
        let withheld = group
            .records
            .iter()
            .filter(|record| entry_type(record) == "ENNAKKOPID_TYS")
            .map(|record| parse_number(field(record, "Summa")).abs() * row_rate(record))
            .sum::<f64>();
        if withheld > 0.0 {
            Ok(Some(round_cents(withheld)))
        } else {
            Ok(None)
        }
    }

    fn target(&self, group: &TransactionGroup, _kind: TxKind) -> Result<String, ImportError> {
        if let Some(ticker) = group
            .records
            .first()
            .and_then(|record| record.get_non_empty("Arvopaperi"))
        {
            return Ok(ticker.to_string());
        }
        // No security: a currency event, targeting the currency given
        // out (EUR when buying dollars).
        given_row(group)
            .and_then(|record| record.get_non_empty("Valuutta"))
            .map(str::to_string)
            .ok_or_else(|| classification_error(group, "cannot recognize trade target"))
    }

    fn amount(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError> {
        let quantity = group
            .records
            .iter()
            .map(|record| parse_number(field(record, "M__r_")).abs())
            .find(|quantity| *quantity != 0.0)
            .unwrap_or(0.0);
        Ok(if kind == TxKind::Sell { -quantity } else { quantity })
    }

    fn holding_role(&self, _target: &str) -> String {
        "shares".to_string()
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
            id: "123456".to_string(),
            records,
        }
    }

    #[test]
    fn parses_finnish_numbers() {
        assert_eq!(parse_number("-1 234,56"), -1234.56);
        assert_eq!(parse_number("10,5"), 10.5);
        assert_eq!(parse_number(""), 0.0);
    }

    #[test]
    fn buy_in_euros() {
        let nordnet = Nordnet;
        let g = group(vec![record(
            2,
            &[
                ("Id", "900100"),
                ("Kirjausp_iv_", "2018-03-01"),
                ("Tapahtumatyyppi", "OSTO"),
                ("Arvopaperi", "NOKIA"),
                ("M__r_", "100"),
                ("Summa", "-505,00"),
                ("Valuutta", "EUR"),
                ("Valuuttakurssi", "1"),
                ("Maksut", "5,00"),
                ("Vahvistusnumero_Laskelma", "123456"),
            ],
        )]);
        assert_eq!(nordnet.recognize(&g).unwrap(), TxKind::Buy);
        assert_eq!(nordnet.total(&g, TxKind::Buy).unwrap(), 505.0);
        assert_eq!(nordnet.fee(&g, TxKind::Buy).unwrap(), 5.0);
        assert_eq!(nordnet.target(&g, TxKind::Buy).unwrap(), "NOKIA");
        assert_eq!(nordnet.amount(&g, TxKind::Buy).unwrap(), 100.0);
        assert_eq!(nordnet.holding_role("NOKIA"), "shares");
    }

    #[test]
    fn dividend_with_withholding() {
        let nordnet = Nordnet;
        let g = group(vec![
            record(
                2,
                &[
                    ("Id", "900200"),
                    ("Kirjausp_iv_", "2018-04-10"),
                    ("Tapahtumatyyppi", "OSINKO"),
                    ("Arvopaperi", "AAPL"),
                    ("M__r_", "10"),
                    ("Summa", "6,30"),
                    ("Valuutta", "USD"),
                    ("Valuuttakurssi", "0,8"),
                    ("Maksut", "0"),
                    ("Vahvistusnumero_Laskelma", "123457"),
                ],
            ),
            record(
                3,
                &[
                    ("Id", "900201"),
                    ("Kirjausp_iv_", "2018-04-10"),
                    ("Tapahtumatyyppi", "ENNAKKOPIDÄTYS"),
                    ("Arvopaperi", "AAPL"),
                    ("M__r_", ""),
                    ("Summa", "-0,95"),
                    ("Valuutta", "USD"),
                    ("Valuuttakurssi", "0,8"),
                    ("Maksut", "0"),
                    ("Vahvistusnumero_Laskelma", "123457"),
                ],
            ),
        ]);
        assert_eq!(nordnet.recognize(&g).unwrap(), TxKind::Dividend);
        assert_eq!(nordnet.currency(&g, TxKind::Dividend).unwrap(), "USD");
        assert_eq!(nordnet.rate(&g, TxKind::Dividend).unwrap(), 0.8);
        assert_eq!(nordnet.tax(&g, TxKind::Dividend, 0.8).unwrap(), Some(0.76));
    }

    #[test]
    fn fx_total_uses_euro_leg() {
        let nordnet = Nordnet;
        let g = group(vec![
            record(
                2,
                &[
                    ("Id", "900300"),
                    ("Kirjausp_iv_", "2018-05-01"),
                    ("Tapahtumatyyppi", "VALUUTAN OSTO"),
                    ("Arvopaperi", ""),
                    ("M__r_", ""),
                    ("Summa", "-100,00"),
                    ("Valuutta", "EUR"),
                    ("Valuuttakurssi", "1"),
                    ("Maksut", "0"),
                    ("Vahvistusnumero_Laskelma", "123458"),
                ],
            ),
            record(
                3,
                &[
                    ("Id", "900301"),
                    ("Kirjausp_iv_", "2018-05-01"),
                    ("Tapahtumatyyppi", "VALUUTAN OSTO"),
                    ("Arvopaperi", ""),
                    ("M__r_", ""),
                    ("Summa", "125,00"),
                    ("Valuutta", "USD"),
                    ("Valuuttakurssi", "0,8"),
                    ("Maksut", "0"),
                    ("Vahvistusnumero_Laskelma", "123458"),
                ],
            ),
        ]);
        assert_eq!(nordnet.recognize(&g).unwrap(), TxKind::Fx);
        assert_eq!(nordnet.total(&g, TxKind::Fx).unwrap(), 100.0);
        assert_eq!(nordnet.currency(&g, TxKind::Fx).unwrap(), "USD");
        assert_eq!(nordnet.target(&g, TxKind::Fx).unwrap(), "EUR");
        assert_eq!(nordnet.rate(&g, TxKind::Fx).unwrap(), 0.8);
    }

    #[test]
    fn rows_share_confirmation_number() {
        let nordnet = Nordnet;
        let records = vec![
            record(2, &[("Vahvistusnumero_Laskelma", "1"), ("Id", "1")]),
            record(3, &[("Vahvistusnumero_Laskelma", "2"), ("Id", "2")]),
            record(4, &[("Vahvistusnumero_Laskelma", "1"), ("Id", "3")]),
        ];
        let groups = nordnet.grouping(records).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(nordnet.group_id(&groups[0]), Some("1".to_string()));
    }

    #[test]
    fn unconfirmed_rows_are_dropped() {
        let nordnet = Nordnet;
        let records = vec![
            record(2, &[("Vahvistusnumero_Laskelma", "1"), ("Id", "1")]),
            record(3, &[("Vahvistusnumero_Laskelma", ""), ("Id", "2")]),
            record(4, &[("Id", "3")]),
        ];
        let groups = nordnet.grouping(records).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
    }
}
