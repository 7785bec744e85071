//! The description codec.
//!
//! Transaction descriptions double as a persistence format: buy and
//! sell texts embed the cumulative quantity owned and the running
//! weighted-average price, and the engine decodes them from ledger
//! history to seed cost-basis state on later runs. The encoded text is
//! the on-disk representation and must stay stable.
//!
//! Grammar produced and consumed here:
//!
//! ```text
//! [TAG]*<TypeWord> <signedQty> <SYMBOL> (<note>(, <note>)*)
//! note := "yht. <qty> <sym>" | "jälj. <qty> <sym>"
//!       | "k.h. <price> €/<sym>" | "k.h. nyt <price> €/<sym>"
//! ```

use regex::Regex;
use std::sync::OnceLock;

use crate::amount::{
    format_currency, format_currency_digits, format_qty, format_signed_qty_unit,
};
use crate::config::ImportConfig;
use crate::error::{CodecError, ImportError};
use crate::txo::{TransactionObject, TxKind};

#[allow(clippy::expect_used)]
fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([A-Za-z0-9]+)\]\s*(.*)$").expect("static pattern"))
}

#[allow(clippy::expect_used)]
fn trade_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(Osto|Myynti)\s+([+-][0-9][0-9.]*)\s+([A-Za-z0-9:._-]+)\s*$")
            .expect("static pattern")
    })
}

#[allow(clippy::expect_used)]
fn total_note_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(yht\.|jälj\.)\s+([+-]?[0-9][0-9.]*)\s+\S+$").expect("static pattern")
    })
}

#[allow(clippy::expect_used)]
fn average_note_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^k\.h\.(\s+nyt)?\s+([0-9][0-9.]*)\s+€/\S+$").expect("static pattern")
    })
}

/// Cost-basis data recovered from one buy or sell description.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrade {
    pub tags: Vec<String>,
    pub kind: TxKind,
    /// Signed traded quantity, negative on sells.
    pub amount: f64,
    pub target: String,
    /// Cumulative quantity owned after the transaction (`yht.`/`jälj.`).
    pub target_total: Option<f64>,
    /// Weighted-average price after the transaction (`k.h.`).
    pub target_average: Option<f64>,
}

/// Render the canonical description for a transaction, including the
/// `[SERVICE][FUND]` tag prefix.
pub fn describe(txo: &TransactionObject, config: &ImportConfig) -> Result<String, ImportError> {
    Ok(format!("{}{}", config.tags_prefix(), body(txo, config)?))
}

fn body(txo: &TransactionObject, config: &ImportConfig) -> Result<String, ImportError> {
    let service = config.service_name.as_str();
    match txo.kind {
        TxKind::Deposit => Ok(format!("Talletus {service}-palveluun")),
        TxKind::Withdrawal => Ok(format!("Nosto {service}-palvelusta")),
        TxKind::Interest => Ok(format!("{service} lainakorko")),
        TxKind::Buy => {
            let target = txo.target_symbol()?;
            let mut notes = vec![format!(
                "yht. {}",
                format_signed_qty_unit(txo.target_total.unwrap_or(0.0), target)
            )];
            if !config.no_profit {
                notes.push(format!(
                    "k.h. nyt {}",
                    format_currency(txo.target_average.unwrap_or(0.0), &format!("€/{target}"))
                ));
            }
            Ok(format!(
                "Osto {} ({})",
                format_signed_qty_unit(txo.amount.unwrap_or(0.0), target),
                notes.join(", ")
            ))
        }
        TxKind::Sell => {
            let target = txo.target_symbol()?;
            let mut notes = Vec::new();
            if !config.no_profit {
                notes.push(format!(
                    "k.h. {}",
                    format_currency(txo.target_average.unwrap_or(0.0), &format!("€/{target}"))
                ));
            }
            notes.push(format!(
                "jälj. {}",
                format_signed_qty_unit(txo.target_total.unwrap_or(0.0), target)
            ));
            Ok(format!(
                "Myynti {} ({})",
                format_signed_qty_unit(txo.amount.unwrap_or(0.0), target),
                notes.join(", ")
            ))
        }
        TxKind::Dividend => {
            let target = txo.target_symbol()?;
            let shares = txo.amount.unwrap_or(0.0);
            let per_share = if shares != 0.0 && txo.rate != 0.0 {
                txo.total / shares / txo.rate
            } else {
                0.0
            };
            let mut notes = vec![format!(
                "{} x {} = {}",
                format_qty(shares),
                format_currency_digits(per_share, &txo.currency, 5),
                format_currency(txo.total / txo.rate, &txo.currency)
            )];
            if let Some(tax) = txo.tax.filter(|tax| *tax != 0.0) {
                notes.push(format!(
                    "vero {} = {}",
                    format_currency(tax / txo.rate, &txo.currency),
                    format_currency(tax, "€")
                ));
            }
            if txo.currency != "EUR" {
                notes.push(format!(
                    "kurssi {}",
                    format_currency_digits(txo.rate, &format!("{}/€", txo.currency), 4)
                ));
            }
            Ok(format!("Osinko {target} ({})", notes.join(", ")))
        }
        TxKind::Fx => {
            let target = txo.target_symbol()?;
            let note = format!(
                "kurssi {}",
                format_currency_digits(txo.rate, &format!("{}/{target}", txo.currency), 4)
            );
            Ok(format!(
                "Valuutanvaihto {target} -> {} ({note})",
                txo.currency
            ))
        }
    }
}

/// Decode a buy/sell description back into cost-basis data.
///
/// An unrecognized type keyword or note pattern is a parse error,
/// never partial data; recovered values feed seeded averages.
pub fn decode(text: &str) -> Result<DecodedTrade, CodecError> {
    let mut rest = text.trim().to_string();
    let mut tags = Vec::new();
    while let Some(captures) = tag_re().captures(&rest) {
        tags.push(captures[1].to_string());
        rest = captures[2].to_string();
    }

    let (core, notes) = split_note_block(&rest);

    let trade = trade_re()
        .captures(core.trim())
        .ok_or_else(|| CodecError::UnknownType(core.trim().to_string()))?;
    let kind = match &trade[1] {
        "Osto" => TxKind::Buy,
        _ => TxKind::Sell,
    };
    let amount = parse_number(&trade[2])?;
    let target = trade[3].to_string();

    let mut target_total = None;
    let mut target_average = None;
    for note in notes {
        if let Some(captures) = total_note_re().captures(note) {
            target_total = Some(parse_number(&captures[2])?);
        } else if let Some(captures) = average_note_re().captures(note) {
            target_average = Some(parse_number(&captures[2])?);
        } else {
            return Err(CodecError::UnknownNote(note.to_string()));
        }
    }

    Ok(DecodedTrade {
        tags,
        kind,
        amount,
        target,
        target_total,
        target_average,
    })
}

/// Split `"Osto +2 ETH (a, b)"` into the core text and its notes.
fn split_note_block(text: &str) -> (String, Vec<&str>) {
    let Some(open) = text.rfind('(') else {
        return (text.to_string(), Vec::new());
    };
    let Some(close) = text[open..].find(')').map(|i| open + i) else {
        return (text.to_string(), Vec::new());
    };
    let core = format!("{}{}", &text[..open], &text[close + 1..]);
    let notes = text[open + 1..close]
        .split(", ")
        .filter(|note| !note.is_empty())
        .collect();
    (core, notes)
}

fn parse_number(text: &str) -> Result<f64, CodecError> {
    text.parse()
        .map_err(|_| CodecError::BadNumber(text.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::SourceRecord;
    use crate::txo::{TransactionGroup, Tx, TxEntry};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn config() -> ImportConfig {
        ImportConfig {
            service: "KRAKEN".to_string(),
            service_name: "Kraken".to_string(),
            fund: None,
            ..ImportConfig::default()
        }
    }

    fn txo(kind: TxKind) -> TransactionObject {
        TransactionObject {
            group: TransactionGroup {
                id: "g1".to_string(),
                records: vec![SourceRecord::new(1, BTreeMap::new())],
            },
            kind,
            total: 200.0,
            currency: "EUR".to_string(),
            rate: 1.0,
            target: Some("ETH".to_string()),
            amount: Some(2.0),
            fee: 2.0,
            tax: None,
            target_average: Some(99.0),
            target_total: Some(2.0),
            tx: Tx {
                date: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
                description: String::new(),
                entries: Vec::<TxEntry>::new(),
            },
        }
    }

    #[test]
    fn encodes_buy() {
        let text = describe(&txo(TxKind::Buy), &config()).unwrap();
        assert_eq!(text, "[KRAKEN] Osto +2 ETH (yht. +2 ETH, k.h. nyt 99.00 €/ETH)");
    }

    #[test]
    fn encodes_sell() {
        let mut txo = txo(TxKind::Sell);
        txo.amount = Some(-1.0);
        txo.target_total = Some(1.0);
        let text = describe(&txo, &config()).unwrap();
        assert_eq!(text, "[KRAKEN] Myynti -1 ETH (k.h. 99.00 €/ETH, jälj. +1 ETH)");
    }

    #[test]
    fn encodes_no_profit_variants() {
        let mut cfg = config();
        cfg.no_profit = true;
        let text = describe(&txo(TxKind::Buy), &cfg).unwrap();
        assert_eq!(text, "[KRAKEN] Osto +2 ETH (yht. +2 ETH)");
    }

    #[test]
    fn encodes_transfers_and_interest() {
        let cfg = config();
        assert_eq!(
            describe(&txo(TxKind::Deposit), &cfg).unwrap(),
            "[KRAKEN] Talletus Kraken-palveluun"
        );
        assert_eq!(
            describe(&txo(TxKind::Withdrawal), &cfg).unwrap(),
            "[KRAKEN] Nosto Kraken-palvelusta"
        );
        assert_eq!(
            describe(&txo(TxKind::Interest), &cfg).unwrap(),
            "[KRAKEN] Kraken lainakorko"
        );
    }

    #[test]
    fn encodes_dividend_with_tax_and_rate() {
        let mut txo = txo(TxKind::Dividend);
        txo.target = Some("AAPL".to_string());
        txo.currency = "USD".to_string();
        txo.rate = 0.85;
        txo.amount = Some(80.0);
        txo.total = 49.64;
        txo.tax = Some(7.45);
        let text = describe(&txo, &config()).unwrap();
        assert_eq!(
            text,
            "[KRAKEN] Osinko AAPL (80 x 0.73000 USD = 58.40 USD, vero 8.76 USD = 7.45 €, kurssi 0.8500 USD/€)"
        );
    }

    #[test]
    fn encodes_fx() {
        let mut txo = txo(TxKind::Fx);
        txo.target = Some("EUR".to_string());
        txo.currency = "USD".to_string();
        txo.rate = 0.85;
        txo.total = 100.0;
        let text = describe(&txo, &config()).unwrap();
        assert_eq!(text, "[KRAKEN] Valuutanvaihto EUR -> USD (kurssi 0.8500 USD/EUR)");
    }

    #[test]
    fn round_trips_buy_and_sell() {
        let cfg = config();
        let buy = txo(TxKind::Buy);
        let decoded = decode(&describe(&buy, &cfg).unwrap()).unwrap();
        assert_eq!(decoded.tags, vec!["KRAKEN".to_string()]);
        assert_eq!(decoded.kind, TxKind::Buy);
        assert_eq!(decoded.amount, 2.0);
        assert_eq!(decoded.target, "ETH");
        assert_eq!(decoded.target_total, Some(2.0));
        assert_eq!(decoded.target_average, Some(99.0));

        let mut sell = txo(TxKind::Sell);
        sell.amount = Some(-1.0);
        sell.target_total = Some(1.0);
        let decoded = decode(&describe(&sell, &cfg).unwrap()).unwrap();
        assert_eq!(decoded.kind, TxKind::Sell);
        assert_eq!(decoded.amount, -1.0);
        assert_eq!(decoded.target_total, Some(1.0));
        assert_eq!(decoded.target_average, Some(99.0));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(matches!(
            decode("[KRAKEN] Talletus Kraken-palveluun"),
            Err(CodecError::UnknownType(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_note() {
        assert!(matches!(
            decode("Osto +2 ETH (hinta 12.00)"),
            Err(CodecError::UnknownNote(_))
        ));
    }

    #[test]
    fn decode_handles_multiple_tags() {
        let decoded = decode("[KRAKEN][KRY] Myynti -0.5 BTC (k.h. 800.00 €/BTC, jälj. +0.5 BTC)").unwrap();
        assert_eq!(decoded.tags, vec!["KRAKEN".to_string(), "KRY".to_string()]);
        assert_eq!(decoded.target_average, Some(800.0));
        assert_eq!(decoded.target_total, Some(0.5));
    }
}
