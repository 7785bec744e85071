//! The broker format capability set.
//!
//! Each supported export format implements [`BrokerFormat`]; the
//! engine itself is format-agnostic and touches source rows only
//! through this trait.

use chrono::NaiveDate;
use std::path::Path;

use crate::error::ImportError;
use crate::record::{load_csv, CsvOptions, SourceRecord};
use crate::txo::{TransactionGroup, TxKind};

pub mod coinmotion;
pub mod gdax;
pub mod kraken;
pub mod nordnet;

/// Capability set of one broker export format.
///
/// `recognize` runs first; the field extractors may rely on the group
/// already carrying its classified kind (two-phase preparation).
pub trait BrokerFormat {
    /// Format name used on the command line.
    fn name(&self) -> &'static str;

    /// Human-readable service name used in description texts.
    fn service_name(&self) -> &'static str;

    /// Load the export file into source records.
    fn load(&self, path: &Path) -> Result<Vec<SourceRecord>, ImportError> {
        load_csv(path, &CsvOptions::default())
    }

    /// Partition records into groups forming one logical event each.
    fn grouping(&self, records: Vec<SourceRecord>) -> Result<Vec<Vec<SourceRecord>>, ImportError>;

    /// Stable idempotency id for a group; `None` when the format has
    /// nothing better than the file/line fallback.
    fn group_id(&self, group: &[SourceRecord]) -> Option<String>;

    /// Nominal date of one record, `YYYY-MM-DD` granularity.
    fn date(&self, record: &SourceRecord) -> Result<NaiveDate, ImportError>;

    /// Sortable timestamp finer than the nominal date. Groups are
    /// processed in this order so that cost-basis updates apply in
    /// real chronological order.
    fn time(&self, record: &SourceRecord) -> i64;

    /// Classify the group from its shape.
    fn recognize(&self, group: &TransactionGroup) -> Result<TxKind, ImportError>;

    /// Transaction currency, e.g. `EUR` or `USD`.
    fn currency(&self, group: &TransactionGroup, kind: TxKind) -> Result<String, ImportError>;

    /// Conversion rate of the transaction currency to the base
    /// currency.
    fn rate(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError>;

    /// Positive transaction magnitude in the base currency.
    fn total(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError>;

    /// Service fee in the base currency.
    fn fee(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError>;

    /// Withheld tax in the base currency, if any.
    fn tax(
        &self,
        group: &TransactionGroup,
        kind: TxKind,
        rate: f64,
    ) -> Result<Option<f64>, ImportError>;

    /// The trade target symbol or counter-currency.
    fn target(&self, group: &TransactionGroup, kind: TxKind) -> Result<String, ImportError>;

    /// Signed quantity change of the target; negative on disposals.
    fn amount(&self, group: &TransactionGroup, kind: TxKind) -> Result<f64, ImportError>;

    /// Account role holding the target. Defaults to the lowercased
    /// symbol (`eth`, `btc`, …); stock brokers override to `shares`.
    fn holding_role(&self, target: &str) -> String {
        target.to_lowercase()
    }
}

/// Resolve a format implementation by its command-line name.
pub fn by_name(name: &str) -> Option<Box<dyn BrokerFormat>> {
    match name {
        "kraken" => Some(Box::new(kraken::Kraken)),
        "coinmotion" => Some(Box::new(coinmotion::Coinmotion)),
        "gdax" => Some(Box::new(gdax::Gdax)),
        "nordnet" => Some(Box::new(nordnet::Nordnet)),
        _ => None,
    }
}

/// Names of all supported formats, for CLI help.
pub fn known_formats() -> &'static [&'static str] {
    &["kraken", "coinmotion", "gdax", "nordnet"]
}

/// Fallback group id built from the file name and the sorted line
/// numbers of the group members.
pub fn file_line_id(file: &Path, group: &[SourceRecord]) -> String {
    let base = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut lines: Vec<usize> = group.iter().map(|record| record.line).collect();
    lines.sort_unstable();
    let lines: Vec<String> = lines.iter().map(usize::to_string).collect();
    format!("{base}:{}", lines.join(","))
}

/// Group records by a key extracted per record, preserving first-seen
/// order. Records yielding `None` are dropped.
pub(crate) fn group_by_key<F>(records: Vec<SourceRecord>, key: F) -> Vec<Vec<SourceRecord>>
where
    F: Fn(&SourceRecord) -> Option<String>,
{
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<SourceRecord>> =
        std::collections::HashMap::new();
    for record in records {
        let Some(k) = key(&record) else {
            continue;
        };
        if !groups.contains_key(&k) {
            order.push(k.clone());
        }
        groups.entry(k).or_default().push(record);
    }
    order
        .into_iter()
        .filter_map(|k| groups.remove(&k))
        .collect()
}

/// Classification error helper shared by the format implementations.
pub(crate) fn classification_error(group: &TransactionGroup, reason: impl Into<String>) -> ImportError {
    ImportError::Classification {
        group_id: group.id.clone(),
        reason: reason.into(),
    }
}
