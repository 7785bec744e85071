//! Generic source records produced by the CSV loader.
//!
//! Each broker export row becomes an opaque key→value map plus its
//! 1-based line number, which gives deterministic ordering and a
//! fallback identity when the format has no confirmation numbers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ImportError;

/// One row from a broker export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// 1-based data line number (header excluded).
    pub line: usize,
    fields: BTreeMap<String, String>,
}

impl SourceRecord {
    pub fn new(line: usize, fields: BTreeMap<String, String>) -> Self {
        Self { line, fields }
    }

    /// Field value by sanitized header name, empty cells included.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Field value, treating a missing or empty cell as absent.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|value| !value.is_empty())
    }

    /// All fields keyed by sanitized header name, for diagnostics.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// Options for the CSV loader.
pub struct CsvOptions {
    pub delimiter: u8,
    /// Explicit header names; when `None` the first row is used.
    pub headers: Option<Vec<String>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            headers: None,
        }
    }
}

/// Replace every non-alphanumeric character with `_` so that header
/// names survive locale-specific punctuation (e.g. `Kirjauspäivä` →
/// `Kirjausp_iv_`).
pub fn sanitize_header(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Load a broker CSV export into source records. The first row is the
/// header unless `opts.headers` overrides it.
pub fn load_csv(path: &Path, opts: &CsvOptions) -> Result<Vec<SourceRecord>, ImportError> {
    let data = fs::read_to_string(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(data.as_bytes());

    let mut headers: Option<Vec<String>> = opts.headers.clone();
    let skip_first = headers.is_none();
    let mut records = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let row = row?;
        if index == 0 && skip_first {
            headers = Some(row.iter().map(sanitize_header).collect());
            continue;
        }
        let Some(names) = headers.as_ref() else {
            continue;
        };
        let mut fields = BTreeMap::new();
        for (i, value) in row.iter().enumerate() {
            if let Some(name) = names.get(i) {
                fields.insert(name.clone(), value.to_string());
            }
        }
        records.push(SourceRecord::new(records.len() + 1, fields));
    }

    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_csv(name: &str, content: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("kirjuri-record-{now}-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join(name);
        fs::write(&path, content).expect("write csv");
        path
    }

    #[test]
    fn sanitizes_headers() {
        assert_eq!(sanitize_header("Kirjauspäivä"), "Kirjausp_iv_");
        assert_eq!(sanitize_header("Vahvistusnumero/Laskelma"), "Vahvistusnumero_Laskelma");
        assert_eq!(sanitize_header("refid"), "refid");
    }

    #[test]
    fn fields_expose_the_whole_row() {
        let record = SourceRecord::new(
            3,
            [("type".to_string(), "deposit".to_string())].into(),
        );
        assert_eq!(record.fields().len(), 1);
        assert_eq!(record.fields().get("type").map(String::as_str), Some("deposit"));
    }

    #[test]
    fn loads_rows_with_line_numbers() {
        let path = temp_csv("a.csv", "time,type,asset\n2018-01-01,deposit,ZEUR\n2018-01-02,trade,XETH\n");
        let records = load_csv(&path, &CsvOptions::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 1);
        assert_eq!(records[0].get("type"), Some("deposit"));
        assert_eq!(records[1].get("asset"), Some("XETH"));
    }

    #[test]
    fn semicolon_delimiter() {
        let path = temp_csv("b.csv", "Id;Summa\n7;-1 200,50\n");
        let records = load_csv(
            &path,
            &CsvOptions {
                delimiter: b';',
                headers: None,
            },
        )
        .unwrap();
        assert_eq!(records[0].get("Summa"), Some("-1 200,50"));
    }
}
