//! Minimal tab-separated table reader for BIDS-style `.tsv` inputs.
//!
//! Events, confounds, signal and QC metric files are all plain TSV with a
//! header row. Cells are kept as strings; typed access goes through
//! [`Table::numeric_column`] and [`parse_cell`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Cell spellings treated as a missing value.
const MISSING: &[&str] = &["", "n/a", "na", "nan", "none", "null"];

/// A parsed TSV file.
#[derive(Debug, Clone)]
pub struct Table {
    pub source: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Read a TSV file. A missing or unreadable file is a data error: these are
    /// always subject inputs.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::data(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text, path)
    }

    /// Parse TSV text. `source` is only used in error messages.
    ///
    /// Blank lines before the header and at the end of the file are ignored.
    /// A blank line between data rows is a row of empty cells, so a one-column
    /// table reports it as a missing value instead of losing a time point.
    pub fn parse(text: &str, source: &Path) -> Result<Self> {
        let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
        let end = lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map_or(0, |i| i + 1);
        let mut numbered = lines[..end]
            .iter()
            .enumerate()
            .map(|(i, l)| (i + 1, *l))
            .skip_while(|(_, l)| l.trim().is_empty());

        let (_, header) = numbered
            .next()
            .ok_or_else(|| Error::data(format!("{} is empty", source.display())))?;
        let headers: Vec<String> = header.split('\t').map(|h| h.trim().to_string()).collect();
        check_headers(&headers, source)?;

        let mut rows = Vec::new();
        for (line_no, line) in numbered {
            let row: Vec<String> = line.split('\t').map(|c| c.trim().to_string()).collect();
            if row.len() != headers.len() {
                return Err(Error::data(format!(
                    "{} line {line_no}: expected {} columns, found {}",
                    source.display(),
                    headers.len(),
                    row.len()
                )));
            }
            rows.push(row);
        }

        Ok(Self {
            source: source.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Index of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of a named column, or a data error naming the file.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            Error::data(format!(
                "{}: missing required column '{name}'",
                self.source.display()
            ))
        })
    }

    /// Parse every cell of a column as `f64`.
    ///
    /// Missing cells become `fill` when given, otherwise they are an error.
    pub fn numeric_column(&self, name: &str, fill: Option<f64>) -> Result<Vec<f64>> {
        let idx = self.require_column(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| match parse_cell(&row[idx]) {
                Ok(Some(v)) => Ok(v),
                Ok(None) => fill.ok_or_else(|| {
                    Error::data(format!(
                        "{} row {}: missing value in column '{name}'",
                        self.source.display(),
                        i + 1
                    ))
                }),
                Err(msg) => Err(Error::data(format!(
                    "{} row {}, column '{name}': {msg}",
                    self.source.display(),
                    i + 1
                ))),
            })
            .collect()
    }
}

/// Column lookups are by name, so every header must be present and unique.
fn check_headers(headers: &[String], source: &Path) -> Result<()> {
    for (i, h) in headers.iter().enumerate() {
        if h.is_empty() {
            return Err(Error::data(format!(
                "{}: empty header in column {}",
                source.display(),
                i + 1
            )));
        }
        if headers[..i].contains(h) {
            return Err(Error::data(format!(
                "{}: duplicate column '{h}'",
                source.display()
            )));
        }
    }
    Ok(())
}

/// Parse one cell as a number.
///
/// Returns `Ok(None)` for missing markers. Boolean-like cells map to 1/0 so
/// QC flags can share the numeric path. Non-finite numbers are rejected.
pub fn parse_cell(cell: &str) -> std::result::Result<Option<f64>, String> {
    let lower = cell.trim().to_ascii_lowercase();
    if MISSING.contains(&lower.as_str()) {
        return Ok(None);
    }
    match lower.as_str() {
        "true" | "yes" => return Ok(Some(1.0)),
        "false" | "no" => return Ok(Some(0.0)),
        _ => {}
    }
    let v: f64 = lower
        .parse()
        .map_err(|_| format!("'{cell}' is not a number"))?;
    if v.is_finite() {
        Ok(Some(v))
    } else {
        Err(format!("'{cell}' is not finite"))
    }
}
