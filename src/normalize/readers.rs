//! Loading raw input files: delimited text in a given encoding, and Excel.

use calamine::{Data, Range, Reader, open_workbook_auto};
use csv::{ReaderBuilder, StringRecord, Trim};
use encoding_rs::Encoding;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// How a delimited file is laid out on disk.
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Lines dropped before the header (or first record).
    pub skip_lines: usize,
    pub has_headers: bool,
    pub trim: bool,
    /// `None` reads the file as UTF-8.
    pub encoding: Option<&'static Encoding>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_lines: 0,
            has_headers: true,
            trim: false,
            encoding: None,
        }
    }
}

impl CsvOptions {
    pub fn semicolon() -> Self {
        Self {
            delimiter: b';',
            ..Self::default()
        }
    }
}

/// Reads `path` into a string, decoding from `encoding` when given.
pub fn read_text(path: &Path, encoding: Option<&'static Encoding>) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match encoding {
        None => String::from_utf8(bytes)
            .map_err(|e| Error::parse(path, format!("not valid UTF-8: {e}"))),
        Some(encoding) => {
            let (text, used, had_errors) = encoding.decode(&bytes);
            if had_errors {
                debug!(
                    path = %path.display(),
                    encoding = used.name(),
                    "Replaced undecodable bytes"
                );
            }
            Ok(text.into_owned())
        }
    }
}

fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest
}

/// Opens a CSV reader over an already decoded text, taking ownership of its
/// buffer and starting after the skipped lines.
pub fn csv_from_text(text: String, options: CsvOptions) -> csv::Reader<Cursor<Vec<u8>>> {
    let offset = text.len() - skip_lines(&text, options.skip_lines).len();
    let mut body = Cursor::new(text.into_bytes());
    body.set_position(offset as u64);
    ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.has_headers)
        .trim(if options.trim { Trim::All } else { Trim::None })
        .flexible(true)
        .from_reader(body)
}

/// Opens a CSV reader over `path`.
pub fn open_csv(path: &Path, options: CsvOptions) -> Result<csv::Reader<Cursor<Vec<u8>>>> {
    let text = read_text(path, options.encoding)?;
    debug!(path = %path.display(), bytes = text.len(), "Opened delimited file");
    Ok(csv_from_text(text, options))
}

/// Position of `column` in a header row.
pub fn column_index(headers: &StringRecord, column: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| Error::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

/// Reads the first worksheet of an Excel workbook.
pub fn read_first_sheet(path: &Path) -> Result<Range<Data>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::parse(path, "workbook has no sheets"))?;
    debug!(path = %path.display(), sheet = %sheet, "Reading worksheet");
    Ok(workbook.worksheet_range(&sheet)?)
}

pub fn cell_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

pub fn cell_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => parse_f64(s),
        _ => None,
    }
}

pub fn cell_i64(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(i) => Some(*i),
        Data::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses a numeric field; empty fields and `NaN` are missing values.
pub fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}
