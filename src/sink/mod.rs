//! Persistence of normalized tables.
//!
//! Every write is a full replacement: the named relation is dropped and
//! recreated with the table's schema, never appended to or upserted.

mod csv;
mod duckdb;

pub use self::csv::CsvSink;
pub use self::duckdb::DuckDbSink;

use std::str::FromStr;
use tracing::info;

use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    DuckDb,
    Csv,
}

impl FromStr for SinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" => Ok(SinkKind::DuckDb),
            "csv" => Ok(SinkKind::Csv),
            other => Err(Error::config(format!("unknown sink kind '{other}'"))),
        }
    }
}

/// A relational destination for normalized tables.
pub trait TableSink {
    /// Drops `name` if it exists and recreates it holding exactly `table`.
    fn replace_table(&mut self, name: &str, table: &Table) -> Result<()>;
}

/// Opens the sink described by `config`.
pub fn open_sink(config: &SinkConfig) -> Result<Box<dyn TableSink>> {
    info!(kind = ?config.kind, path = %config.path.display(), "Opening sink");
    Ok(match config.kind {
        SinkKind::DuckDb => Box::new(DuckDbSink::open(&config.path)?),
        SinkKind::Csv => Box::new(CsvSink::new(&config.path)),
    })
}
