use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::{Connection, params_from_iter};
use std::path::Path;
use tracing::{debug, info, instrument};

use super::TableSink;
use crate::error::Result;
use crate::table::{Table, Value};

/// Writes tables into a DuckDB database file.
pub struct DuckDbSink {
    conn: Connection,
}

impl DuckDbSink {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Quotes an identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::Integer(i) => DuckValue::BigInt(*i),
        Value::Real(f) => DuckValue::Double(*f),
        Value::Timestamp(ts) => {
            DuckValue::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros())
        }
    }
}

impl TableSink for DuckDbSink {
    #[instrument(skip(self, table), fields(rows = table.len()))]
    fn replace_table(&mut self, name: &str, table: &Table) -> Result<()> {
        let ident = quote_ident(name);
        let columns = table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.kind.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {ident}; CREATE TABLE {ident} ({columns});"
        ))?;
        debug!(table = name, "Table recreated");

        if !table.is_empty() {
            let placeholders = vec!["?"; table.columns.len()].join(", ");
            let mut stmt = tx.prepare(&format!("INSERT INTO {ident} VALUES ({placeholders})"))?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(to_duck)))?;
            }
        }
        tx.commit()?;

        info!(table = name, rows = table.len(), "Table replaced");
        Ok(())
    }
}
