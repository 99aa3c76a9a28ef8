//! Export of normalized tables as one CSV file per table.

use csv::WriterBuilder;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::TableSink;
use crate::error::Result;
use crate::table::Table;

/// Writes `<dir>/<name>.csv`, replacing any previous export of that table.
///
/// Rows go to a temporary file in the same directory that is renamed over
/// the export once complete; a failed write leaves the old export in place.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }
}

impl TableSink for CsvSink {
    fn replace_table(&mut self, name: &str, table: &Table) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.table_path(name);
        debug!(path = %path.display(), "Rewriting CSV export");

        let staging = NamedTempFile::new_in(&self.dir)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(staging);
        writer.write_record(table.column_names())?;
        for row in &table.rows {
            writer.serialize(row)?;
        }
        let staging = writer.into_inner().map_err(|e| e.into_error())?;
        staging.persist(&path).map_err(|e| e.error)?;

        info!(table = name, rows = table.len(), "Table replaced");
        Ok(())
    }
}
