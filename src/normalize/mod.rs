//! Reshaping raw source files into location/timestamp/metric tables.
//!
//! One submodule per source. Each exposes a pure transformation over typed
//! records plus a loader that reads the raw files from the data directory.
//! Rows lost in joins or filters are counted in a [`NormalizeReport`].

pub mod incidents;
pub mod popularity;
pub mod readers;
pub mod ridership;
pub mod time;
pub mod utility;

use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::config::{DatasetFiles, DatasetKind};
use crate::error::Result;
use crate::table::Table;

/// Row accounting for one normalizer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub dataset: &'static str,
    pub rows_read: usize,
    pub rows_written: usize,
    /// Rows dropped per reason (join mismatch, missing value, ...).
    pub dropped: BTreeMap<&'static str, usize>,
}

impl NormalizeReport {
    pub fn new(dataset: &'static str) -> Self {
        Self {
            dataset,
            ..Self::default()
        }
    }

    pub fn drop_rows(&mut self, reason: &'static str, n: usize) {
        if n == 0 {
            return;
        }
        *self.dropped.entry(reason).or_default() += n;
    }

    pub fn dropped(&self, reason: &str) -> usize {
        self.dropped.get(reason).copied().unwrap_or(0)
    }

    pub fn log(&self) {
        info!(
            dataset = self.dataset,
            rows_read = self.rows_read,
            rows_written = self.rows_written,
            dropped = ?self.dropped,
            "Dataset normalized"
        );
    }
}

/// Runs the normalizer for `kind` over the files in `data_dir`.
pub fn normalize(
    kind: DatasetKind,
    files: &DatasetFiles,
    data_dir: &Path,
) -> Result<(Table, NormalizeReport)> {
    let (table, report) = match kind {
        DatasetKind::Ridership => {
            let (rows, report) = ridership::normalize_ridership(
                &data_dir.join(&files.trips),
                &data_dir.join(&files.stops),
            )?;
            (Table::from_records(&rows), report)
        }
        DatasetKind::Popularity => {
            let location_files = popularity::location_files(data_dir, &files.locations_prefix)?;
            popularity::normalize_popularity(&location_files, &data_dir.join(&files.measures))?
        }
        DatasetKind::Incidents => {
            let (rows, report) = incidents::normalize_incidents(&data_dir.join(&files.report))?;
            (Table::from_records(&rows), report)
        }
    };
    report.log();
    Ok((table, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_accumulate() {
        let mut report = NormalizeReport::new("test");
        report.drop_rows("unmatched", 2);
        report.drop_rows("unmatched", 3);
        assert_eq!(report.dropped("unmatched"), 5);
        assert_eq!(report.dropped("other"), 0);
    }

    #[test]
    fn test_incidents_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let files = DatasetFiles::default();
        std::fs::write(
            dir.path().join(&files.report),
            "Hoofdrubriek;Subrubriek;Lattitude;Longitude;AA_ADWH_DATUM_AFGEROND\n\
             Afval;Grofvuil;52.37;4.89;01-10-2017 09:30:00\n",
        )
        .unwrap();

        let (table, report) = normalize(DatasetKind::Incidents, &files, dir.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(report.rows_written, 1);
    }
}
