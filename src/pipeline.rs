//! Normalize-and-persist stage of an import run.

use std::path::Path;
use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::error::Result;
use crate::normalize::{NormalizeReport, normalize};
use crate::sink::TableSink;

/// Normalizes every dataset that has a parser and replaces its table in `sink`.
///
/// Datasets are processed in section-name order, as [`AppConfig`] lists
/// them. The first failure aborts the run, so a table is either fully
/// rewritten or left untouched.
#[instrument(skip_all, fields(data_dir = %data_dir.display()))]
pub fn import_datasets(
    config: &AppConfig,
    data_dir: &Path,
    sink: &mut dyn TableSink,
) -> Result<Vec<NormalizeReport>> {
    let mut reports = Vec::new();
    for dataset in &config.datasets {
        let Some(kind) = dataset.kind else {
            info!(section = %dataset.section, "No parser configured, download only");
            continue;
        };
        let (table, report) = normalize(kind, &dataset.files, data_dir)?;
        sink.replace_table(&dataset.table, &table)?;
        reports.push(report);
    }
    Ok(reports)
}
