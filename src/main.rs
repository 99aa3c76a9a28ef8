//! CLI entry point for the mobility importer.
//!
//! Mirrors the configured dataset containers from the object store into a
//! data directory, then normalizes each dataset and replaces its table in
//! the configured sink.

mod infra;

use anyhow::{Context, Result};
use clap::Parser;
use mobility_importer::config::{AppConfig, Backend, StoreConfig};
use mobility_importer::fetch::{FetchReport, ObjectStore, download_containers};
use mobility_importer::pipeline::import_datasets;
use mobility_importer::sink::open_sink;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::infra::{s3::S3Store, swift::SwiftStore};

#[derive(Parser)]
#[command(name = "mobility_importer")]
#[command(about = "Imports external mobility datasets into a relational store", long_about = None)]
struct Cli {
    /// Local data directory; must be empty (or hold only a README) unless
    /// EXTERNAL_DATASERVICES_USE_LOCAL=TRUE
    #[arg(value_name = "DATA_DIR")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/mobility_importer.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("mobility_importer.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let auth_path = env_path("AUTH_CONFIG", "auth.conf");
    let sources_path = env_path("SOURCES_CONFIG", "sources.conf");
    let config = AppConfig::load(&auth_path, &sources_path).with_context(|| {
        format!(
            "Failed to load configuration from {} and {}",
            auth_path.display(),
            sources_path.display()
        )
    })?;
    info!(
        datasets = config.datasets.len(),
        use_local = config.use_local,
        "Configuration loaded"
    );

    if config.use_local {
        warn!(data_dir = %cli.data_dir.display(), "Using local data, skipping download");
    } else {
        let store_config = config
            .store
            .as_ref()
            .context("Object-store credentials missing")?;
        let report = fetch(store_config, &config, &cli.data_dir).await?;
        info!(?report, "Fetch finished");
    }

    let mut sink = open_sink(&config.sink).context("Failed to open sink")?;
    let reports = import_datasets(&config, &cli.data_dir, sink.as_mut())
        .context("Failed to import datasets")?;

    info!(
        tables = reports.len(),
        rows = reports.iter().map(|r| r.rows_written).sum::<usize>(),
        "Import complete"
    );
    Ok(())
}

fn env_path(var: &str, default: &str) -> PathBuf {
    PathBuf::from(std::env::var(var).unwrap_or_else(|_| default.to_string()))
}

async fn fetch(
    store_config: &StoreConfig,
    config: &AppConfig,
    data_dir: &Path,
) -> Result<FetchReport> {
    let store: Box<dyn ObjectStore> = match store_config.backend {
        Backend::Swift => Box::new(
            SwiftStore::connect(store_config)
                .await
                .context("Failed to connect to Swift")?,
        ),
        Backend::S3 => Box::new(S3Store::new(store_config)),
    };

    download_containers(store.as_ref(), &config.dataset_folders(), data_dir)
        .await
        .with_context(|| format!("Failed to download into {}", data_dir.display()))
}
