//! Run configuration.
//!
//! Everything the importer needs is read once at start-up into an
//! [`AppConfig`] and passed down by reference:
//!
//! * `auth.conf`, section `extern_dataservices`: object-store credentials
//! * `sources.conf`: one section per dataset naming its remote folder
//! * environment: the object-store password, the use-local flag and the sink
//!
//! ```ini
//! [gvb]
//! FOLDER_FTP = gvb
//! TABLE = gvb_hourly
//! ```

use configparser::ini::Ini;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::sink::SinkKind;

pub const AUTH_SECTION: &str = "extern_dataservices";
pub const PASSWORD_VAR: &str = "EXTERN_DATASERVICES_PASSWORD";
pub const USE_LOCAL_VAR: &str = "EXTERNAL_DATASERVICES_USE_LOCAL";

pub const DEFAULT_TRIPS_FILE: &str = "Ritten GVB 24jun2017-7okt2017.csv";
pub const DEFAULT_STOPS_FILE: &str = "Ortnr - coordinaten (ingangsdatum dec 2015) met LAT LONG.xlsx";
pub const DEFAULT_LOCATIONS_PREFIX: &str = "locations";
pub const DEFAULT_MEASURES_FILE: &str = "ams_google_data.csv";
pub const DEFAULT_REPORT_FILE: &str = "MORA_data_data.csv";
pub const DEFAULT_SINK_PATH: &str = "mobility.duckdb";

/// Which object-store protocol the credentials in `auth.conf` are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Swift,
    S3,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "swift" => Ok(Backend::Swift),
            "s3" => Ok(Backend::S3),
            other => Err(Error::config(format!("unknown object store backend '{other}'"))),
        }
    }
}

/// Object-store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: Backend,
    pub auth_version: String,
    pub auth_url: String,
    pub tenant_name: String,
    pub username: String,
    pub project_id: String,
    pub region: String,
    pub password: String,
    pub s3_endpoint: Option<String>,
}

/// The normalizer a dataset is fed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Ridership,
    Popularity,
    Incidents,
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ridership" | "gvb" => Ok(DatasetKind::Ridership),
            "popularity" | "google" => Ok(DatasetKind::Popularity),
            "incidents" | "mora" => Ok(DatasetKind::Incidents),
            other => Err(Error::config(format!("unknown dataset parser '{other}'"))),
        }
    }
}

/// Input file names for a dataset, relative to the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFiles {
    pub trips: String,
    pub stops: String,
    pub locations_prefix: String,
    pub measures: String,
    pub report: String,
}

impl Default for DatasetFiles {
    fn default() -> Self {
        Self {
            trips: DEFAULT_TRIPS_FILE.to_string(),
            stops: DEFAULT_STOPS_FILE.to_string(),
            locations_prefix: DEFAULT_LOCATIONS_PREFIX.to_string(),
            measures: DEFAULT_MEASURES_FILE.to_string(),
            report: DEFAULT_REPORT_FILE.to_string(),
        }
    }
}

/// One section of `sources.conf`.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub section: String,
    /// Remote container holding the raw files.
    pub folder: String,
    /// `None` when the section only exists to be downloaded.
    pub kind: Option<DatasetKind>,
    pub table: String,
    pub files: DatasetFiles,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub use_local: bool,
    /// Absent when `use_local` is set and no credentials were configured.
    pub store: Option<StoreConfig>,
    pub datasets: Vec<DatasetConfig>,
    pub sink: SinkConfig,
}

impl AppConfig {
    /// Reads both configuration files and the process environment.
    pub fn load(auth_path: &Path, sources_path: &Path) -> Result<Self> {
        let auth = std::fs::read_to_string(auth_path).map_err(|e| {
            Error::config(format!("cannot read {}: {e}", auth_path.display()))
        })?;
        let sources = std::fs::read_to_string(sources_path).map_err(|e| {
            Error::config(format!("cannot read {}: {e}", sources_path.display()))
        })?;
        Self::from_sources(&auth, &sources, |key| std::env::var(key).ok())
    }

    /// Builds the configuration from file contents and an environment lookup.
    pub fn from_sources(
        auth: &str,
        sources: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let use_local = env(USE_LOCAL_VAR).as_deref() == Some("TRUE");

        let store = match env(PASSWORD_VAR) {
            Some(password) => Some(parse_store(auth, password)?),
            None if use_local => None,
            None => {
                return Err(Error::config(format!(
                    "environment variable {PASSWORD_VAR} is not set"
                )));
            }
        };

        let datasets = parse_datasets(sources)?;

        let sink = SinkConfig {
            kind: env("SINK_KIND")
                .map(|k| k.parse::<SinkKind>())
                .transpose()?
                .unwrap_or(SinkKind::DuckDb),
            path: PathBuf::from(env("SINK_PATH").unwrap_or_else(|| DEFAULT_SINK_PATH.to_string())),
        };

        Ok(Self {
            use_local,
            store,
            datasets,
            sink,
        })
    }

    /// Remote container names of every configured dataset.
    pub fn dataset_folders(&self) -> std::collections::HashSet<String> {
        self.datasets.iter().map(|d| d.folder.clone()).collect()
    }
}

fn read_ini(text: &str, what: &str) -> Result<Ini> {
    let mut ini = Ini::new();
    ini.read(text.to_string())
        .map_err(|e| Error::config(format!("malformed {what}: {e}")))?;
    Ok(ini)
}

fn parse_store(auth: &str, password: String) -> Result<StoreConfig> {
    let ini = read_ini(auth, "auth.conf")?;
    let required = |key: &str| {
        ini.get(AUTH_SECTION, key)
            .ok_or_else(|| Error::config(format!("auth.conf: [{AUTH_SECTION}] {key} is missing")))
    };
    let optional = |key: &str| ini.get(AUTH_SECTION, key).unwrap_or_default();

    let backend = ini
        .get(AUTH_SECTION, "BACKEND")
        .map(|b| b.parse::<Backend>())
        .transpose()?
        .unwrap_or(Backend::Swift);

    let store = match backend {
        Backend::Swift => StoreConfig {
            backend,
            auth_version: optional("ST_AUTH_VERSION"),
            auth_url: required("OS_AUTH_URL")?,
            tenant_name: required("OS_TENANT_NAME")?,
            username: required("OS_USERNAME")?,
            project_id: required("OS_PROJECT_ID")?,
            region: required("OS_REGION_NAME")?,
            password,
            s3_endpoint: None,
        },
        // S3 reuses OS_USERNAME as access key and the password as secret key.
        Backend::S3 => StoreConfig {
            backend,
            auth_version: optional("ST_AUTH_VERSION"),
            auth_url: optional("OS_AUTH_URL"),
            tenant_name: optional("OS_TENANT_NAME"),
            username: optional("OS_USERNAME"),
            project_id: optional("OS_PROJECT_ID"),
            region: optional("OS_REGION_NAME"),
            password,
            s3_endpoint: ini.get(AUTH_SECTION, "S3_ENDPOINT_URL"),
        },
    };
    Ok(store)
}

fn parse_datasets(sources: &str) -> Result<Vec<DatasetConfig>> {
    let ini = read_ini(sources, "sources.conf")?;

    // configparser keeps sections in a hash map; sort them for a stable run order.
    let mut sections = ini.sections();
    sections.sort();

    let mut datasets = Vec::new();
    for section in sections {
        // configparser files keys outside any section under "default".
        if section == "default" && ini.get(&section, "FOLDER_FTP").is_none() {
            continue;
        }

        let folder = ini.get(&section, "FOLDER_FTP").ok_or_else(|| {
            Error::config(format!("sources.conf: [{section}] FOLDER_FTP is missing"))
        })?;

        let kind = match ini.get(&section, "PARSER") {
            Some(parser) => Some(parser.parse::<DatasetKind>()?),
            None => section.parse::<DatasetKind>().ok(),
        };

        let defaults = DatasetFiles::default();
        let file = |key: &str, default: String| ini.get(&section, key).unwrap_or(default);
        let files = DatasetFiles {
            trips: file("TRIPS_FILE", defaults.trips),
            stops: file("STOPS_FILE", defaults.stops),
            locations_prefix: file("LOCATIONS_PREFIX", defaults.locations_prefix),
            measures: file("MEASURES_FILE", defaults.measures),
            report: file("REPORT_FILE", defaults.report),
        };

        datasets.push(DatasetConfig {
            table: ini.get(&section, "TABLE").unwrap_or_else(|| section.clone()),
            section,
            folder,
            kind,
            files,
        });
    }

    Ok(datasets)
}
