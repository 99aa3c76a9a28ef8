//! Municipal incident reports (MORA): category, position and completion time.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};

use super::NormalizeReport;
use super::readers::{self, CsvOptions};
use crate::error::{Error, Result};
use crate::table::{Column, ColumnKind, Record, Value};

/// Format of the completion timestamp, e.g. `21-08-2017 14:03:11`.
pub const COMPLETED_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

const REQUIRED_COLUMNS: [&str; 5] = [
    "Hoofdrubriek",
    "Subrubriek",
    "Lattitude",
    "Longitude",
    "AA_ADWH_DATUM_AFGEROND",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawIncident {
    #[serde(rename = "Hoofdrubriek")]
    pub category: String,
    #[serde(rename = "Subrubriek")]
    pub subcategory: String,
    #[serde(rename = "Lattitude", deserialize_with = "csv::invalid_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", deserialize_with = "csv::invalid_option")]
    pub longitude: Option<f64>,
    #[serde(rename = "AA_ADWH_DATUM_AFGEROND")]
    pub completed: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentObservation {
    pub category: String,
    pub subcategory: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Option<NaiveDateTime>,
}

impl Record for IncidentObservation {
    fn columns() -> Vec<Column> {
        vec![
            Column::new("category", ColumnKind::Text),
            Column::new("subcategory", ColumnKind::Text),
            Column::new("latitude", ColumnKind::Real),
            Column::new("longitude", ColumnKind::Real),
            Column::new("timestamp", ColumnKind::Timestamp),
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.category.clone()),
            Value::Text(self.subcategory.clone()),
            Value::Real(self.latitude),
            Value::Real(self.longitude),
            self.timestamp.into(),
        ]
    }
}

fn valid(coordinate: Option<f64>) -> Option<f64> {
    coordinate.filter(|c| !c.is_nan())
}

/// Parses a completion timestamp; an empty field is a missing value.
pub fn parse_completed(raw: &str) -> Result<Option<NaiveDateTime>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(raw, COMPLETED_FORMAT)
        .map(Some)
        .map_err(|_| Error::InvalidValue {
            field: "completion date",
            value: raw.to_string(),
        })
}

/// Keeps incidents that have both coordinates.
pub fn incidents_from_records(
    records: Vec<RawIncident>,
) -> Result<(Vec<IncidentObservation>, NormalizeReport)> {
    let mut report = NormalizeReport::new("incidents");
    report.rows_read = records.len();

    let mut observations = Vec::with_capacity(records.len());
    for record in records {
        let timestamp = parse_completed(&record.completed)?;
        let (Some(latitude), Some(longitude)) = (valid(record.latitude), valid(record.longitude))
        else {
            report.drop_rows("missing_coordinates", 1);
            continue;
        };
        observations.push(IncidentObservation {
            category: record.category,
            subcategory: record.subcategory,
            latitude,
            longitude,
            timestamp,
        });
    }

    report.rows_written = observations.len();
    Ok((observations, report))
}

/// Reads the semicolon-separated incident export.
pub fn load_incidents(path: &Path) -> Result<Vec<RawIncident>> {
    let mut rdr = readers::open_csv(path, CsvOptions::semicolon())?;
    let headers = rdr.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        readers::column_index(&headers, column, path)?;
    }
    let records = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<RawIncident>, _>>()?;
    debug!(path = %path.display(), incidents = records.len(), "Incidents loaded");
    Ok(records)
}

#[instrument(skip_all, fields(report = %report_path.display()))]
pub fn normalize_incidents(
    report_path: &Path,
) -> Result<(Vec<IncidentObservation>, NormalizeReport)> {
    incidents_from_records(load_incidents(report_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
MELDINGNUMMER;Hoofdrubriek;Subrubriek;Lattitude;Longitude;AA_ADWH_DATUM_AFGEROND
1;Afval;Grofvuil;52.37;4.89;21-08-2017 14:03:11
2;Openbare ruimte;Graffiti;NaN;12.3;21-08-2017 15:00:00
3;Afval;Container vol;52.36;;22-08-2017 08:00:00
4;Overlast;Geluid;52.35;4.90;
";

    fn write_report() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), REPORT).unwrap();
        file
    }

    #[test]
    fn test_rows_without_both_coordinates_are_excluded() {
        let file = write_report();

        let (rows, report) = normalize_incidents(file.path()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category, "Afval");
        assert_eq!(rows[0].subcategory, "Grofvuil");
        assert_eq!(rows[0].timestamp.unwrap().to_string(), "2017-08-21 14:03:11");
        assert_eq!(rows[1].timestamp, None);
        assert_eq!(report.rows_read, 4);
        assert_eq!(report.dropped("missing_coordinates"), 2);
    }

    #[test]
    fn test_nan_latitude_with_valid_longitude_is_dropped() {
        let record = RawIncident {
            category: "a".into(),
            subcategory: "b".into(),
            latitude: Some(f64::NAN),
            longitude: Some(12.3),
            completed: String::new(),
        };
        let kept = RawIncident {
            latitude: Some(52.0),
            ..record.clone()
        };

        let (rows, _) = incidents_from_records(vec![record, kept]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].latitude, 52.0);
    }

    #[test]
    fn test_malformed_completion_date_fails() {
        assert!(parse_completed("2017-08-21 14:03:11").is_err());
        assert_eq!(parse_completed(" ").unwrap(), None);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "Hoofdrubriek;Subrubriek\nAfval;Grofvuil\n").unwrap();
        let err = load_incidents(file.path()).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "Lattitude"));
    }
}
