//! Foot-traffic popularity samples joined onto scraped place locations.
//!
//! The place files and the measure file carry open-ended column sets, so
//! this normalizer works on string tables and types each output column once
//! the join is done: a column whose non-empty values all parse as numbers
//! becomes `Real`, anything else `Text`.

use chrono::{DateTime, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::NormalizeReport;
use super::readers::{self, CsvOptions};
use crate::error::{Error, Result};
use crate::table::{Column, ColumnKind, Table, Value};

/// Columns of the measure file that are scraper bookkeeping.
pub const MEASURE_BOOKKEEPING: [&str; 7] = [
    "batch",
    "batch_time",
    "search_term",
    "name",
    "place_id",
    "rating",
    "popular_times",
];

const ADDRESS: &str = "address";
const LATITUDE: &str = "lat";
const SOURCE_LONGITUDE: &str = "lng";
const LONGITUDE: &str = "lon";
const SEARCH_TERM: &str = "search_term";
const SCRAPE_TIME: &str = "scrape_time";

/// Header of the index column left behind by a dataframe export.
fn is_index_artifact(header: &str) -> bool {
    let header = header.trim();
    header.is_empty() || header.starts_with("Unnamed:")
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    /// Address with commas replaced by spaces, the join key.
    pub address: String,
    /// Aligned with [`PlaceTable::columns`].
    pub values: Vec<String>,
}

/// All location files concatenated. Columns missing from a file are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceTable {
    pub columns: Vec<String>,
    pub places: Vec<PlaceRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRecord {
    /// The search term minus its leading token, `None` when it has no
    /// double-space separator.
    pub address: Option<String>,
    pub scrape_time: Option<NaiveDateTime>,
    /// Aligned with [`MeasureTable::columns`].
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureTable {
    pub columns: Vec<String>,
    pub measures: Vec<MeasureRecord>,
}

/// Normalizes an address for joining: commas become spaces.
pub fn normalize_address(address: &str) -> String {
    address.replace(',', " ")
}

/// Splits `"<token>  <address>"` on the first double space and keeps the
/// address part.
pub fn search_term_address(search_term: &str) -> Option<&str> {
    search_term.split_once("  ").map(|(_, address)| address)
}

/// Parses a scrape timestamp; empty input is a missing value.
pub fn parse_scrape_time(raw: &str) -> Result<Option<NaiveDateTime>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%d-%m-%Y %H:%M:%S",
    ];
    if let Some(ts) = FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
    {
        return Ok(Some(ts));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.naive_utc()))
        .map_err(|_| Error::InvalidValue {
            field: SCRAPE_TIME,
            value: raw.to_string(),
        })
}

/// Location files in `data_dir` whose name starts with `prefix`, by name.
pub fn location_files(data_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(Error::parse(
            data_dir,
            format!("no location files starting with '{prefix}'"),
        ));
    }
    Ok(files)
}

/// Concatenates semicolon-separated location files.
pub fn load_places(files: &[PathBuf]) -> Result<PlaceTable> {
    let mut table = PlaceTable::default();

    for path in files {
        let mut rdr = readers::open_csv(path, CsvOptions::semicolon())?;
        let headers = rdr.headers()?.clone();
        let address_col = readers::column_index(&headers, ADDRESS, path)?;

        // Map each kept header onto its position in the union of columns.
        let mut mapping = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            let header = header.trim();
            if idx == address_col || is_index_artifact(header) {
                continue;
            }
            let slot = match table.columns.iter().position(|c| c == header) {
                Some(slot) => slot,
                None => {
                    table.columns.push(header.to_string());
                    for place in &mut table.places {
                        place.values.push(String::new());
                    }
                    table.columns.len() - 1
                }
            };
            mapping.push((idx, slot));
        }

        let before = table.places.len();
        for record in rdr.records() {
            let record = record?;
            let mut values = vec![String::new(); table.columns.len()];
            for &(idx, slot) in &mapping {
                values[slot] = record.get(idx).unwrap_or_default().to_string();
            }
            table.places.push(PlaceRecord {
                address: normalize_address(record.get(address_col).unwrap_or_default()),
                values,
            });
        }
        debug!(
            path = %path.display(),
            places = table.places.len() - before,
            "Location file loaded"
        );
    }

    for required in [LATITUDE, SOURCE_LONGITUDE] {
        if !table.columns.iter().any(|c| c == required) {
            return Err(Error::MissingColumn {
                path: files.first().cloned().unwrap_or_default(),
                column: required.to_string(),
            });
        }
    }
    Ok(table)
}

/// Reads the Windows-1252 encoded measure file.
pub fn load_measures(path: &Path) -> Result<MeasureTable> {
    let options = CsvOptions {
        encoding: Some(encoding_rs::WINDOWS_1252),
        ..CsvOptions::default()
    };
    let mut rdr = readers::open_csv(path, options)?;
    let headers = rdr.headers()?.clone();
    let term_col = readers::column_index(&headers, SEARCH_TERM, path)?;
    let time_col = readers::column_index(&headers, SCRAPE_TIME, path)?;

    let kept: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| (idx, h.trim().to_string()))
        .filter(|(idx, h)| {
            *idx != time_col && !is_index_artifact(h) && !MEASURE_BOOKKEEPING.contains(&h.as_str())
        })
        .collect();

    let mut table = MeasureTable {
        columns: kept.iter().map(|(_, h)| h.clone()).collect(),
        measures: Vec::new(),
    };
    for record in rdr.records() {
        let record = record?;
        let term = record.get(term_col).unwrap_or_default();
        table.measures.push(MeasureRecord {
            address: search_term_address(term).map(str::to_string),
            scrape_time: parse_scrape_time(record.get(time_col).unwrap_or_default())?,
            values: kept
                .iter()
                .map(|(idx, _)| record.get(*idx).unwrap_or_default().to_string())
                .collect(),
        });
    }
    debug!(path = %path.display(), measures = table.measures.len(), "Measures loaded");
    Ok(table)
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut values = values.map(str::trim).filter(|v| !v.is_empty()).peekable();
    if values.peek().is_none() {
        return ColumnKind::Text;
    }
    if values.all(|v| v.parse::<f64>().is_ok()) {
        ColumnKind::Real
    } else {
        ColumnKind::Text
    }
}

fn typed_value(kind: ColumnKind, raw: &str) -> Value {
    match kind {
        ColumnKind::Real => readers::parse_f64(raw).into(),
        _ if raw.trim().is_empty() => Value::Null,
        _ => Value::Text(raw.to_string()),
    }
}

/// Inner-joins measures to places on the normalized address.
pub fn popularity_from_tables(
    places: &PlaceTable,
    measures: &MeasureTable,
) -> (Table, NormalizeReport) {
    let mut report = NormalizeReport::new("popularity");
    report.rows_read = measures.measures.len();

    let mut by_address: HashMap<&str, Vec<&PlaceRecord>> = HashMap::new();
    for place in &places.places {
        by_address.entry(place.address.as_str()).or_default().push(place);
    }

    let mut joined: Vec<(&MeasureRecord, &PlaceRecord)> = Vec::new();
    for measure in &measures.measures {
        let matches = measure
            .address
            .as_deref()
            .and_then(|address| by_address.get(address));
        match matches {
            Some(found) => joined.extend(found.iter().map(|place| (measure, *place))),
            None => report.drop_rows("unmatched_address", 1),
        }
    }

    let mut columns = Vec::new();
    let mut cells: Vec<Vec<Value>> = vec![Vec::new(); joined.len()];

    for (col, name) in measures.columns.iter().enumerate() {
        let kind = infer_kind(joined.iter().map(|(m, _)| m.values[col].as_str()));
        columns.push(Column::new(name.clone(), kind));
        for (row, (measure, _)) in cells.iter_mut().zip(&joined) {
            row.push(typed_value(kind, &measure.values[col]));
        }
    }

    columns.push(Column::new(SCRAPE_TIME, ColumnKind::Timestamp));
    for (row, (measure, _)) in cells.iter_mut().zip(&joined) {
        row.push(measure.scrape_time.into());
    }

    columns.push(Column::new(ADDRESS, ColumnKind::Text));
    for (row, (_, place)) in cells.iter_mut().zip(&joined) {
        row.push(Value::Text(place.address.clone()));
    }

    for (col, name) in places.columns.iter().enumerate() {
        let kind = match name.as_str() {
            LATITUDE | SOURCE_LONGITUDE => ColumnKind::Real,
            _ => infer_kind(joined.iter().map(|(_, p)| p.values[col].as_str())),
        };
        let mut out_name = if name == SOURCE_LONGITUDE {
            LONGITUDE.to_string()
        } else {
            name.clone()
        };
        if columns.iter().any(|c| c.name == out_name) {
            out_name.push_str("_location");
        }
        columns.push(Column::new(out_name, kind));
        for (row, (_, place)) in cells.iter_mut().zip(&joined) {
            row.push(typed_value(kind, &place.values[col]));
        }
    }

    report.rows_written = cells.len();
    (
        Table {
            columns,
            rows: cells,
        },
        report,
    )
}

/// Loads location and measure files and joins them.
#[instrument(
    skip_all,
    fields(location_files = location_files.len(), measures = %measures_path.display())
)]
pub fn normalize_popularity(
    location_files: &[PathBuf],
    measures_path: &Path,
) -> Result<(Table, NormalizeReport)> {
    let places = load_places(location_files)?;
    let measures = load_measures(measures_path)?;
    Ok(popularity_from_tables(&places, &measures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const PLACES: &str = "\
;address;name;lat;lng;types
0;Dam 1, Amsterdam;De Bijenkorf;52.373;4.893;store
1;Spui 10, Amsterdam;Boekhandel;52.368;4.889;store
";

    fn measures_csv() -> Vec<u8> {
        let mut bytes = b"batch,batch_time,search_term,name,place_id,rating,popular_times,current_popularity,scrape_time\n".to_vec();
        bytes.extend_from_slice(b"1,t,De Bijenkorf  Dam 1  Amsterdam,De Bijenkorf,p1,4.5,[],61,2017-10-02 13:05:00\n");
        bytes.extend_from_slice(b"1,t,Caf\xe9  Nowhere 3,Caf\xe9,p2,4.0,[],12,2017-10-02 13:06:00\n");
        bytes.extend_from_slice(b"1,t,NoSeparator,x,p3,3.0,[],,2017-10-02 13:07:00\n");
        bytes
    }

    fn write_inputs(dir: &Path) -> (Vec<PathBuf>, PathBuf) {
        std::fs::write(dir.join("locations_1.csv"), PLACES).unwrap();
        std::fs::write(
            dir.join("locations_2.csv"),
            ";address;lat;lng\n0;Nowhere 4;52.0;4.0\n",
        )
        .unwrap();
        std::fs::write(dir.join("ams_google_data.csv"), measures_csv()).unwrap();
        (
            location_files(dir, "locations").unwrap(),
            dir.join("ams_google_data.csv"),
        )
    }

    #[test]
    fn test_search_term_split() {
        assert_eq!(search_term_address("Bijenkorf  Dam 1  Amsterdam"), Some("Dam 1  Amsterdam"));
        assert_eq!(search_term_address("Bijenkorf Dam 1"), None);
        assert_eq!(normalize_address("Dam 1, Amsterdam"), "Dam 1  Amsterdam");
    }

    #[test]
    fn test_scrape_time_formats() {
        let expected = NaiveDate::from_ymd_opt(2017, 10, 2)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        assert_eq!(parse_scrape_time("2017-10-02 13:05:00").unwrap(), Some(expected));
        assert_eq!(parse_scrape_time("2017-10-02T13:05:00").unwrap(), Some(expected));
        assert_eq!(parse_scrape_time("2017-10-02T13:05:00+00:00").unwrap(), Some(expected));
        assert_eq!(parse_scrape_time("").unwrap(), None);
        assert!(parse_scrape_time("yesterday").is_err());
    }

    #[test]
    fn test_places_concatenate_and_drop_index() {
        let dir = tempfile::tempdir().unwrap();
        let (files, _) = write_inputs(dir.path());

        let places = load_places(&files).unwrap();
        assert_eq!(places.columns, vec!["name", "lat", "lng", "types"]);
        assert_eq!(places.places.len(), 3);
        assert_eq!(places.places[0].address, "Dam 1  Amsterdam");
        assert_eq!(places.places[2].values, vec!["", "52.0", "4.0", ""]);
    }

    #[test]
    fn test_measures_drop_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let (_, measures_path) = write_inputs(dir.path());

        let measures = load_measures(&measures_path).unwrap();
        assert_eq!(measures.columns, vec!["current_popularity"]);
        assert_eq!(measures.measures.len(), 3);
        assert_eq!(measures.measures[1].address.as_deref(), Some("Nowhere 3"));
        assert_eq!(measures.measures[2].address, None);
    }

    #[test]
    fn test_join_on_normalized_address() {
        let dir = tempfile::tempdir().unwrap();
        let (files, measures_path) = write_inputs(dir.path());

        let (table, report) = normalize_popularity(&files, &measures_path).unwrap();

        assert_eq!(
            table.column_names(),
            vec!["current_popularity", "scrape_time", "address", "name", "lat", "lon", "types"]
        );
        assert_eq!(table.len(), 1);
        assert_eq!(report.dropped("unmatched_address"), 2);

        let row = &table.rows[0];
        assert_eq!(row[0], Value::Real(61.0));
        assert_eq!(row[2], Value::Text("Dam 1  Amsterdam".into()));
        assert_eq!(row[3], Value::Text("De Bijenkorf".into()));
        assert_eq!(row[5], Value::Real(4.893));
        assert_eq!(table.columns[0].kind, ColumnKind::Real);
        assert_eq!(table.columns[6].kind, ColumnKind::Text);
    }

    #[test]
    fn test_missing_location_files_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(location_files(dir.path(), "locations").is_err());
    }
}
