//! Transit ridership: trips between stop pairs per weekday and time slot,
//! reshaped into inbound/outbound counts per stop and hour.
//!
//! Stages: [`RawTrip`] + [`RawStop`] → [`JoinedTrip`] → [`HourlyAggregate`]
//! → [`RidershipObservation`].
//!
//! Only stop-hours that occur both as a destination and as an origin survive
//! the inbound/outbound join. A stop-hour seen on one side only is dropped
//! and counted under `inbound_only` / `outbound_only`.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, instrument};

use super::NormalizeReport;
use super::readers::{self, CsvOptions};
use super::time::{fix_times, reference_timestamp, slot_hour, weekday_number};
use super::utility::mean;
use crate::error::{Error, Result};
use crate::table::{Column, ColumnKind, Record, Value};

/// Stop name used for unassigned stop numbers.
pub const EMPTY_STOP_NAME: &str = "-- Leeg beeld --";

/// Preamble lines above the trip records.
const TRIP_PREAMBLE_LINES: usize = 2;

/// One line of the trip log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTrip {
    pub weekday: String,
    pub time_slot: String,
    pub origin_id: i64,
    /// Not used; the name comes from the stop table.
    pub origin_name: String,
    pub destination_id: i64,
    pub trip_count: i64,
}

/// One row of the stop-number table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawStop {
    #[serde(rename = "OrtNr")]
    pub id: i64,
    #[serde(rename = "haltenaam")]
    pub name: String,
    #[serde(rename = "LAT", deserialize_with = "csv::invalid_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "LONG", deserialize_with = "csv::invalid_option")]
    pub longitude: Option<f64>,
}

/// A trip with both ends resolved to stop names.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTrip {
    pub weekday: String,
    pub hour: u32,
    pub origin: String,
    pub destination: String,
    pub trip_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlyAggregate {
    pub location_name: String,
    pub weekday: String,
    pub hour: u32,
    pub inbound_count: i64,
    pub outbound_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RidershipObservation {
    pub location_name: String,
    pub timestamp: NaiveDateTime,
    pub inbound_count: i64,
    pub outbound_count: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Record for RidershipObservation {
    fn columns() -> Vec<Column> {
        vec![
            Column::new("location_name", ColumnKind::Text),
            Column::new("timestamp", ColumnKind::Timestamp),
            Column::new("inbound_count", ColumnKind::Integer),
            Column::new("outbound_count", ColumnKind::Integer),
            Column::new("latitude", ColumnKind::Real),
            Column::new("longitude", ColumnKind::Real),
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.location_name.clone()),
            Value::Timestamp(self.timestamp),
            Value::Integer(self.inbound_count),
            Value::Integer(self.outbound_count),
            self.latitude.into(),
            self.longitude.into(),
        ]
    }
}

type HourKey = (String, String, u32);

/// Inner-joins trips to stops on both ends. Several stops sharing a number
/// each produce a joined trip.
pub fn join_trips(
    trips: &[RawTrip],
    stops: &[RawStop],
    report: &mut NormalizeReport,
) -> Result<Vec<JoinedTrip>> {
    let mut by_id: HashMap<i64, Vec<&str>> = HashMap::new();
    for stop in stops.iter().filter(|s| s.name != EMPTY_STOP_NAME) {
        by_id.entry(stop.id).or_default().push(&stop.name);
    }

    let mut joined = Vec::with_capacity(trips.len());
    for trip in trips {
        let Some(origins) = by_id.get(&trip.origin_id) else {
            report.drop_rows("unmatched_origin", 1);
            continue;
        };
        let Some(destinations) = by_id.get(&trip.destination_id) else {
            report.drop_rows("unmatched_destination", 1);
            continue;
        };
        let hour = slot_hour(&trip.time_slot)?;

        for origin in origins {
            for destination in destinations {
                joined.push(JoinedTrip {
                    weekday: trip.weekday.trim().to_string(),
                    hour,
                    origin: origin.to_string(),
                    destination: destination.to_string(),
                    trip_count: trip.trip_count,
                });
            }
        }
    }
    Ok(joined)
}

/// Sums inbound and outbound trips per stop, weekday and hour, keeping only
/// keys present on both sides.
pub fn aggregate_hourly(
    joined: &[JoinedTrip],
    report: &mut NormalizeReport,
) -> Vec<HourlyAggregate> {
    let mut inbound: BTreeMap<HourKey, i64> = BTreeMap::new();
    let mut outbound: BTreeMap<HourKey, i64> = BTreeMap::new();

    for trip in joined {
        *inbound
            .entry((trip.destination.clone(), trip.weekday.clone(), trip.hour))
            .or_default() += trip.trip_count;
        *outbound
            .entry((trip.origin.clone(), trip.weekday.clone(), trip.hour))
            .or_default() += trip.trip_count;
    }

    let outbound_only = outbound.keys().filter(|k| !inbound.contains_key(*k)).count();
    report.drop_rows("outbound_only", outbound_only);

    let mut hourly = Vec::with_capacity(inbound.len());
    for ((location_name, weekday, hour), inbound_count) in inbound {
        match outbound.get(&(location_name.clone(), weekday.clone(), hour)) {
            Some(&outbound_count) => hourly.push(HourlyAggregate {
                location_name,
                weekday,
                hour,
                inbound_count,
                outbound_count,
            }),
            None => report.drop_rows("inbound_only", 1),
        }
    }
    hourly
}

/// Mean coordinates per stop name, excluding the empty-stop placeholder.
pub fn mean_locations(stops: &[RawStop]) -> HashMap<String, (Option<f64>, Option<f64>)> {
    let mut grouped: HashMap<&str, Vec<&RawStop>> = HashMap::new();
    for stop in stops.iter().filter(|s| s.name != EMPTY_STOP_NAME) {
        grouped.entry(&stop.name).or_default().push(stop);
    }
    grouped
        .into_iter()
        .map(|(name, group)| {
            let lat = mean(group.iter().map(|s| s.latitude));
            let lon = mean(group.iter().map(|s| s.longitude));
            (name.to_string(), (lat, lon))
        })
        .collect()
}

/// The full ridership transformation over already loaded records.
pub fn ridership_from_records(
    trips: &[RawTrip],
    stops: &[RawStop],
) -> Result<(Vec<RidershipObservation>, NormalizeReport)> {
    let mut report = NormalizeReport::new("ridership");
    report.rows_read = trips.len();

    let joined = join_trips(trips, stops, &mut report)?;
    let hourly = aggregate_hourly(&joined, &mut report);
    let locations = mean_locations(stops);

    let mut observations = Vec::with_capacity(hourly.len());
    for agg in hourly {
        let day = weekday_number(&agg.weekday)?;
        let (hour, day) = fix_times(agg.hour, day);
        let timestamp = reference_timestamp(day, hour)?;

        let Some(&(latitude, longitude)) = locations.get(&agg.location_name) else {
            report.drop_rows("missing_location", 1);
            continue;
        };

        observations.push(RidershipObservation {
            location_name: agg.location_name,
            timestamp,
            inbound_count: agg.inbound_count,
            outbound_count: agg.outbound_count,
            latitude,
            longitude,
        });
    }

    observations.sort_by(|a, b| {
        a.location_name
            .cmp(&b.location_name)
            .then(a.timestamp.cmp(&b.timestamp))
    });
    report.rows_written = observations.len();
    Ok((observations, report))
}

/// Reads the headerless trip log.
pub fn load_trips(path: &Path) -> Result<Vec<RawTrip>> {
    let options = CsvOptions {
        skip_lines: TRIP_PREAMBLE_LINES,
        has_headers: false,
        trim: true,
        ..CsvOptions::default()
    };
    let mut rdr = readers::open_csv(path, options)?;
    let trips = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<RawTrip>, _>>()?;
    debug!(path = %path.display(), trips = trips.len(), "Trips loaded");
    Ok(trips)
}

/// Reads the stop table from an Excel workbook, or from a CSV export of it.
pub fn load_stops(path: &Path) -> Result<Vec<RawStop>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    let stops = if is_csv {
        let options = CsvOptions {
            trim: true,
            ..CsvOptions::default()
        };
        let mut rdr = readers::open_csv(path, options)?;
        rdr.deserialize()
            .collect::<std::result::Result<Vec<RawStop>, _>>()?
    } else {
        load_stops_workbook(path)?
    };
    debug!(path = %path.display(), stops = stops.len(), "Stops loaded");
    Ok(stops)
}

fn load_stops_workbook(path: &Path) -> Result<Vec<RawStop>> {
    let range = readers::read_first_sheet(path)?;
    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .ok_or_else(|| Error::parse(path, "worksheet is empty"))?
        .iter()
        .map(readers::cell_string)
        .collect();
    let header = csv::StringRecord::from(header);

    let id_col = readers::column_index(&header, "OrtNr", path)?;
    let name_col = readers::column_index(&header, "haltenaam", path)?;
    let lat_col = readers::column_index(&header, "LAT", path)?;
    let lon_col = readers::column_index(&header, "LONG", path)?;

    static EMPTY: calamine::Data = calamine::Data::Empty;

    let mut stops = Vec::new();
    for (line, row) in rows.enumerate() {
        let cell = |idx: usize| row.get(idx).unwrap_or(&EMPTY);
        // Trailing blank rows carry no stop number.
        if matches!(cell(id_col), calamine::Data::Empty) {
            continue;
        }
        let id = readers::cell_i64(cell(id_col)).ok_or_else(|| {
            Error::parse(path, format!("row {}: invalid OrtNr {}", line + 2, cell(id_col)))
        })?;
        stops.push(RawStop {
            id,
            name: readers::cell_string(cell(name_col)),
            latitude: readers::cell_f64(cell(lat_col)),
            longitude: readers::cell_f64(cell(lon_col)),
        });
    }
    Ok(stops)
}

/// Loads both inputs and runs [`ridership_from_records`].
#[instrument(skip_all, fields(trips = %trips_path.display(), stops = %stops_path.display()))]
pub fn normalize_ridership(
    trips_path: &Path,
    stops_path: &Path,
) -> Result<(Vec<RidershipObservation>, NormalizeReport)> {
    let trips = load_trips(trips_path)?;
    let stops = load_stops(stops_path)?;
    ridership_from_records(&trips, &stops)
}
