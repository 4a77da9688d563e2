// bom_collector - Bureau of Meteorology observation collector for InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Translation of raw Bureau observations into time series points.
//!
//! Every point produced has the same set of field keys. A value that wasn't reported
//! is kept as `None` rather than left out or replaced with a sentinel, so that "no
//! reading" stays distinct from a reading of zero.

use crate::client::{Header, RawObservation};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use std::collections::BTreeMap;
use std::error;
use std::fmt;

pub const MEASUREMENT: &str = "weather-data";

/// Format of the `aifstime_utc` field, always UTC
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;

pub const TAG_SOURCE: &str = "source";
pub const TAG_ID: &str = "ID";
pub const TAG_MAIN_ID: &str = "main_ID";
pub const SOURCE: &str = "Bureau of Meteorology";

pub const FIELD_AIR_TEMP: &str = "air_temp";
pub const FIELD_APPARENT_TEMP: &str = "apparent_t";
pub const FIELD_DELTA_T: &str = "delta_t";
pub const FIELD_RELATIVE_HUMIDITY: &str = "rel_hum";
pub const FIELD_RAIN_TRACE: &str = "rain_trace";
pub const FIELD_PRESSURE: &str = "press";
pub const FIELD_PRESSURE_MSL: &str = "press_msl";
pub const FIELD_PRESSURE_QNH: &str = "press_qnh";
pub const FIELD_WIND_DIRECTION: &str = "wind_dir";
pub const FIELD_WIND_SPEED_KMH: &str = "wind_spd_kmh";
pub const FIELD_GUST_KMH: &str = "gust_kmh";
pub const FIELD_DEW_POINT: &str = "dewpt";

/// Every field key written for each point, in no particular order
pub const FIELD_KEYS: [&str; 12] = [
    FIELD_AIR_TEMP,
    FIELD_APPARENT_TEMP,
    FIELD_DELTA_T,
    FIELD_RELATIVE_HUMIDITY,
    FIELD_RAIN_TRACE,
    FIELD_PRESSURE,
    FIELD_PRESSURE_MSL,
    FIELD_PRESSURE_QNH,
    FIELD_WIND_DIRECTION,
    FIELD_WIND_SPEED_KMH,
    FIELD_GUST_KMH,
    FIELD_DEW_POINT,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    Timestamp(String),
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(v) => write!(f, "invalid observation timestamp {:?}, expected YYYYMMDDHHMMSS", v),
        }
    }
}

impl error::Error for TranslateError {}

/// Value of a single field. The variant used for each field key never changes since
/// the store fixes the type of a field the first time it's written.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Seconds,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds => "s",
        }
    }
}

/// A single time series point built from one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<&'static str, Option<FieldValue>>,
    pub timestamp: DateTime<Utc>,
    pub precision: Precision,
}

impl Point {
    /// Get the value of a field if it is present and not null
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key).and_then(Option::as_ref)
    }
}

/// Parse an `aifstime_utc` value such as `20240115063000` as a UTC instant.
///
/// Anything other than exactly fourteen digits forming a valid date and time is
/// rejected, the value is never guessed at.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TranslateError> {
    if value.len() != TIMESTAMP_LEN || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TranslateError::Timestamp(value.to_owned()));
    }

    let dt = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|_| TranslateError::Timestamp(value.to_owned()))?;

    // chrono accepts a seconds value of 60 as a leap second, stored as 59 plus an extra second
    // of nanoseconds. It would collide with the point for the preceding second.
    if dt.nanosecond() >= 1_000_000_000 {
        return Err(TranslateError::Timestamp(value.to_owned()));
    }

    Ok(dt.and_utc())
}

/// Parse a `rain_trace` value.
///
/// The Bureau sends a single dash when there is no reading. That, and anything else that
/// isn't a finite number, is `None`. An explicit `"0.0"` is a measured trace and is kept.
pub fn parse_rain_trace(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Build a point from an observation, tagged with the location IDs of `header` if given.
pub fn translate(obs: &RawObservation, header: Option<&Header>) -> Result<Point, TranslateError> {
    let timestamp = parse_timestamp(&obs.aifstime_utc)?;

    let mut tags = BTreeMap::new();
    tags.insert(TAG_SOURCE.to_owned(), SOURCE.to_owned());
    if let Some(h) = header {
        tags.insert(TAG_ID.to_owned(), h.location_id.clone());
        tags.insert(TAG_MAIN_ID.to_owned(), h.main_location_id.clone());
    }

    let float = |v: Option<f64>| v.map(FieldValue::Float);
    let integer = |v: Option<i64>| v.map(FieldValue::Integer);

    let mut fields = BTreeMap::new();
    fields.insert(FIELD_AIR_TEMP, float(obs.air_temp));
    fields.insert(FIELD_APPARENT_TEMP, float(obs.apparent_temp));
    // Wet bulb depression
    fields.insert(FIELD_DELTA_T, float(obs.delta_t));
    fields.insert(FIELD_RELATIVE_HUMIDITY, integer(obs.relative_humidity));
    fields.insert(FIELD_RAIN_TRACE, float(parse_rain_trace(&obs.rain_trace)));
    fields.insert(FIELD_PRESSURE, float(obs.pressure));
    fields.insert(FIELD_PRESSURE_MSL, float(obs.pressure_msl));
    fields.insert(FIELD_PRESSURE_QNH, float(obs.pressure_qnh));
    fields.insert(FIELD_WIND_DIRECTION, obs.wind_direction.clone().map(FieldValue::String));
    fields.insert(FIELD_WIND_SPEED_KMH, integer(obs.wind_speed_kmh));
    fields.insert(FIELD_GUST_KMH, integer(obs.gust_kmh));
    fields.insert(FIELD_DEW_POINT, float(obs.dew_point));

    Ok(Point {
        measurement: MEASUREMENT,
        tags,
        fields,
        timestamp,
        precision: Precision::Seconds,
    })
}
