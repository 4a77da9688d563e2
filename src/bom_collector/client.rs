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

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::de::{Error as _, IgnoredAny};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    Unexpected(StatusCode, Url),
    Decode(serde_json::Error),
}

impl ClientError {
    /// True if the document was fetched but could not be decoded
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Decode(e) => write!(f, "unable to decode observations: {}", e),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for a single Bureau of Meteorology observations JSON product.
///
/// The same `BomClient` is reused for every collection run. Requests carry a few
/// identifying headers so the Bureau can tell who is polling and how often.
#[derive(Debug, Clone)]
pub struct BomClient {
    client: Client,
    source_url: Url,
}

impl BomClient {
    const USER_AGENT: &'static str = "bom_collector (https://github.com/56quarters/bom_collector)";
    const JSON_RESPONSE: &'static str = "application/json";

    const HEADER_SCRAPER: &'static str = "X-Scraper";
    const HEADER_SOURCE: &'static str = "X-Source";
    const HEADER_TARGET_INTERVAL: &'static str = "X-Target-Interval";
    const SCRAPER: &'static str = "bom_collector";
    const SOURCE: &'static str = "https://github.com/56quarters/bom_collector";
    const TARGET_INTERVAL: &'static str = "30m";

    pub fn new(client: Client, source_url: Url) -> Self {
        BomClient { client, source_url }
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    /// Fetch and decode the current observations document.
    ///
    /// Transport failures and non-2xx responses are returned as `Internal` or `Unexpected`,
    /// a body that isn't a valid observations document is returned as `Decode`.
    pub async fn observations(&self) -> Result<SourceDocument, ClientError> {
        tracing::debug!(message = "making observations request", url = %self.source_url);

        let res = self
            .client
            .get(self.source_url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .header(Self::HEADER_SCRAPER, Self::SCRAPER)
            .header(Self::HEADER_SOURCE, Self::SOURCE)
            .header(Self::HEADER_TARGET_INTERVAL, Self::TARGET_INTERVAL)
            .send()
            .await
            .map_err(ClientError::Internal)?;

        let status = res.status();
        if !status.is_success() {
            return Err(ClientError::Unexpected(status, self.source_url.clone()));
        }

        let body = res.bytes().await.map_err(ClientError::Internal)?;
        tracing::debug!(message = "fetched observations document", num_bytes = body.len());
        SourceDocument::from_slice(&body).map_err(ClientError::Decode)
    }
}

/// Treat an explicit `null` the same as a missing value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Require JSON objects wherever a struct is expected. Derived struct decoding also
/// accepts arrays of values in field order, which would let an array body through.
fn check_shape(value: &Value) -> Result<(), serde_json::Error> {
    let root = expect_object(value, "document")?;
    if let Some(observations) = root.get("observations") {
        let observations = expect_object(observations, "observations")?;
        for key in ["notice", "header", "data"] {
            if let Some(Value::Array(items)) = observations.get(key) {
                for item in items {
                    expect_object(item, key)?;
                }
            }
        }
    }

    Ok(())
}

fn expect_object<'a>(value: &'a Value, what: &str) -> Result<&'a serde_json::Map<String, Value>, serde_json::Error> {
    value
        .as_object()
        .ok_or_else(|| serde_json::Error::custom(format!("expected {} to be an object", what)))
}

#[derive(Deserialize, Debug)]
struct Envelope {
    observations: SourceDocument,
}

/// One decoded observations product: attribution notices, station headers, and readings.
///
/// Any field missing from the upstream JSON decodes to its empty value instead of failing
/// the document. Only a body that isn't JSON or lacks the top level `observations` object
/// is rejected.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SourceDocument {
    #[serde(rename = "notice", deserialize_with = "null_as_default")]
    pub notices: Vec<Notice>,
    #[serde(rename = "header", deserialize_with = "null_as_default")]
    pub headers: Vec<Header>,
    #[serde(rename = "data", deserialize_with = "null_as_default")]
    pub observations: Vec<RawObservation>,
}

impl SourceDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        check_shape(&value)?;
        serde_json::from_value::<Envelope>(value).map(|e| e.observations)
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notices.first()
    }

    pub fn header(&self) -> Option<&Header> {
        self.headers.first()
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Notice {
    #[serde(alias = "copyright", deserialize_with = "null_as_default")]
    pub copyright_text: String,
    #[serde(deserialize_with = "null_as_default")]
    pub copyright_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub disclaimer_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub feedback_url: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Header {
    #[serde(deserialize_with = "null_as_default")]
    pub refresh_message: String,
    #[serde(alias = "ID", deserialize_with = "null_as_default")]
    pub location_id: String,
    #[serde(alias = "main_ID", deserialize_with = "null_as_default")]
    pub main_location_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub state_time_zone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub time_zone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub product_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub state: String,
}

/// A field the upstream schema carries without a stable type.
///
/// Only whether the field held a value is recorded, the value itself is never interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reserved {
    #[default]
    Absent,
    Present,
}

impl<'de> Deserialize<'de> for Reserved {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<IgnoredAny>::deserialize(deserializer)? {
            Some(_) => Reserved::Present,
            None => Reserved::Absent,
        })
    }
}

/// A single reading for a station at one instant, as sent by the Bureau.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RawObservation {
    pub sort_order: Option<i64>,
    pub wmo: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub history_product: String,
    #[serde(deserialize_with = "null_as_default")]
    pub local_date_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub local_date_time_full: String,
    #[serde(deserialize_with = "null_as_default")]
    pub aifstime_utc: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(alias = "apparent_t")]
    pub apparent_temp: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub cloud: String,
    pub cloud_base_m: Reserved,
    pub cloud_oktas: Reserved,
    pub cloud_type_id: Reserved,
    #[serde(deserialize_with = "null_as_default")]
    pub cloud_type: String,
    pub delta_t: Option<f64>,
    pub gust_kmh: Option<i64>,
    pub gust_kt: Option<i64>,
    pub air_temp: Option<f64>,
    #[serde(alias = "dewpt")]
    pub dew_point: Option<f64>,
    #[serde(alias = "press")]
    pub pressure: Option<f64>,
    #[serde(alias = "press_qnh")]
    pub pressure_qnh: Option<f64>,
    #[serde(alias = "press_msl")]
    pub pressure_msl: Option<f64>,
    #[serde(alias = "press_tend", deserialize_with = "null_as_default")]
    pub pressure_tendency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub rain_trace: String,
    #[serde(alias = "rel_hum")]
    pub relative_humidity: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub sea_state: String,
    #[serde(deserialize_with = "null_as_default")]
    pub swell_dir_worded: String,
    pub swell_height: Reserved,
    pub swell_period: Reserved,
    #[serde(deserialize_with = "null_as_default")]
    pub vis_km: String,
    #[serde(deserialize_with = "null_as_default")]
    pub weather: String,
    #[serde(alias = "wind_dir")]
    pub wind_direction: Option<String>,
    #[serde(alias = "wind_spd_kmh")]
    pub wind_speed_kmh: Option<i64>,
    #[serde(alias = "wind_spd_kt")]
    pub wind_speed_kt: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::{Reserved, SourceDocument};

    const DOCUMENT: &str = r#"{
      "observations": {
        "notice": [
          {
            "copyright": "Copyright Commonwealth of Australia 2024, Bureau of Meteorology (ABN 92 637 533 532)",
            "copyright_url": "http://www.bom.gov.au/other/copyright.shtml",
            "disclaimer_url": "http://www.bom.gov.au/other/disclaimer.shtml",
            "feedback_url": "http://www.bom.gov.au/other/feedback"
          }
        ],
        "header": [
          {
            "refresh_message": "Issued at  5:02 pm EST Monday 15 January 2024",
            "ID": "IDN60901",
            "main_ID": "IDN60902",
            "name": "Sydney - Observatory Hill",
            "state_time_zone": "NSW",
            "time_zone": "EDT",
            "product_name": "Capital City Observations",
            "state": "New South Wales"
          }
        ],
        "data": [
          {
            "sort_order": 0,
            "wmo": 94768,
            "name": "Sydney - Observatory Hill",
            "history_product": "IDN60901",
            "local_date_time": "15/05:30pm",
            "local_date_time_full": "20240115173000",
            "aifstime_utc": "20240115063000",
            "lat": -33.9,
            "lon": 151.2,
            "apparent_t": 24.3,
            "cloud": "-",
            "cloud_base_m": null,
            "cloud_oktas": null,
            "cloud_type_id": 8,
            "cloud_type": "-",
            "delta_t": 4.1,
            "gust_kmh": 30,
            "gust_kt": 16,
            "air_temp": 25.7,
            "dewpt": 17.6,
            "press": 1012.4,
            "press_qnh": 1012.4,
            "press_msl": 1012.4,
            "press_tend": "-",
            "rain_trace": "0.2",
            "rel_hum": 61,
            "sea_state": "-",
            "swell_dir_worded": "-",
            "swell_height": null,
            "swell_period": null,
            "vis_km": "10",
            "weather": "-",
            "wind_dir": "NE",
            "wind_spd_kmh": 20,
            "wind_spd_kt": 11
          }
        ]
      }
    }"#;

    #[test]
    fn test_decode_full_document() {
        let doc = SourceDocument::from_slice(DOCUMENT.as_bytes()).unwrap();

        let notice = doc.notice().unwrap();
        assert!(notice.copyright_text.starts_with("Copyright Commonwealth of Australia"));
        assert_eq!("http://www.bom.gov.au/other/feedback", notice.feedback_url);

        let header = doc.header().unwrap();
        assert_eq!("IDN60901", header.location_id);
        assert_eq!("IDN60902", header.main_location_id);
        assert_eq!("Capital City Observations", header.product_name);

        assert_eq!(1, doc.observations.len());
        let obs = &doc.observations[0];
        assert_eq!("20240115063000", obs.aifstime_utc);
        assert_eq!(Some(25.7), obs.air_temp);
        assert_eq!(Some(24.3), obs.apparent_temp);
        assert_eq!(Some(17.6), obs.dew_point);
        assert_eq!(Some(61), obs.relative_humidity);
        assert_eq!(Some(20), obs.wind_speed_kmh);
        assert_eq!(Some(30), obs.gust_kmh);
        assert_eq!(Some("NE".to_owned()), obs.wind_direction);
        assert_eq!("0.2", obs.rain_trace);
    }

    #[test]
    fn test_decode_reserved_fields() {
        let doc = SourceDocument::from_slice(DOCUMENT.as_bytes()).unwrap();
        let obs = &doc.observations[0];

        assert_eq!(Reserved::Absent, obs.cloud_base_m);
        assert_eq!(Reserved::Present, obs.cloud_type_id);
        assert_eq!(Reserved::Absent, obs.swell_height);
    }

    #[test]
    fn test_decode_missing_fields_are_empty() {
        let doc = SourceDocument::from_slice(br#"{"observations": {"data": [{"aifstime_utc": "20240115063000"}]}}"#)
            .unwrap();

        assert!(doc.notices.is_empty());
        assert!(doc.headers.is_empty());
        assert_eq!(1, doc.observations.len());

        let obs = &doc.observations[0];
        assert_eq!(None, obs.air_temp);
        assert_eq!(None, obs.wind_direction);
        assert_eq!("", obs.rain_trace);
        assert_eq!(Reserved::Absent, obs.swell_period);
    }

    #[test]
    fn test_decode_null_fields_are_empty() {
        let doc = SourceDocument::from_slice(
            br#"{"observations": {"notice": null, "header": [{"ID": null, "name": "Sydney"}], "data": [{"rain_trace": null, "air_temp": null, "wind_dir": null}]}}"#,
        )
        .unwrap();

        assert!(doc.notices.is_empty());
        assert_eq!("", doc.headers[0].location_id);
        assert_eq!("Sydney", doc.headers[0].name);

        let obs = &doc.observations[0];
        assert_eq!("", obs.rain_trace);
        assert_eq!(None, obs.air_temp);
        assert_eq!(None, obs.wind_direction);
    }

    #[test]
    fn test_decode_empty_observations_object() {
        let doc = SourceDocument::from_slice(br#"{"observations": {}}"#).unwrap();
        assert_eq!(SourceDocument::default(), doc);
    }

    #[test]
    fn test_decode_missing_observations_object() {
        assert!(SourceDocument::from_slice(br#"{"data": []}"#).is_err());
    }

    #[test]
    fn test_decode_wrong_top_level_shape() {
        assert!(SourceDocument::from_slice(br#"[{"observations": {}}]"#).is_err());
    }

    #[test]
    fn test_decode_array_shapes() {
        assert!(SourceDocument::from_slice(b"[[]]").is_err());
        assert!(SourceDocument::from_slice(br#"{"observations": [[], [], []]}"#).is_err());
        assert!(SourceDocument::from_slice(br#"{"observations": {"data": [["Sydney"]]}}"#).is_err());
        assert!(SourceDocument::from_slice(br#"{"observations": {"header": [[]], "data": []}}"#).is_err());
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(SourceDocument::from_slice(b"<html>Service Unavailable</html>").is_err());
    }
}
