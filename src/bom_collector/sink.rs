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

use crate::point::{FieldValue, Point, Precision};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use std::error;
use std::fmt;

/// Bucket and organisation that a batch of points is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    pub organisation: String,
}

impl Destination {
    pub fn new<S: Into<String>>(bucket: S, organisation: S) -> Self {
        Destination {
            bucket: bucket.into(),
            organisation: organisation.into(),
        }
    }
}

#[derive(Debug)]
pub enum SinkError {
    Internal(reqwest::Error),
    InvalidUrl(Url),
    Unexpected(StatusCode, Url, String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(url) => write!(f, "invalid base URL {}", url),
            Self::Unexpected(status, url, body) if body.is_empty() => {
                write!(f, "unexpected status {} for {}", status, url)
            }
            Self::Unexpected(status, url, body) => write!(f, "unexpected status {} for {}: {}", status, url, body),
        }
    }
}

impl error::Error for SinkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Something that accepts batches of points.
///
/// A batch is written in a single call and either succeeds or fails as a whole. On success
/// the number of points actually stored is returned, which may be fewer than were given
/// if some couldn't be represented.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, destination: &Destination, points: &[Point]) -> Result<usize, SinkError>;
}

/// `MetricsSink` that writes points to the InfluxDB v2 HTTP API as line protocol.
pub struct InfluxClient {
    client: Client,
    write_url: Url,
    token: String,
}

impl InfluxClient {
    const USER_AGENT: &'static str = "bom_collector (https://github.com/56quarters/bom_collector)";
    const TEXT_REQUEST: &'static str = "text/plain; charset=utf-8";

    /// Create a new client for the InfluxDB server at `base_url`.
    ///
    /// Any path on `base_url` is kept as a prefix, for servers behind a reverse proxy.
    pub fn new(client: Client, base_url: Url, token: String) -> Result<Self, SinkError> {
        let mut write_url = base_url.clone();
        write_url
            .path_segments_mut()
            .map(|mut p| {
                p.pop_if_empty().push("api").push("v2").push("write");
            })
            .map_err(|_| SinkError::InvalidUrl(base_url))?;

        Ok(InfluxClient {
            client,
            write_url,
            token,
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    fn request_url(&self, destination: &Destination, precision: Precision) -> Url {
        let mut url = self.write_url.clone();
        url.query_pairs_mut()
            .append_pair("org", &destination.organisation)
            .append_pair("bucket", &destination.bucket)
            .append_pair("precision", precision.as_str());
        url
    }
}

impl fmt::Debug for InfluxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxClient")
            .field("client", &self.client)
            .field("write_url", &self.write_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl MetricsSink for InfluxClient {
    async fn write(&self, destination: &Destination, points: &[Point]) -> Result<usize, SinkError> {
        let precision = match points.first() {
            Some(p) => p.precision,
            None => {
                tracing::debug!(message = "skipping write of empty batch", bucket = %destination.bucket);
                return Ok(0);
            }
        };

        let lines = encode_lines(points);
        if lines.is_empty() {
            tracing::debug!(message = "no encodable points in batch", bucket = %destination.bucket);
            return Ok(0);
        }

        let num_lines = lines.len();
        let body = lines.join("\n");

        let url = self.request_url(destination, precision);
        tracing::debug!(message = "writing points", url = %url, num_points = num_lines, num_bytes = body.len());

        let res = self
            .client
            .post(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, Self::TEXT_REQUEST)
            .body(body)
            .send()
            .await
            .map_err(SinkError::Internal)?;

        let status = res.status();
        if status.is_success() {
            Ok(num_lines)
        } else {
            // The error body explains what InfluxDB rejected, keep it if there is one
            let body = res.text().await.unwrap_or_default();
            Err(SinkError::Unexpected(status, url, body.trim().to_owned()))
        }
    }
}

/// Encode points as newline separated line protocol.
///
/// Null fields are left out of each line. Points where every field is null can't be
/// represented and are dropped.
pub fn encode_batch(points: &[Point]) -> String {
    encode_lines(points).join("\n")
}

fn encode_lines(points: &[Point]) -> Vec<String> {
    let mut lines = Vec::with_capacity(points.len());
    for point in points {
        match encode_line(point) {
            Some(line) => lines.push(line),
            None => tracing::debug!(message = "dropping point without any values", timestamp = %point.timestamp),
        }
    }

    lines
}

fn encode_line(point: &Point) -> Option<String> {
    let fields = point
        .fields
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| format!("{}={}", escape(k, KEY_SPECIAL), encode_field(v))))
        .collect::<Vec<_>>();

    if fields.is_empty() {
        return None;
    }

    let mut line = escape(point.measurement, MEASUREMENT_SPECIAL);
    // Empty tag values aren't allowed by line protocol
    for (k, v) in point.tags.iter().filter(|(_, v)| !v.is_empty()) {
        line.push(',');
        line.push_str(&escape(k, KEY_SPECIAL));
        line.push('=');
        line.push_str(&escape(v, KEY_SPECIAL));
    }

    let timestamp = match point.precision {
        Precision::Seconds => point.timestamp.timestamp(),
    };

    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&timestamp.to_string());
    Some(line)
}

const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];
const STRING_SPECIAL: &[char] = &['"', '\\'];

fn encode_field(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Integer(v) => format!("{}i", v),
        FieldValue::String(v) => format!("\"{}\"", escape(v, STRING_SPECIAL)),
    }
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        // A line break would end the point early, line protocol can't represent one
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }

    out
}
