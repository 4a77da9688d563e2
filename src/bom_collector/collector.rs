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

use crate::client::{BomClient, ClientError, SourceDocument};
use crate::metrics::{CollectorMetrics, RunResult};
use crate::point::{self, Point};
use crate::sink::{Destination, MetricsSink, SinkError};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum CollectError {
    Fetch(ClientError),
    Decode(ClientError),
    Write(SinkError),
}

impl CollectError {
    pub fn result(&self) -> RunResult {
        match self {
            Self::Fetch(_) => RunResult::FetchError,
            Self::Decode(_) => RunResult::DecodeError,
            Self::Write(_) => RunResult::WriteError,
        }
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "fetch failed: {}", e),
            Self::Decode(e) => write!(f, "decode failed: {}", e),
            Self::Write(e) => write!(f, "write failed: {}", e),
        }
    }
}

impl error::Error for CollectError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Write(e) => Some(e),
        }
    }
}

impl From<ClientError> for CollectError {
    fn from(e: ClientError) -> Self {
        if e.is_decode() {
            Self::Decode(e)
        } else {
            Self::Fetch(e)
        }
    }
}

impl From<SinkError> for CollectError {
    fn from(e: SinkError) -> Self {
        Self::Write(e)
    }
}

/// Counts from a single successful run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub observations: usize,
    pub points: usize,
    /// Points the sink accepted, points with no values at all are dropped by InfluxDB
    pub written: usize,
    pub skipped: usize,
}

/// Fetches the observations document, translates it, and writes the resulting points.
///
/// A run either writes every observation that could be translated as a single batch
/// or, if fetching, decoding, or writing fails, counts as failed. Observations with a
/// malformed timestamp are skipped without failing the run.
#[derive(Debug)]
pub struct Collector<S> {
    client: BomClient,
    sink: S,
    destination: Destination,
    metrics: CollectorMetrics,
}

impl<S> Collector<S>
where
    S: MetricsSink,
{
    pub fn new(client: BomClient, sink: S, destination: Destination, metrics: CollectorMetrics) -> Self {
        Collector {
            client,
            sink,
            destination,
            metrics,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run a single collection, logging any failure instead of returning it.
    pub async fn run(&self) {
        let _in_flight = self.metrics.run_started();

        let result = match self.collect().await {
            Ok(summary) => {
                tracing::info!(
                    message = "collection complete",
                    observations = summary.observations,
                    points = summary.points,
                    written = summary.written,
                    skipped = summary.skipped,
                );
                RunResult::Success
            }
            Err(e) => {
                match &e {
                    CollectError::Fetch(_) => tracing::error!(message = "failed to fetch observations", error = %e),
                    CollectError::Decode(_) => tracing::error!(message = "failed to decode observations", error = %e),
                    CollectError::Write(_) => tracing::error!(message = "failed to write points", error = %e),
                }
                e.result()
            }
        };

        self.metrics.run_finished(result);
    }

    pub async fn collect(&self) -> Result<RunSummary, CollectError> {
        tracing::info!(message = "collecting from data source", url = %self.client.source_url());

        let doc = self.client.observations().await?;
        log_document(&doc);

        let points = self.translate(&doc);
        tracing::info!(
            message = "writing points",
            num_points = points.len(),
            bucket = %self.destination.bucket,
            organisation = %self.destination.organisation,
        );

        let written = self.sink.write(&self.destination, &points).await?;
        self.metrics.points_written(written);

        Ok(RunSummary {
            observations: doc.observations.len(),
            points: points.len(),
            written,
            skipped: doc.observations.len() - points.len(),
        })
    }

    fn translate(&self, doc: &SourceDocument) -> Vec<Point> {
        let header = doc.header();
        let mut points = Vec::with_capacity(doc.observations.len());

        for obs in doc.observations.iter() {
            match point::translate(obs, header) {
                Ok(p) => points.push(p),
                Err(e) => {
                    tracing::warn!(message = "skipping observation", name = %obs.name, error = %e);
                    self.metrics.observation_skipped();
                }
            }
        }

        points
    }
}

fn log_document(doc: &SourceDocument) {
    if let Some(notice) = doc.notice() {
        tracing::info!(
            message = "observation notice",
            copyright = %notice.copyright_text,
            feedback_url = %notice.feedback_url,
        );
    }

    if let Some(header) = doc.header() {
        tracing::info!(
            message = "observation header",
            product = %header.product_name,
            name = %header.name,
            state = %header.state,
            refresh_message = %header.refresh_message,
        );
    }
}
