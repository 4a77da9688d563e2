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

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::fmt::{self, Write};

/// Outcome of a single collection run
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RunResult {
    Success,
    FetchError,
    DecodeError,
    WriteError,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::FetchError => "fetch_error",
            Self::DecodeError => "decode_error",
            Self::WriteError => "write_error",
        }
    }
}

impl EncodeLabelValue for RunResult {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RunLabels {
    result: RunResult,
}

/// Holder for metrics about the collector itself.
///
/// All metrics are created and registered upon call to `CollectorMetrics::new()` and share
/// the prefix "bom_". Clones share the same underlying metrics.
#[derive(Clone, Debug, Default)]
pub struct CollectorMetrics {
    runs: Family<RunLabels, Counter>,
    points_written: Counter,
    observations_skipped: Counter,
    runs_in_flight: Gauge,
    last_success: Gauge,
}

impl CollectorMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "bom_runs",
            "Number of collection runs by result",
            metrics.runs.clone(),
        );
        reg.register(
            "bom_points_written",
            "Number of points written to the metrics store",
            metrics.points_written.clone(),
        );
        reg.register(
            "bom_observations_skipped",
            "Number of observations skipped because they could not be translated",
            metrics.observations_skipped.clone(),
        );
        reg.register(
            "bom_runs_in_flight",
            "Number of collection runs currently executing",
            metrics.runs_in_flight.clone(),
        );
        reg.register(
            "bom_last_success_timestamp_seconds",
            "UNIX timestamp of the last successful collection run",
            metrics.last_success.clone(),
        );

        metrics
    }

    /// Mark a run as in progress until the returned guard is dropped, even if the run panics.
    pub fn run_started(&self) -> InFlightGuard {
        self.runs_in_flight.inc();
        InFlightGuard {
            gauge: self.runs_in_flight.clone(),
        }
    }

    pub fn run_finished(&self, result: RunResult) {
        self.runs.get_or_create(&RunLabels { result }).inc();
        if result == RunResult::Success {
            self.last_success.set(chrono::Utc::now().timestamp());
        }
    }

    /// Count points accepted by the metrics store, not including any it dropped
    pub fn points_written(&self, count: usize) {
        self.points_written.inc_by(count as u64);
    }

    pub fn observation_skipped(&self) {
        self.observations_skipped.inc();
    }

    pub fn run_count(&self, result: RunResult) -> u64 {
        self.runs.get_or_create(&RunLabels { result }).get()
    }

    pub fn points_written_count(&self) -> u64 {
        self.points_written.get()
    }

    pub fn observations_skipped_count(&self) -> u64 {
        self.observations_skipped.get()
    }

    pub fn runs_in_flight_count(&self) -> i64 {
        self.runs_in_flight.get()
    }
}

/// Decrements the in flight gauge when dropped
#[must_use]
#[derive(Debug)]
pub struct InFlightGuard {
    gauge: Gauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
