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

//! Bureau of Meteorology observation collector for InfluxDB
//!
//! ## Features
//!
//! `bom_collector` periodically fetches an observations product from the [Bureau of Meteorology]
//! (for example the [Sydney - Observatory Hill] JSON product) and writes every observation in it
//! to an InfluxDB v2 bucket. Each observation becomes a single point in the `weather-data`
//! measurement with the following fields. Readings the Bureau didn't report are left out of the
//! point instead of being written as zero.
//!
//! * `air_temp` - Air temperature, in degrees celsius.
//! * `apparent_t` - Apparent temperature, in degrees celsius.
//! * `delta_t` - Wet bulb depression, in degrees celsius.
//! * `dewpt` - Dew point, in degrees celsius.
//! * `rel_hum` - Relative humidity (0-100), integer.
//! * `rain_trace` - Rain since 9am, in millimeters. Missing when the Bureau has no reading.
//! * `press`, `press_msl`, `press_qnh` - Pressure, in hectopascals.
//! * `wind_dir` - Wind direction as a compass point, string.
//! * `wind_spd_kmh`, `gust_kmh` - Wind and gust speed, in km/h, integer.
//!
//! Every point is tagged with `source="Bureau of Meteorology"` and, when the product includes
//! station information, `ID` and `main_ID` for the product.
//!
//! [Bureau of Meteorology]: http://www.bom.gov.au/
//! [Sydney - Observatory Hill]: http://www.bom.gov.au/fwo/IDN60901/IDN60901.94768.json
//!
//! ## Build
//!
//! `bom_collector` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/bom_collector.git && cd bom_collector
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! Pick the JSON observations product for a station from the Bureau's website and supply
//! InfluxDB connection details. The token may be passed with the `INFLUXDB_TOKEN` environment
//! variable to keep it out of the process list.
//!
//! ```text
//! export INFLUXDB_TOKEN=...
//! ./bom_collector \
//!     --source-url http://www.bom.gov.au/fwo/IDN60901/IDN60901.94768.json \
//!     --influx-url http://localhost:8086/ \
//!     --influx-bucket weather \
//!     --influx-org home
//! ```
//!
//! Observations are fetched on start and then every 30 minutes by default (`--refresh-secs`).
//! The Bureau only updates products every half hour so polling more often isn't useful.
//!
//! ### Prometheus
//!
//! Metrics about the collector itself (runs by result, points written, skipped observations)
//! are exposed on port `9783` at `/metrics`.
//!

pub mod client;
pub mod collector;
pub mod http;
pub mod metrics;
pub mod point;
pub mod scheduler;
pub mod sink;
