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

use bom_collector::client::BomClient;
use bom_collector::collector::Collector;
use bom_collector::http::RequestContext;
use bom_collector::metrics::CollectorMetrics;
use bom_collector::scheduler::Scheduler;
use bom_collector::sink::{Destination, InfluxClient};
use clap::Parser;
use prometheus_client::registry::Registry;
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9783);
const DEFAULT_REFRESH_SECS: u64 = 1800;
const DEFAULT_SOURCE_URL: &str = "http://www.bom.gov.au/fwo/IDN60901/IDN60901.94768.json";
const DEFAULT_INFLUX_URL: &str = "http://localhost:8086/";

#[derive(Debug, Parser)]
#[clap(name = "bom_collector", version = clap::crate_version!())]
struct BomCollectorApplication {
    /// URL of the Bureau of Meteorology JSON observations product to collect
    #[clap(long, env = "BOM_SOURCE_URL", default_value = DEFAULT_SOURCE_URL)]
    source_url: Url,

    /// Fetch observations from the Bureau at this interval, in seconds. Products are
    /// updated every 30 minutes.
    #[clap(long, env = "BOM_REFRESH_SECS", default_value_t = DEFAULT_REFRESH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    refresh_secs: u64,

    /// Base URL of the InfluxDB server to write observations to
    #[clap(long, env = "INFLUXDB_URL", default_value = DEFAULT_INFLUX_URL)]
    influx_url: Url,

    /// API token for writing to InfluxDB
    #[clap(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    influx_token: String,

    /// InfluxDB bucket to write observations to
    #[clap(long, env = "INFLUXDB_BUCKET")]
    influx_bucket: String,

    /// InfluxDB organisation that owns the bucket
    #[clap(long, env = "INFLUXDB_ORG")]
    influx_org: String,

    /// Timeout for fetching observations and writing them to InfluxDB, in milliseconds.
    /// By default, no timeout is used.
    #[clap(long)]
    timeout_millis: Option<u64>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to for exposing metrics about the collector itself
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = BomCollectorApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let mut builder = Client::builder();
    if let Some(millis) = opts.timeout_millis {
        builder = builder.timeout(Duration::from_millis(millis));
    }

    let http_client = builder.build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let sink = InfluxClient::new(http_client.clone(), opts.influx_url.clone(), opts.influx_token).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize InfluxDB client", error = %e);
        process::exit(1)
    });

    let mut registry = Registry::default();
    let metrics = CollectorMetrics::new(&mut registry);
    let client = BomClient::new(http_client, opts.source_url.clone());
    let destination = Destination::new(opts.influx_bucket, opts.influx_org);
    let collector = Arc::new(Collector::new(client, sink, destination, metrics));

    let context = Arc::new(RequestContext::new(registry));
    let handler = bom_collector::http::text_metrics(context);
    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(handler.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr());
    tracing::info!(
        message = "observation polling started",
        source_url = %opts.source_url,
        influx_url = %opts.influx_url,
        refresh_secs = opts.refresh_secs,
    );

    let scheduler = Scheduler::start(Duration::from_secs(opts.refresh_secs), move || {
        let collector = collector.clone();
        async move {
            collector
                .run()
                .instrument(tracing::span!(Level::INFO, "bom_collect"))
                .await
        }
    });

    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    scheduler.stop().await;
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
