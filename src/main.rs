//! metricsync — periodic InfluxDB → Elasticsearch metric sync daemon.
//!
//! Every tick the daemon:
//! - discovers the hosts active in the configured bucket over the trailing
//!   discovery window,
//! - fetches each host's latest `system_metrics` samples over the trailing
//!   fetch window,
//! - maps each sample row to a flat document and writes it to the
//!   configured index with a deterministic id and create-only semantics,
//!   so repeated runs never duplicate documents.

mod config;
mod document;
mod elastic;
mod influx;
mod sync;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::elastic::ElasticClient;
use crate::influx::InfluxClient;
use crate::sync::SyncRunner;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ok if no .env is present

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("metricsync=info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        influxdb = %config.influxdb.url,
        bucket = %config.influxdb.bucket,
        elasticsearch = %format!(
            "{}://{}:{}",
            config.elasticsearch.scheme, config.elasticsearch.host, config.elasticsearch.port
        ),
        index = %config.elasticsearch.index,
        "starting metricsync"
    );

    let influx = InfluxClient::new(
        &config.influxdb.url,
        &config.influxdb.token,
        &config.influxdb.org,
    );
    let elastic = ElasticClient::new(
        &config.elasticsearch.scheme,
        &config.elasticsearch.host,
        config.elasticsearch.port,
        &config.elasticsearch.index,
    );

    let runner = SyncRunner::new(influx, elastic, config.influxdb.bucket.clone(), config.sync);
    runner.run().await
}
