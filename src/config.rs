//! Startup configuration, read once from the process environment.

use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_DISCOVERY_WINDOW_SECS: u64 = 3600;
const DEFAULT_FETCH_WINDOW_SECS: u64 = 5;
const DEFAULT_MAX_CONCURRENT_HOSTS: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub influxdb: InfluxConfig,
    pub elasticsearch: ElasticConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub index: String,
}

/// Cadence and window knobs. Defaults preserve the historical 5s tick,
/// 1h discovery window and 5s fetch window.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub interval: Duration,
    pub discovery_window: Duration,
    pub fetch_window: Duration,
    pub max_concurrent_hosts: usize,
}

impl Config {
    /// Load from the process environment. Missing or malformed values are
    /// fatal — the daemon refuses to start half-configured.
    pub fn from_env() -> Result<Self> {
        Self::from_getter(&|key| std::env::var(key).ok())
    }

    fn from_getter(get: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            get(key)
                .filter(|value| !value.is_empty())
                .with_context(|| format!("missing required environment variable {key}"))
        };

        let influxdb = InfluxConfig {
            url: required("INFLUXDB_URL")?,
            token: required("INFLUXDB_TOKEN")?,
            org: required("INFLUXDB_ORG")?,
            bucket: required("INFLUXDB_BUCKET_NAME")?,
        };

        let port = required("ELASTICSEARCH_PORT")?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("ELASTICSEARCH_PORT is not a valid port: {port:?}"))?;
        let elasticsearch = ElasticConfig {
            host: required("ELASTICSEARCH_HOST")?,
            port,
            scheme: required("ELASTICSEARCH_SCHEME")?,
            index: required("ELASTICSEARCH_INDEX")?,
        };

        let sync = SyncConfig {
            interval: Duration::from_secs(parse_secs(
                get,
                "SYNC_INTERVAL_SECS",
                DEFAULT_INTERVAL_SECS,
            )?),
            discovery_window: Duration::from_secs(parse_secs(
                get,
                "DISCOVERY_WINDOW_SECS",
                DEFAULT_DISCOVERY_WINDOW_SECS,
            )?),
            fetch_window: Duration::from_secs(parse_secs(
                get,
                "FETCH_WINDOW_SECS",
                DEFAULT_FETCH_WINDOW_SECS,
            )?),
            max_concurrent_hosts: parse_concurrency(get)?,
        };

        Ok(Config {
            influxdb,
            elasticsearch,
            sync,
        })
    }
}

fn parse_secs(get: &dyn Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .with_context(|| format!("{key} is not a valid number of seconds: {value:?}")),
    }
}

fn parse_concurrency(get: &dyn Fn(&str) -> Option<String>) -> Result<usize> {
    let limit = match get("MAX_CONCURRENT_HOSTS") {
        None => DEFAULT_MAX_CONCURRENT_HOSTS,
        Some(value) => value
            .parse()
            .with_context(|| format!("MAX_CONCURRENT_HOSTS is not a valid count: {value:?}"))?,
    };
    anyhow::ensure!(limit >= 1, "MAX_CONCURRENT_HOSTS must be at least 1");
    Ok(limit)
}
