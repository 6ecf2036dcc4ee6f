//! The poll loop: discover active hosts, fetch their latest samples, map
//! each sample to a document and write it with create-only semantics.

use std::collections::BTreeSet;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::document;
use crate::elastic::{ElasticClient, ElasticError};
use crate::influx::csv::FluxTable;
use crate::influx::{self, InfluxClient, InfluxError};

/// Per-cycle counters, logged as a summary line after every tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub hosts: usize,
    pub indexed: usize,
    pub duplicates: usize,
    pub failures: usize,
}

impl CycleStats {
    fn merge(&mut self, other: CycleStats) {
        self.indexed += other.indexed;
        self.duplicates += other.duplicates;
        self.failures += other.failures;
    }
}

/// Owns the two store clients for the life of the process and drives the
/// periodic sync cycles.
pub struct SyncRunner {
    influx: InfluxClient,
    elastic: ElasticClient,
    bucket: String,
    config: SyncConfig,
}

impl SyncRunner {
    pub fn new(
        influx: InfluxClient,
        elastic: ElasticClient,
        bucket: String,
        config: SyncConfig,
    ) -> Self {
        Self {
            influx,
            elastic,
            bucket,
            config,
        }
    }

    /// Run sync cycles on the configured interval until Ctrl-C. A failed
    /// cycle is logged and the next tick proceeds — no single external
    /// call can take the daemon down.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.interval);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.config.interval.as_secs(),
            max_concurrent_hosts = self.config.max_concurrent_hosts,
            "starting sync loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.cycle().await {
                        Ok(stats) => info!(
                            hosts = stats.hosts,
                            indexed = stats.indexed,
                            duplicates = stats.duplicates,
                            failures = stats.failures,
                            "sync cycle complete"
                        ),
                        Err(e) => error!("sync cycle failed: {e:#}"),
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping sync loop");
                    return Ok(());
                }
            }
        }
    }

    /// One full discovery → fetch → write pass.
    async fn cycle(&self) -> Result<CycleStats> {
        let query = influx::host_discovery_query(&self.bucket, self.config.discovery_window);
        let tables = self.influx.query(&query).await?;
        let hosts = collect_hosts(&tables);
        debug!(count = hosts.len(), "discovered active hosts");

        let mut stats = CycleStats {
            hosts: hosts.len(),
            ..CycleStats::default()
        };

        // hosts are independent, fan out with bounded concurrency
        let results = stream::iter(hosts)
            .map(|host| async move {
                let outcome = self.sync_host(&host).await;
                (host, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_hosts)
            .collect::<Vec<_>>()
            .await;

        for (host, outcome) in results {
            match outcome {
                Ok(host_stats) => stats.merge(host_stats),
                Err(e) => {
                    error!(%host, "failed to sync host: {e}");
                    stats.failures += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Fetch the latest samples for one host and write each as a document.
    async fn sync_host(&self, host: &str) -> Result<CycleStats, InfluxError> {
        let query = influx::host_metrics_query(&self.bucket, self.config.fetch_window, host);
        let tables = self.influx.query(&query).await?;

        let mut stats = CycleStats::default();
        for table in &tables {
            for record in &table.records {
                let Some(sample) = document::map_record(record, host) else {
                    debug!(%host, "skipping record without timestamp or measurement");
                    continue;
                };
                match self.elastic.create(&sample.id, &sample.document).await {
                    Ok(ack) => {
                        info!(id = %ack.id, result = %ack.result, "indexed document");
                        stats.indexed += 1;
                    }
                    Err(ElasticError::Conflict { id }) => {
                        debug!(%id, "document already indexed");
                        stats.duplicates += 1;
                    }
                    Err(e) => {
                        error!(id = %sample.id, "failed to index document: {e}");
                        stats.failures += 1;
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// Distinct non-null host identifiers across all discovery tables.
pub fn collect_hosts(tables: &[FluxTable]) -> Vec<String> {
    let mut hosts = BTreeSet::new();
    for table in tables {
        for record in &table.records {
            if let Some(host) = record.get_str("host") {
                if !host.is_empty() {
                    hosts.insert(host.to_string());
                }
            }
        }
    }
    hosts.into_iter().collect()
}
