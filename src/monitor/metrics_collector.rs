//! Metrics collector - periodic scrape, attribution and publication
//!
//! Responsibilities:
//! - Scrape the upstream GPU exporter
//! - Parse the exposition text into per-counter samples
//! - Attribute samples to Kubernetes workloads
//! - Render and publish the snapshot to the metrics cache

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::metrics_cache::MetricsCache;
use crate::mapper::topology::GpuTopology;
use crate::mapper::PodMapper;
use crate::telemetry;
use crate::utils::prometheus_parser::PrometheusMetrics;
use crate::utils::upstream_client::UpstreamClient;

/// Collects and annotates GPU metrics at regular intervals
///
/// One cycle runs to completion before the next tick is handled, so the
/// workload index and the sample collection are never shared between cycles.
pub struct MetricsCollector {
    upstream: UpstreamClient,
    pod_mapper: Arc<PodMapper>,
    metrics_cache: Arc<MetricsCache>,
    interval_secs: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new(
        upstream: UpstreamClient,
        pod_mapper: Arc<PodMapper>,
        metrics_cache: Arc<MetricsCache>,
        interval_secs: u64,
    ) -> Self {
        MetricsCollector {
            upstream,
            pod_mapper,
            metrics_cache,
            interval_secs,
        }
    }

    /// Start the periodic collection task
    pub async fn start(self: Arc<Self>) -> Result<()> {
        info!(
            interval_secs = self.interval_secs,
            upstream = %self.upstream.endpoint(),
            "Starting metrics collector task"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let cycle_start = std::time::Instant::now();
                match self.collect_once().await {
                    Ok(sample_count) => info!(
                        samples = sample_count,
                        duration_ms = cycle_start.elapsed().as_millis(),
                        "Metrics collection cycle completed"
                    ),
                    Err(e) => warn!(
                        error = %e,
                        duration_ms = cycle_start.elapsed().as_millis(),
                        "Metrics collection cycle failed, keeping previous snapshot"
                    ),
                }
            }
        });

        Ok(())
    }

    /// Run one collection cycle and publish its result
    ///
    /// Scrape and parse failures abort the cycle. A pod mapping failure only
    /// costs this cycle's attribution: the samples are published unannotated.
    pub async fn collect_once(&self) -> Result<usize> {
        let text = self
            .upstream
            .fetch()
            .await
            .with_context(|| format!("failed to scrape {}", self.upstream.endpoint()))?;
        debug!(bytes = text.len(), "Received upstream metrics");

        let parsed = PrometheusMetrics::parse(&text).context("failed to parse upstream metrics")?;
        let mut metrics = telemetry::from_prometheus(&parsed);
        let topology = GpuTopology::from_metrics(&metrics);
        if topology.is_empty() {
            debug!("No GPU index/UUID labels upstream, MIG devices cannot be keyed by GPU instance");
        }
        debug!(
            counters = metrics.len(),
            gpus = topology.len(),
            "Parsed upstream metrics"
        );

        if let Err(e) = self.pod_mapper.process(&mut metrics, &topology).await {
            warn!(
                mapper = self.pod_mapper.name(),
                error = %e,
                "Pod attribution failed, publishing unannotated metrics"
            );
        }

        let sample_count = metrics.values().map(Vec::len).sum();
        self.metrics_cache
            .publish(telemetry::render(&metrics), sample_count)
            .await;
        Ok(sample_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;
    use crate::mapper::mig::UnavailableMigResolver;
    use crate::utils::upstream_client::UpstreamEndpoint;
    use std::io::Write;

    fn collector(upstream: UpstreamEndpoint, socket: std::path::PathBuf) -> MetricsCollector {
        let mapper = PodMapper::new(
            MapperConfig::with_socket(socket),
            Arc::new(UnavailableMigResolver),
        );
        MetricsCollector::new(
            UpstreamClient::new(upstream).unwrap(),
            Arc::new(mapper),
            Arc::new(MetricsCache::new()),
            30,
        )
    }

    #[tokio::test]
    async fn test_collect_once_publishes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"# HELP DCGM_FI_DEV_GPU_TEMP GPU temperature (in C).\n\
              # TYPE DCGM_FI_DEV_GPU_TEMP gauge\n\
              DCGM_FI_DEV_GPU_TEMP{gpu=\"0\",UUID=\"GPU-1\",device=\"nvidia0\"} 40\n\
              DCGM_FI_DEV_GPU_TEMP{gpu=\"1\",UUID=\"GPU-2\",device=\"nvidia1\"} 42\n",
        )
        .unwrap();

        let collector = collector(
            UpstreamEndpoint::File {
                path: file.path().to_path_buf(),
            },
            dir.path().join("kubelet.sock"),
        );

        let count = collector.collect_once().await.unwrap();
        assert_eq!(count, 2);

        let snapshot = collector.metrics_cache.get_metrics().await.unwrap();
        assert!(snapshot.text.contains("# TYPE DCGM_FI_DEV_GPU_TEMP gauge"));
        assert!(snapshot
            .text
            .contains("DCGM_FI_DEV_GPU_TEMP{gpu=\"1\",UUID=\"GPU-2\",device=\"nvidia1\"} 42"));
    }

    #[tokio::test]
    async fn test_collect_once_fails_without_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector(
            UpstreamEndpoint::File {
                path: dir.path().join("missing.prom"),
            },
            dir.path().join("kubelet.sock"),
        );

        assert!(collector.collect_once().await.is_err());
        assert!(collector.metrics_cache.get_metrics().await.is_none());
    }

    #[tokio::test]
    async fn test_mapping_failure_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("kubelet.sock");
        std::fs::write(&socket, b"").unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"DCGM_FI_DEV_GPU_UTIL{gpu=\"0\",UUID=\"GPU-1\"} 7\n")
            .unwrap();

        let mapper = PodMapper::new(
            MapperConfig {
                timeout: Duration::from_secs(2),
                ..MapperConfig::with_socket(&socket)
            },
            Arc::new(UnavailableMigResolver),
        );
        let collector = MetricsCollector::new(
            UpstreamClient::new(UpstreamEndpoint::File {
                path: file.path().to_path_buf(),
            })
            .unwrap(),
            Arc::new(mapper),
            Arc::new(MetricsCache::new()),
            30,
        );

        assert_eq!(collector.collect_once().await.unwrap(), 1);
        let snapshot = collector.metrics_cache.get_metrics().await.unwrap();
        assert!(snapshot.text.contains("DCGM_FI_DEV_GPU_UTIL{gpu=\"0\",UUID=\"GPU-1\"} 7"));
        assert!(!snapshot.text.contains("pod="));
    }
}
