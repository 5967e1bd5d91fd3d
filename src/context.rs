//! Application context and dependency injection
//!
//! All services are created once during startup and shared through this
//! context by the collector task and the HTTP handlers.

use anyhow::Result;
use std::sync::Arc;

use crate::config::MapperConfig;
use crate::mapper::mig::MigHierarchyResolver;
use crate::mapper::PodMapper;
use crate::monitor::metrics_cache::MetricsCache;
use crate::monitor::metrics_collector::MetricsCollector;
use crate::utils::upstream_client::{UpstreamClient, UpstreamEndpoint};

/// Application context holding all singleton instances
#[derive(Clone)]
pub struct AppContext {
    /// Latest rendered metrics snapshot
    metrics_cache: Arc<MetricsCache>,

    /// Periodic scrape, attribution and publication
    metrics_collector: Arc<MetricsCollector>,
}

impl AppContext {
    /// Create a new application context with all singletons initialized
    pub fn new(
        upstream_endpoint: &str,
        collect_interval_secs: u64,
        mapper_config: MapperConfig,
        mig_resolver: Arc<dyn MigHierarchyResolver>,
    ) -> Result<Self> {
        tracing::info!("Initializing application context");

        if upstream_endpoint.is_empty() {
            return Err(anyhow::anyhow!("upstream endpoint missing"));
        }

        if collect_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "collect_interval_secs must be > 0, got {}",
                collect_interval_secs
            ));
        }

        let upstream = UpstreamClient::new(UpstreamEndpoint::parse(upstream_endpoint)?)?;

        let metrics_cache = Arc::new(MetricsCache::new());
        let pod_mapper = Arc::new(PodMapper::new(mapper_config, mig_resolver));

        let metrics_collector = Arc::new(MetricsCollector::new(
            upstream,
            pod_mapper,
            metrics_cache.clone(),
            collect_interval_secs,
        ));
        tracing::info!("Metrics collector initialized");

        Ok(AppContext {
            metrics_cache,
            metrics_collector,
        })
    }

    /// Spawn the periodic metrics collection task
    pub fn start(&self) -> Result<()> {
        let metrics_collector = self.metrics_collector.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_collector.start().await {
                tracing::error!(error = %e, "Metrics collector error");
            }
        });

        Ok(())
    }

    /// Get reference to the metrics cache
    pub fn metrics_cache(&self) -> &Arc<MetricsCache> {
        &self.metrics_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::mig::UnavailableMigResolver;

    const UPSTREAM: &str = "http://localhost:9400/metrics";

    fn context(upstream: &str, interval: u64) -> Result<AppContext> {
        AppContext::new(
            upstream,
            interval,
            MapperConfig::default(),
            Arc::new(UnavailableMigResolver),
        )
    }

    #[test]
    fn test_app_context_creation() {
        let ctx = context(UPSTREAM, 1).unwrap();
        let _ = ctx.metrics_cache();
    }

    #[test]
    fn test_app_context_clone() {
        let context = context(UPSTREAM, 1).unwrap();
        let cloned = context.clone();

        let ptr1 = Arc::as_ptr(context.metrics_cache());
        let ptr2 = Arc::as_ptr(cloned.metrics_cache());
        assert_eq!(ptr1, ptr2);
    }

    #[test]
    fn test_app_context_empty_upstream() {
        assert!(context("", 1).is_err());
    }

    #[test]
    fn test_app_context_invalid_upstream() {
        assert!(context("ftp://exporter/metrics", 1).is_err());
    }

    #[test]
    fn test_app_context_zero_interval() {
        assert!(
            context(UPSTREAM, 0).is_err(),
            "Should reject zero collect_interval_secs"
        );
    }
}
