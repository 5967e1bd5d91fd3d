//! Kubernetes workload attribution for GPU telemetry
//!
//! Each cycle lists the devices the kubelet has handed to containers, turns
//! every device ID into the canonical keys telemetry may use for it, and
//! writes pod, namespace and container attributes onto matching samples.

pub mod annotator;
pub mod device_id;
pub mod index;
pub mod mig;
pub mod topology;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::MapperConfig;
use crate::monitor::pod_resources::ListPodResourcesResponse;
use crate::monitor::pod_resources_client::{PodResourcesClient, PodResourcesClientConfig};
use crate::telemetry::MetricsByCounter;

use annotator::MetricAnnotator;
use index::WorkloadIndexBuilder;
use mig::MigHierarchyResolver;
use topology::GpuTopology;

/// Attributes GPU telemetry to the Kubernetes workloads holding each device
pub struct PodMapper {
    config: MapperConfig,
    mig_resolver: Arc<dyn MigHierarchyResolver>,
}

impl PodMapper {
    pub fn new(config: MapperConfig, mig_resolver: Arc<dyn MigHierarchyResolver>) -> Self {
        info!(
            socket = %config.pod_resources_socket.display(),
            gpu_id_type = %config.gpu_id_type,
            virtual_gpus = config.virtual_gpus,
            "Kubernetes metrics collection enabled"
        );
        PodMapper {
            config,
            mig_resolver,
        }
    }

    pub fn name(&self) -> &'static str {
        "podMapper"
    }

    /// Annotate one cycle's samples with the workloads holding their devices
    ///
    /// A missing kubelet socket means Kubernetes integration is off and the
    /// samples are returned untouched. Connection and listing failures are
    /// returned to the caller and nothing is annotated.
    pub async fn process(
        &self,
        metrics: &mut MetricsByCounter,
        topology: &GpuTopology,
    ) -> Result<()> {
        let socket = &self.config.pod_resources_socket;
        if !tokio::fs::try_exists(socket).await.unwrap_or(false) {
            info!(socket = %socket.display(), "No Kubelet socket, ignoring");
            return Ok(());
        }

        let client_config = PodResourcesClientConfig::with_endpoint(socket.to_string_lossy())
            .with_timeout(self.config.timeout);
        let mut client = PodResourcesClient::new(client_config);
        client
            .connect()
            .await
            .context("failure connecting to kubelet pod-resources socket")?;
        let pods = client.list().await?;

        self.apply(&pods, metrics, topology);
        Ok(())
    }

    /// Annotate samples from an already fetched pod-resources snapshot
    pub fn apply(
        &self,
        pods: &ListPodResourcesResponse,
        metrics: &mut MetricsByCounter,
        topology: &GpuTopology,
    ) {
        let index =
            WorkloadIndexBuilder::new(&self.config, self.mig_resolver.as_ref()).build(pods, topology);

        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string(&index) {
                Ok(mapping) => debug!(devices = index.len(), %mapping, "Device to pod mapping"),
                Err(e) => debug!(error = %e, "Failed to serialize device to pod mapping"),
            }
        }

        MetricAnnotator::new(self.config.gpu_id_type, self.config.use_old_namespace)
            .annotate(metrics, &index);
    }
}
