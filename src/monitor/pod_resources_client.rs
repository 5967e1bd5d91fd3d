//! Kubelet pod-resources gRPC client
//!
//! Lists the devices the kubelet has assigned to every running container,
//! over the node-local pod-resources unix socket. Every call is bounded by the
//! configured timeout and there are no retries: a failed cycle is simply
//! reported to the caller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use hyper_util::rt::TokioIo;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, warn};

use super::pod_resources::pod_resources_lister_client::PodResourcesListerClient;
use super::pod_resources::{ListPodResourcesRequest, ListPodResourcesResponse};
use crate::config::{DEFAULT_POD_RESOURCES_SOCKET, POD_RESOURCES_TIMEOUT};

/// Configuration for the pod-resources client
#[derive(Clone, Debug)]
pub struct PodResourcesClientConfig {
    /// Path to the kubelet pod-resources socket
    pub endpoint: PathBuf,

    /// Connect and request timeout
    pub timeout: Duration,
}

impl Default for PodResourcesClientConfig {
    fn default() -> Self {
        PodResourcesClientConfig {
            endpoint: PathBuf::from(DEFAULT_POD_RESOURCES_SOCKET),
            timeout: POD_RESOURCES_TIMEOUT,
        }
    }
}

impl PodResourcesClientConfig {
    /// Create a new config with endpoint
    ///
    /// Accepts both "unix:///path" and "/path".
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let path = endpoint
            .strip_prefix("unix://")
            .unwrap_or(&endpoint)
            .to_string();
        PodResourcesClientConfig {
            endpoint: PathBuf::from(path),
            ..Default::default()
        }
    }

    /// Set the connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Pod-resources client bound to one kubelet socket
pub struct PodResourcesClient {
    config: PodResourcesClientConfig,
    channel: Option<Channel>,
}

impl PodResourcesClient {
    pub fn new(config: PodResourcesClientConfig) -> Self {
        PodResourcesClient {
            config,
            channel: None,
        }
    }

    /// Connect to the kubelet socket
    pub async fn connect(&mut self) -> Result<()> {
        debug!(
            endpoint = %self.config.endpoint.display(),
            timeout_ms = self.config.timeout.as_millis(),
            "Connecting to kubelet pod-resources socket"
        );

        let socket_path = self.config.endpoint.clone();

        // The URI is ignored by the connector, every connection goes to the socket
        let endpoint = Endpoint::try_from("http://[::]:50051")?
            .connect_timeout(self.config.timeout)
            .timeout(self.config.timeout);

        let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                tokio::net::UnixStream::connect(socket_path)
                    .await
                    .map(TokioIo::new)
            }
        }));

        match tokio::time::timeout(self.config.timeout, connect).await {
            Ok(Ok(channel)) => {
                debug!(endpoint = %self.config.endpoint.display(), "Connected to kubelet");
                self.channel = Some(channel);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(
                    endpoint = %self.config.endpoint.display(),
                    error = %e,
                    "gRPC channel creation failed"
                );
                Err(anyhow!(
                    "failure connecting to '{}': {}",
                    self.config.endpoint.display(),
                    e
                ))
            }
            Err(_) => {
                warn!(
                    endpoint = %self.config.endpoint.display(),
                    timeout_secs = self.config.timeout.as_secs(),
                    "Connection timeout - kubelet is not responding within timeout period"
                );
                Err(anyhow!(
                    "timeout connecting to '{}' ({}s)",
                    self.config.endpoint.display(),
                    self.config.timeout.as_secs()
                ))
            }
        }
    }

    /// List the devices assigned to every pod on the node
    pub async fn list(&self) -> Result<ListPodResourcesResponse> {
        let channel = self
            .channel
            .clone()
            .ok_or_else(|| anyhow!("pod-resources client not connected. Call connect() first."))?;
        let mut client = PodResourcesListerClient::new(channel);

        debug!("Sending List request to kubelet pod-resources API");
        let response = tokio::time::timeout(
            self.config.timeout,
            client.list(ListPodResourcesRequest {}),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "failure getting pod resources: timed out after {}s",
                self.config.timeout.as_secs()
            )
        })?
        .map_err(|e| anyhow!("failure getting pod resources: {}", e))?;

        let pods = response.into_inner();
        debug!(pod_count = pods.pod_resources.len(), "Retrieved pod resources");
        Ok(pods)
    }
}
