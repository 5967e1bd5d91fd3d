pub mod metrics_cache;
pub mod metrics_collector;
pub mod pod_resources;
pub mod pod_resources_client;
