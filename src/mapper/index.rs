//! Canonical device key to workload index
//!
//! Built from scratch from one pod-resources snapshot every cycle. In exclusive
//! mode a key maps to a single workload and later device IDs overwrite earlier
//! ones. In shared mode every workload holding the device is kept, in the
//! order the kubelet enumerated them.

use serde::Serialize;
use std::collections::HashMap;

use super::device_id::{shared_gpu_slice, DeviceIdResolver};
use super::mig::MigHierarchyResolver;
use super::topology::GpuTopology;
use crate::config::MapperConfig;
use crate::monitor::pod_resources::ListPodResourcesResponse;

/// Container holding a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadRecord {
    pub name: String,
    pub namespace: String,
    pub container: String,
    /// Shared GPU slice, when the device ID carries one
    pub vgpu: Option<String>,
}

/// Device key to workload index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadIndex {
    Exclusive(HashMap<String, WorkloadRecord>),
    Shared(HashMap<String, Vec<WorkloadRecord>>),
}

impl WorkloadIndex {
    fn new(shared: bool) -> Self {
        if shared {
            WorkloadIndex::Shared(HashMap::new())
        } else {
            WorkloadIndex::Exclusive(HashMap::new())
        }
    }

    fn insert(&mut self, key: String, record: WorkloadRecord) {
        match self {
            WorkloadIndex::Exclusive(map) => {
                map.insert(key, record);
            }
            WorkloadIndex::Shared(map) => map.entry(key).or_default().push(record),
        }
    }

    /// Number of distinct device keys
    pub fn len(&self) -> usize {
        match self {
            WorkloadIndex::Exclusive(map) => map.len(),
            WorkloadIndex::Shared(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workloads holding the device identified by `key`
    pub fn workloads(&self, key: &str) -> &[WorkloadRecord] {
        match self {
            WorkloadIndex::Exclusive(map) => map.get(key).map(std::slice::from_ref).unwrap_or(&[]),
            WorkloadIndex::Shared(map) => map.get(key).map(Vec::as_slice).unwrap_or(&[]),
        }
    }
}

/// Builds the workload index from a pod-resources snapshot
pub struct WorkloadIndexBuilder<'a> {
    config: &'a MapperConfig,
    mig_resolver: &'a dyn MigHierarchyResolver,
}

impl<'a> WorkloadIndexBuilder<'a> {
    pub fn new(config: &'a MapperConfig, mig_resolver: &'a dyn MigHierarchyResolver) -> Self {
        WorkloadIndexBuilder {
            config,
            mig_resolver,
        }
    }

    pub fn build(&self, pods: &ListPodResourcesResponse, topology: &GpuTopology) -> WorkloadIndex {
        let resolver = DeviceIdResolver::new(self.mig_resolver, topology);
        let mut index = WorkloadIndex::new(self.config.virtual_gpus);

        for pod in &pods.pod_resources {
            for container in &pod.containers {
                for device in &container.devices {
                    if !self.config.accepts_resource(&device.resource_name) {
                        continue;
                    }

                    for device_id in &device.device_ids {
                        let record = WorkloadRecord {
                            name: pod.name.clone(),
                            namespace: pod.namespace.clone(),
                            container: container.name.clone(),
                            vgpu: shared_gpu_slice(device_id).map(str::to_string),
                        };

                        for key in resolver.canonical_keys(device_id) {
                            index.insert(key, record.clone());
                        }
                    }
                }
            }
        }

        index
    }
}
