use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

// HTTP endpoint paths
pub const METRICS_URL: &str = "/metrics";
pub const HEALTH_URL: &str = "/healthz";

// Kubelet pod-resources API
pub const DEFAULT_POD_RESOURCES_SOCKET: &str = "/var/lib/kubelet/pod-resources/kubelet.sock";
pub const POD_RESOURCES_TIMEOUT: Duration = Duration::from_secs(10);

// Device plugin resource names
pub const NVIDIA_RESOURCE_NAME: &str = "nvidia.com/gpu";
pub const NVIDIA_MIG_RESOURCE_PREFIX: &str = "nvidia.com/mig-";

// Attributes written onto annotated samples
pub const POD_ATTRIBUTE: &str = "pod";
pub const NAMESPACE_ATTRIBUTE: &str = "namespace";
pub const CONTAINER_ATTRIBUTE: &str = "container";
pub const VGPU_ATTRIBUTE: &str = "vgpu";

// Legacy attribute names, kept bit-for-bit for existing dashboards
pub const OLD_POD_ATTRIBUTE: &str = "pod_name";
pub const OLD_NAMESPACE_ATTRIBUTE: &str = "pod_namespace";
pub const OLD_CONTAINER_ATTRIBUTE: &str = "container_name";

/// Which sample field identifies a GPU when matching against kubelet device IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeviceIdConvention {
    /// Match on the GPU UUID
    #[default]
    #[value(name = "uid")]
    GpuUuid,
    /// Match on the device name (e.g. nvidia0)
    #[value(name = "device-name")]
    DeviceName,
}

impl std::fmt::Display for DeviceIdConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceIdConvention::GpuUuid => write!(f, "uid"),
            DeviceIdConvention::DeviceName => write!(f, "device-name"),
        }
    }
}

/// Configuration for the pod mapper
#[derive(Clone, Debug)]
pub struct MapperConfig {
    /// Path to the kubelet pod-resources socket
    pub pod_resources_socket: PathBuf,

    /// Connect and list timeout against the kubelet
    pub timeout: Duration,

    /// Device ID convention used by the telemetry samples
    pub gpu_id_type: DeviceIdConvention,

    /// Fan samples out per container sharing a GPU
    pub virtual_gpus: bool,

    /// Extra resource names accepted besides nvidia.com/gpu and MIG resources
    pub resource_names: Vec<String>,

    /// Write pod_name/pod_namespace/container_name instead of pod/namespace/container
    pub use_old_namespace: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            pod_resources_socket: PathBuf::from(DEFAULT_POD_RESOURCES_SOCKET),
            timeout: POD_RESOURCES_TIMEOUT,
            gpu_id_type: DeviceIdConvention::default(),
            virtual_gpus: false,
            resource_names: Vec::new(),
            use_old_namespace: false,
        }
    }
}

impl MapperConfig {
    /// Create a new config with the pod-resources socket path
    pub fn with_socket(socket: impl Into<PathBuf>) -> Self {
        MapperConfig {
            pod_resources_socket: socket.into(),
            ..Default::default()
        }
    }

    pub fn with_gpu_id_type(mut self, gpu_id_type: DeviceIdConvention) -> Self {
        self.gpu_id_type = gpu_id_type;
        self
    }

    pub fn with_virtual_gpus(mut self, enabled: bool) -> Self {
        self.virtual_gpus = enabled;
        self
    }

    pub fn with_resource_names(mut self, names: Vec<String>) -> Self {
        self.resource_names = names;
        self
    }

    pub fn with_old_namespace(mut self, enabled: bool) -> Self {
        self.use_old_namespace = enabled;
        self
    }

    /// Check whether a device plugin resource carries GPUs we attribute
    pub fn accepts_resource(&self, resource_name: &str) -> bool {
        resource_name == NVIDIA_RESOURCE_NAME
            || self.resource_names.iter().any(|name| name == resource_name)
            // MIG resources appear differently than GPU resources
            || resource_name.starts_with(NVIDIA_MIG_RESOURCE_PREFIX)
    }
}
