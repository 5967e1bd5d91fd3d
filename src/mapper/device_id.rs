//! Device ID normalization
//!
//! Device plugins report allocated devices in several formats:
//!
//! | Format                  | Example                                 |
//! |-------------------------|-----------------------------------------|
//! | MIG UUID                | `MIG-42f0f413-f7b0-58cc-aced-c1d1fb54db26` |
//! | GKE MIG path            | `nvidia0/gi3`, `nvidia0/gi3/vgpu1`      |
//! | NVIDIA time-sliced GPU  | `GPU-5a5a7118-...::3`                   |
//! | GKE shared GPU          | `nvidia0/vgpu1`                         |
//! | Plain                   | `GPU-5a5a7118-...`, `nvidia0`           |
//!
//! Each raw ID is turned into every canonical key a telemetry sample might be
//! identified by, so samples match whichever convention produced them.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Display;
use tracing::debug;

use super::mig::MigHierarchyResolver;
use super::topology::GpuTopology;

pub const MIG_UUID_PREFIX: &str = "MIG-";
pub const GKE_VIRTUAL_GPU_SEPARATOR: &str = "/vgpu";
pub const SHARED_GPU_SEPARATOR: &str = "::";

// Allow for MIG devices with or without GPU sharing to match.
static GKE_MIG_DEVICE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^nvidia([0-9]+)/gi([0-9]+)(/vgpu[0-9]+)?$").expect("valid GKE MIG regex")
});

/// Key bridging MIG UUIDs and GKE MIG paths: `"<gpuIndex>-<instanceID>"`
pub fn gpu_instance_identifier(gpu_index: impl Display, instance_id: impl Display) -> String {
    format!("{}-{}", gpu_index, instance_id)
}

/// Extract the shared GPU slice from a device ID
///
/// GKE (`/vgpu`) is tried before the NVIDIA device plugin (`::`). The slice is
/// the segment right after the first separator and may be empty.
pub fn shared_gpu_slice(device_id: &str) -> Option<&str> {
    [GKE_VIRTUAL_GPU_SEPARATOR, SHARED_GPU_SEPARATOR]
        .into_iter()
        .find_map(|separator| device_id.split(separator).nth(1))
}

/// Classification of a raw device ID, first match wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIdFormat<'a> {
    /// `MIG-<uuid>[::<slice>]`
    MigUuid {
        /// Partition ID with prefix, sharing suffix removed
        partition: &'a str,
        /// Everything after the `MIG-` prefix
        bare: &'a str,
    },
    /// `nvidia<gpu>/gi<instance>[/vgpu<slice>]`
    GkeMig {
        gpu_index: &'a str,
        instance_id: &'a str,
    },
    /// `<base>::<slice>`
    DoubleColonShared { base: &'a str },
    /// `<base>/vgpu<slice>`
    SlashVgpuShared { base: &'a str },
    /// Anything else
    Plain,
}

impl<'a> DeviceIdFormat<'a> {
    pub fn classify(device_id: &'a str) -> Self {
        if let Some(bare) = device_id.strip_prefix(MIG_UUID_PREFIX) {
            let partition = split_base(device_id, SHARED_GPU_SEPARATOR);
            return DeviceIdFormat::MigUuid { partition, bare };
        }

        if let Some(captures) = GKE_MIG_DEVICE_ID_REGEX.captures(device_id) {
            if let (Some(gpu_index), Some(instance_id)) = (captures.get(1), captures.get(2)) {
                return DeviceIdFormat::GkeMig {
                    gpu_index: gpu_index.as_str(),
                    instance_id: instance_id.as_str(),
                };
            }
        }

        if device_id.contains(SHARED_GPU_SEPARATOR) {
            return DeviceIdFormat::DoubleColonShared {
                base: split_base(device_id, SHARED_GPU_SEPARATOR),
            };
        }

        if device_id.contains(GKE_VIRTUAL_GPU_SEPARATOR) {
            return DeviceIdFormat::SlashVgpuShared {
                base: split_base(device_id, GKE_VIRTUAL_GPU_SEPARATOR),
            };
        }

        DeviceIdFormat::Plain
    }
}

fn split_base<'a>(device_id: &'a str, separator: &str) -> &'a str {
    device_id.split(separator).next().unwrap_or(device_id)
}

/// Turns raw device IDs into canonical lookup keys
pub struct DeviceIdResolver<'a> {
    mig_resolver: &'a dyn MigHierarchyResolver,
    topology: &'a GpuTopology,
}

impl<'a> DeviceIdResolver<'a> {
    pub fn new(mig_resolver: &'a dyn MigHierarchyResolver, topology: &'a GpuTopology) -> Self {
        DeviceIdResolver {
            mig_resolver,
            topology,
        }
    }

    /// All canonical keys for a raw device ID, without duplicates
    ///
    /// The raw ID itself is always the last key.
    pub fn canonical_keys(&self, device_id: &str) -> Vec<String> {
        let mut keys = Vec::new();

        match DeviceIdFormat::classify(device_id) {
            DeviceIdFormat::MigUuid { partition, bare } => {
                if let Some(gi_identifier) = self.mig_gpu_instance(partition) {
                    push_unique(&mut keys, gi_identifier);
                }
                push_unique(&mut keys, bare.to_string());
                if let Some(bare_partition) = partition.strip_prefix(MIG_UUID_PREFIX) {
                    push_unique(&mut keys, bare_partition.to_string());
                }
                push_unique(&mut keys, partition.to_string());
            }
            DeviceIdFormat::GkeMig {
                gpu_index,
                instance_id,
            } => {
                push_unique(&mut keys, gpu_instance_identifier(gpu_index, instance_id));
            }
            DeviceIdFormat::DoubleColonShared { base }
            | DeviceIdFormat::SlashVgpuShared { base } => {
                push_unique(&mut keys, base.to_string());
            }
            DeviceIdFormat::Plain => {}
        }

        // Default mapping between device ID and pod information
        push_unique(&mut keys, device_id.to_string());
        keys
    }

    /// GPU instance key for a MIG partition, if its hierarchy can be resolved
    fn mig_gpu_instance(&self, partition: &str) -> Option<String> {
        let info = match self.mig_resolver.resolve(partition) {
            Ok(info) => info,
            Err(e) => {
                debug!(device_id = %partition, error = %e, "MIG hierarchy lookup failed");
                return None;
            }
        };

        match self.topology.gpu_index(&info.parent_uuid) {
            Some(gpu_index) => Some(gpu_instance_identifier(gpu_index, info.gpu_instance_id)),
            None => {
                debug!(
                    device_id = %partition,
                    parent_uuid = %info.parent_uuid,
                    "Parent GPU of MIG device not in topology"
                );
                None
            }
        }
    }
}

fn push_unique(keys: &mut Vec<String>, key: String) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}
