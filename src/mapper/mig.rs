//! MIG partition hierarchy lookup
//!
//! Maps a MIG device UUID to the physical GPU it lives on and its GPU/compute
//! instance IDs. Lookups are allowed to fail: callers fall back to the keys
//! they can derive without the hierarchy.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Placement of a MIG partition on its parent GPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigDeviceInfo {
    pub parent_uuid: String,
    pub gpu_instance_id: u32,
    #[serde(default)]
    pub compute_instance_id: u32,
}

/// Resolves a MIG device UUID (with its `MIG-` prefix) to its hierarchy
pub trait MigHierarchyResolver: Send + Sync {
    fn resolve(&self, mig_uuid: &str) -> Result<MigDeviceInfo>;
}

/// Resolver used when no hierarchy source is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableMigResolver;

impl MigHierarchyResolver for UnavailableMigResolver {
    fn resolve(&self, mig_uuid: &str) -> Result<MigDeviceInfo> {
        Err(anyhow!(
            "no MIG hierarchy source configured, cannot resolve {}",
            mig_uuid
        ))
    }
}

/// Resolver backed by a fixed table, usually loaded from a JSON file
///
/// File format:
/// ```json
/// {
///   "MIG-42f0f413-f7b0-58cc-aced-c1d1fb54db26": {
///     "parent_uuid": "GPU-5a5a7118-e550-79a1-597e-7631e126c57a",
///     "gpu_instance_id": 3,
///     "compute_instance_id": 0
///   }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticMigResolver {
    devices: HashMap<String, MigDeviceInfo>,
}

impl StaticMigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a MIG device to the table
    pub fn with_device(mut self, mig_uuid: impl Into<String>, info: MigDeviceInfo) -> Self {
        self.devices.insert(mig_uuid.into(), info);
        self
    }

    /// Parse the table from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let devices: HashMap<String, MigDeviceInfo> =
            serde_json::from_str(content).context("invalid MIG hierarchy document")?;
        Ok(StaticMigResolver { devices })
    }

    /// Load the table from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read MIG hierarchy file {}", path.display()))?;
        let resolver = Self::from_json(&content)
            .with_context(|| format!("failed to load MIG hierarchy file {}", path.display()))?;
        if resolver.is_empty() {
            tracing::warn!(path = %path.display(), "MIG hierarchy file lists no devices");
        } else {
            tracing::info!(
                path = %path.display(),
                mig_devices = resolver.len(),
                "Loaded MIG hierarchy"
            );
        }
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl MigHierarchyResolver for StaticMigResolver {
    fn resolve(&self, mig_uuid: &str) -> Result<MigDeviceInfo> {
        self.devices
            .get(mig_uuid)
            .cloned()
            .ok_or_else(|| anyhow!("unknown MIG device {}", mig_uuid))
    }
}
