use std::collections::HashMap;

use crate::telemetry::MetricsByCounter;

/// GPU UUID to GPU index mapping for the node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuTopology {
    gpus: HashMap<String, u32>,
}

impl GpuTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uuid: impl Into<String>, index: u32) {
        self.gpus.insert(uuid.into(), index);
    }

    pub fn gpu_index(&self, uuid: &str) -> Option<u32> {
        self.gpus.get(uuid).copied()
    }

    pub fn len(&self) -> usize {
        self.gpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gpus.is_empty()
    }

    /// Derive the topology from the device fields of scraped samples
    ///
    /// MIG samples carry their parent GPU's UUID and index, so they contribute
    /// the same entries as whole-GPU samples.
    pub fn from_metrics(metrics: &MetricsByCounter) -> Self {
        metrics
            .values()
            .flatten()
            .filter(|sample| !sample.gpu_uuid.is_empty())
            .filter_map(|sample| {
                sample
                    .gpu
                    .parse::<u32>()
                    .ok()
                    .map(|index| (sample.gpu_uuid.clone(), index))
            })
            .collect()
    }
}

impl FromIterator<(String, u32)> for GpuTopology {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        GpuTopology {
            gpus: iter.into_iter().collect(),
        }
    }
}
