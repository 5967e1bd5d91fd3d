use crate::config::{
    DeviceIdConvention, CONTAINER_ATTRIBUTE, NAMESPACE_ATTRIBUTE, OLD_CONTAINER_ATTRIBUTE,
    OLD_NAMESPACE_ATTRIBUTE, OLD_POD_ATTRIBUTE, POD_ATTRIBUTE, VGPU_ATTRIBUTE,
};
use crate::telemetry::{MetricsByCounter, TelemetrySample};

use super::index::{WorkloadIndex, WorkloadRecord};

/// Writes workload attributes onto telemetry samples
#[derive(Debug, Clone, Copy)]
pub struct MetricAnnotator {
    gpu_id_type: DeviceIdConvention,
    use_old_namespace: bool,
}

impl MetricAnnotator {
    pub fn new(gpu_id_type: DeviceIdConvention, use_old_namespace: bool) -> Self {
        MetricAnnotator {
            gpu_id_type,
            use_old_namespace,
        }
    }

    /// Annotate every counter's samples with the workloads holding their device
    ///
    /// With an exclusive index samples are annotated in place and unmatched
    /// samples are left alone. With a shared index each counter's samples are
    /// replaced by one copy per matching workload, so unmatched samples vanish.
    pub fn annotate(&self, metrics: &mut MetricsByCounter, index: &WorkloadIndex) {
        match index {
            WorkloadIndex::Exclusive(map) => {
                for sample in metrics.values_mut().flatten() {
                    let device_id = sample.id_of_type(self.gpu_id_type);
                    if let Some(record) = map.get(&device_id) {
                        self.write_workload(sample, record);
                    }
                }
            }
            WorkloadIndex::Shared(_) => {
                for samples in metrics.values_mut() {
                    *samples = self.expand_shared(samples, index);
                }
            }
        }
    }

    /// One annotated copy of each sample per workload sharing its device
    pub fn expand_shared(
        &self,
        samples: &[TelemetrySample],
        index: &WorkloadIndex,
    ) -> Vec<TelemetrySample> {
        samples
            .iter()
            .flat_map(|sample| {
                let device_id = sample.id_of_type(self.gpu_id_type);
                index.workloads(&device_id).iter().map(move |record| {
                    let mut copy = sample.clone();
                    self.write_workload(&mut copy, record);
                    if let Some(vgpu) = record.vgpu.as_deref().filter(|v| !v.is_empty()) {
                        copy.attributes
                            .insert(VGPU_ATTRIBUTE.to_string(), vgpu.to_string());
                    }
                    copy
                })
            })
            .collect()
    }

    fn write_workload(&self, sample: &mut TelemetrySample, record: &WorkloadRecord) {
        let (pod, namespace, container) = if self.use_old_namespace {
            (
                OLD_POD_ATTRIBUTE,
                OLD_NAMESPACE_ATTRIBUTE,
                OLD_CONTAINER_ATTRIBUTE,
            )
        } else {
            (POD_ATTRIBUTE, NAMESPACE_ATTRIBUTE, CONTAINER_ATTRIBUTE)
        };

        let attributes = &mut sample.attributes;
        attributes.insert(pod.to_string(), record.name.clone());
        attributes.insert(namespace.to_string(), record.namespace.clone());
        attributes.insert(container.to_string(), record.container.clone());
    }
}
