//! GPU telemetry samples
//!
//! Samples scraped from the upstream GPU exporter are grouped per counter.
//! The well-known device labels are lifted into typed fields so the pod
//! mapper can derive a sample's device identity; every other label stays in
//! the attribute map, which is also where pod attribution is written.

use std::collections::BTreeMap;

use crate::config::DeviceIdConvention;
use crate::mapper::device_id::gpu_instance_identifier;
use crate::utils::prometheus_parser::{escape_label_value, format_value, PrometheusMetrics};

// Device labels used by the upstream exporter
pub const GPU_LABEL: &str = "gpu";
pub const UUID_LABEL: &str = "UUID";
pub const DEVICE_LABEL: &str = "device";
pub const GPU_INSTANCE_ID_LABEL: &str = "GPU_I_ID";
pub const GPU_PROFILE_LABEL: &str = "GPU_I_PROFILE";

/// Metric definition shared by all samples of a family
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Counter {
    pub field_name: String,
    pub prom_type: String,
    pub help: String,
}

/// A single per-device reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySample {
    pub counter: Counter,
    /// Exposed sample name, e.g. `<family>_bucket`; empty means the counter name
    pub name: String,
    pub gpu: String,
    pub gpu_uuid: String,
    pub gpu_device: String,
    pub gpu_instance_id: String,
    pub value: String,
    pub mig_profile: String,
    pub attributes: BTreeMap<String, String>,
    pub timestamp: Option<i64>,
}

/// Samples grouped per counter, ordered by counter
pub type MetricsByCounter = BTreeMap<Counter, Vec<TelemetrySample>>;

impl TelemetrySample {
    /// Name the sample is exposed under
    pub fn exposed_name(&self) -> &str {
        if self.name.is_empty() {
            &self.counter.field_name
        } else {
            &self.name
        }
    }

    /// Identity used to look this sample up in the workload index
    ///
    /// MIG samples are always identified by their GPU instance, whatever the
    /// configured convention.
    pub fn id_of_type(&self, convention: DeviceIdConvention) -> String {
        if !self.mig_profile.is_empty() {
            return gpu_instance_identifier(&self.gpu, &self.gpu_instance_id);
        }
        match convention {
            DeviceIdConvention::GpuUuid => self.gpu_uuid.clone(),
            DeviceIdConvention::DeviceName => self.gpu_device.clone(),
        }
    }
}

/// Build per-counter samples from parsed exposition text
pub fn from_prometheus(metrics: &PrometheusMetrics) -> MetricsByCounter {
    let mut by_counter = MetricsByCounter::new();

    for family in &metrics.families {
        if family.samples.is_empty() {
            continue;
        }

        let counter = Counter {
            field_name: family.name.clone(),
            prom_type: family.metric_type.clone().unwrap_or_default(),
            help: family.help.clone().unwrap_or_default(),
        };

        let samples = by_counter.entry(counter.clone()).or_default();
        for sample in &family.samples {
            let mut attributes: BTreeMap<String, String> = sample
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut take = |label: &str| attributes.remove(label).unwrap_or_default();

            samples.push(TelemetrySample {
                counter: counter.clone(),
                name: sample.name.clone(),
                gpu: take(GPU_LABEL),
                gpu_uuid: take(UUID_LABEL),
                gpu_device: take(DEVICE_LABEL),
                gpu_instance_id: take(GPU_INSTANCE_ID_LABEL),
                mig_profile: take(GPU_PROFILE_LABEL),
                value: format_value(sample.value),
                attributes,
                timestamp: sample.timestamp,
            });
        }
    }

    by_counter
}

/// Render samples back to Prometheus text format
///
/// Counters without samples are omitted. Device labels come first in a fixed
/// order, attributes follow sorted by name.
pub fn render(metrics: &MetricsByCounter) -> String {
    let mut output = String::new();

    for (counter, samples) in metrics {
        if samples.is_empty() {
            continue;
        }

        if !counter.help.is_empty() {
            output.push_str(&format!("# HELP {} {}\n", counter.field_name, counter.help));
        }
        if !counter.prom_type.is_empty() {
            output.push_str(&format!(
                "# TYPE {} {}\n",
                counter.field_name, counter.prom_type
            ));
        }

        for sample in samples {
            let device_labels = [
                (GPU_LABEL, &sample.gpu),
                (UUID_LABEL, &sample.gpu_uuid),
                (DEVICE_LABEL, &sample.gpu_device),
                (GPU_PROFILE_LABEL, &sample.mig_profile),
                (GPU_INSTANCE_ID_LABEL, &sample.gpu_instance_id),
            ];

            let labels: Vec<String> = device_labels
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name, value.as_str()))
                .chain(
                    sample
                        .attributes
                        .iter()
                        .map(|(name, value)| (name.as_str(), value.as_str())),
                )
                .map(|(name, value)| format!(r#"{}="{}""#, name, escape_label_value(value)))
                .collect();

            output.push_str(sample.exposed_name());
            if !labels.is_empty() {
                output.push('{');
                output.push_str(&labels.join(","));
                output.push('}');
            }
            output.push(' ');
            output.push_str(&sample.value);
            if let Some(timestamp) = sample.timestamp {
                output.push_str(&format!(" {}", timestamp));
            }
            output.push('\n');
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = r#"# HELP DCGM_FI_DEV_POWER_USAGE Power draw (in W).
# TYPE DCGM_FI_DEV_POWER_USAGE gauge
DCGM_FI_DEV_POWER_USAGE{gpu="0",UUID="GPU-5a5a7118-e550-79a1-597e-7631e126c57a",device="nvidia0",modelName="NVIDIA A100"} 61.5
DCGM_FI_DEV_POWER_USAGE{gpu="1",UUID="GPU-b8ea3855-276c-c9cb-b366-c6fa655957c5",device="nvidia1",modelName="NVIDIA A100",GPU_I_PROFILE="1g.10gb",GPU_I_ID="3"} 20
# HELP DCGM_FI_DEV_SM_CLOCK SM clock frequency (in MHz).
# TYPE DCGM_FI_DEV_SM_CLOCK gauge
DCGM_FI_DEV_SM_CLOCK{gpu="0",UUID="GPU-5a5a7118-e550-79a1-597e-7631e126c57a",device="nvidia0",modelName="NVIDIA A100"} 1410
"#;

    fn sample(gpu: &str, uuid: &str, device: &str) -> TelemetrySample {
        TelemetrySample {
            gpu: gpu.to_string(),
            gpu_uuid: uuid.to_string(),
            gpu_device: device.to_string(),
            gpu_instance_id: "0".to_string(),
            value: "42".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_id_of_type_uuid() {
        let s = sample("0", "GPU-abc", "nvidia0");
        assert_eq!(s.id_of_type(DeviceIdConvention::GpuUuid), "GPU-abc");
    }

    #[test]
    fn test_id_of_type_device_name() {
        let s = sample("0", "GPU-abc", "nvidia0");
        assert_eq!(s.id_of_type(DeviceIdConvention::DeviceName), "nvidia0");
    }

    #[test]
    fn test_id_of_type_mig_uses_gpu_instance() {
        let mut s = sample("1", "GPU-abc", "nvidia1");
        s.mig_profile = "1g.10gb".to_string();
        s.gpu_instance_id = "3".to_string();

        assert_eq!(s.id_of_type(DeviceIdConvention::GpuUuid), "1-3");
        assert_eq!(s.id_of_type(DeviceIdConvention::DeviceName), "1-3");
    }

    #[test]
    fn test_from_prometheus_lifts_device_labels() {
        let parsed = PrometheusMetrics::parse(EXPOSITION).unwrap();
        let metrics = from_prometheus(&parsed);
        assert_eq!(metrics.len(), 2);

        let (counter, samples) = metrics
            .iter()
            .find(|(c, _)| c.field_name == "DCGM_FI_DEV_POWER_USAGE")
            .unwrap();
        assert_eq!(counter.prom_type, "gauge");
        assert_eq!(counter.help, "Power draw (in W).");
        assert_eq!(samples.len(), 2);

        let first = &samples[0];
        assert_eq!(first.gpu, "0");
        assert_eq!(first.gpu_uuid, "GPU-5a5a7118-e550-79a1-597e-7631e126c57a");
        assert_eq!(first.gpu_device, "nvidia0");
        assert_eq!(first.value, "61.5");
        assert!(first.mig_profile.is_empty());
        assert_eq!(first.attributes.get("modelName").unwrap(), "NVIDIA A100");
        assert!(!first.attributes.contains_key(UUID_LABEL));

        let mig = &samples[1];
        assert_eq!(mig.mig_profile, "1g.10gb");
        assert_eq!(mig.gpu_instance_id, "3");
        assert_eq!(mig.id_of_type(DeviceIdConvention::GpuUuid), "1-3");
    }

    #[test]
    fn test_render_is_deterministic() {
        let parsed = PrometheusMetrics::parse(EXPOSITION).unwrap();
        let mut metrics = from_prometheus(&parsed);
        for samples in metrics.values_mut() {
            samples[0]
                .attributes
                .insert("pod".to_string(), "gpu-pod-0".to_string());
        }

        let output = render(&metrics);
        assert!(output.contains("# TYPE DCGM_FI_DEV_POWER_USAGE gauge\n"));
        assert!(output.contains(
            r#"DCGM_FI_DEV_SM_CLOCK{gpu="0",UUID="GPU-5a5a7118-e550-79a1-597e-7631e126c57a",device="nvidia0",modelName="NVIDIA A100",pod="gpu-pod-0"} 1410"#
        ));
        assert!(output.contains(
            r#"DCGM_FI_DEV_POWER_USAGE{gpu="1",UUID="GPU-b8ea3855-276c-c9cb-b366-c6fa655957c5",device="nvidia1",GPU_I_PROFILE="1g.10gb",GPU_I_ID="3",modelName="NVIDIA A100"} 20"#
        ));
        assert_eq!(output, render(&metrics));
    }

    #[test]
    fn test_render_keeps_sample_suffixes() {
        let exposition = r#"# HELP DCGM_EXP_XID_ERRORS_LATENCY Xid handling latency.
# TYPE DCGM_EXP_XID_ERRORS_LATENCY histogram
DCGM_EXP_XID_ERRORS_LATENCY_bucket{gpu="0",le="1"} 3
DCGM_EXP_XID_ERRORS_LATENCY_bucket{gpu="0",le="+Inf"} 4
DCGM_EXP_XID_ERRORS_LATENCY_sum{gpu="0"} 2.5
DCGM_EXP_XID_ERRORS_LATENCY_count{gpu="0"} 4
# HELP DCGM_FI_DEV_XID_ERRORS Xid errors seen.
# TYPE DCGM_FI_DEV_XID_ERRORS counter
DCGM_FI_DEV_XID_ERRORS_total{gpu="0"} 7 1700000000000
"#;
        let metrics = from_prometheus(&PrometheusMetrics::parse(exposition).unwrap());
        let output = render(&metrics);

        assert!(output.contains("# TYPE DCGM_EXP_XID_ERRORS_LATENCY histogram\n"));
        assert!(output.contains(r#"DCGM_EXP_XID_ERRORS_LATENCY_bucket{gpu="0",le="1"} 3"#));
        assert!(output.contains(r#"DCGM_EXP_XID_ERRORS_LATENCY_bucket{gpu="0",le="+Inf"} 4"#));
        assert!(output.contains("DCGM_EXP_XID_ERRORS_LATENCY_sum{gpu=\"0\"} 2.5\n"));
        assert!(output.contains("DCGM_EXP_XID_ERRORS_LATENCY_count{gpu=\"0\"} 4\n"));
        assert!(output.contains("DCGM_FI_DEV_XID_ERRORS_total{gpu=\"0\"} 7 1700000000000\n"));

        // Every rendered series is unique
        let series: Vec<&str> = output
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.rsplit_once(' ').map(|(series, _)| series))
            .collect();
        let unique: std::collections::HashSet<&str> = series.iter().copied().collect();
        assert_eq!(series.len(), unique.len());
    }

    #[test]
    fn test_render_falls_back_to_counter_name() {
        let counter = Counter {
            field_name: "DCGM_FI_DEV_GPU_TEMP".to_string(),
            prom_type: "gauge".to_string(),
            help: String::new(),
        };
        let mut metrics = MetricsByCounter::new();
        metrics.insert(
            counter.clone(),
            vec![TelemetrySample {
                counter,
                gpu: "0".to_string(),
                value: "40".to_string(),
                ..Default::default()
            }],
        );
        assert!(render(&metrics).contains("DCGM_FI_DEV_GPU_TEMP{gpu=\"0\"} 40\n"));
    }

    #[test]
    fn test_render_skips_empty_counters() {
        let mut metrics = MetricsByCounter::new();
        metrics.insert(
            Counter {
                field_name: "DCGM_FI_DEV_GPU_TEMP".to_string(),
                prom_type: "gauge".to_string(),
                help: "GPU temperature (in C).".to_string(),
            },
            Vec::new(),
        );
        assert!(render(&metrics).is_empty());
    }
}
