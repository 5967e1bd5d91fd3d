use anyhow::Result;
use std::collections::HashMap;

/// Suffixes a sample name may carry on top of its family name
const FAMILY_SUFFIXES: &[&str] = &["_total", "_count", "_sum", "_bucket"];

/// A metric family as declared by its HELP/TYPE lines
#[derive(Clone, Debug, Default)]
pub struct MetricFamily {
    /// Family name
    pub name: String,
    /// Metric type (counter, gauge, histogram, summary, etc.)
    pub metric_type: Option<String>,
    /// Metric help/description
    pub help: Option<String>,
    /// Samples for this family, in exposition order
    pub samples: Vec<MetricSample>,
}

/// Represents a single sample of a metric with its labels and value
#[derive(Clone, Debug)]
pub struct MetricSample {
    /// Full sample name with suffix (e.g., "requests_total")
    pub name: String,
    /// Label key-value pairs
    pub labels: HashMap<String, String>,
    /// Metric value
    pub value: f64,
    /// Timestamp (optional)
    pub timestamp: Option<i64>,
}

/// Parsed Prometheus metrics text format
#[derive(Clone, Debug, Default)]
pub struct PrometheusMetrics {
    /// Families in the order they first appeared
    pub families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
}

impl PrometheusMetrics {
    /// Create an empty metrics container
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a family by name
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&MetricFamily> {
        self.index.get(name).map(|&idx| &self.families[idx])
    }

    /// Get or create a family entry
    fn get_or_create_family(&mut self, name: &str) -> &mut MetricFamily {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.families.push(MetricFamily {
                    name: name.to_string(),
                    ..Default::default()
                });
                let idx = self.families.len() - 1;
                self.index.insert(name.to_string(), idx);
                idx
            }
        };
        &mut self.families[idx]
    }

    /// Resolve the family a sample belongs to: exact name first, then with a known suffix removed
    fn family_name_for(&self, sample_name: &str) -> String {
        if self.index.contains_key(sample_name) {
            return sample_name.to_string();
        }
        FAMILY_SUFFIXES
            .iter()
            .filter_map(|suffix| sample_name.strip_suffix(suffix))
            .find(|base| self.index.contains_key(*base))
            .unwrap_or(sample_name)
            .to_string()
    }

    /// Parse Prometheus text format metrics
    ///
    /// Malformed sample lines are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut metrics = PrometheusMetrics::new();

        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and other comments
            if trimmed.is_empty()
                || trimmed.starts_with('#')
                    && !trimmed.starts_with("# HELP ")
                    && !trimmed.starts_with("# TYPE ")
            {
                continue;
            }

            if let Some((metric_name, help)) = parse_metadata_line(trimmed, "# HELP ") {
                metrics.get_or_create_family(&metric_name).help = Some(help);
                continue;
            }

            if let Some((metric_name, metric_type)) = parse_metadata_line(trimmed, "# TYPE ") {
                metrics.get_or_create_family(&metric_name).metric_type = Some(metric_type);
                continue;
            }

            match parse_metric_sample(trimmed) {
                Ok(sample) => {
                    let family = metrics.family_name_for(&sample.name);
                    metrics.get_or_create_family(&family).samples.push(sample);
                }
                Err(e) => {
                    tracing::trace!(line = %trimmed, error = %e, "Skipping malformed sample line");
                }
            }
        }

        Ok(metrics)
    }
}

/// Parse metadata line (HELP or TYPE)
/// Returns (metric_name, value) if successful
fn parse_metadata_line(line: &str, prefix: &str) -> Option<(String, String)> {
    line.strip_prefix(prefix).and_then(|rest| {
        rest.find(' ')
            .map(|idx| (rest[..idx].to_string(), rest[idx + 1..].to_string()))
    })
}

/// Parse a single metric sample line
/// Format: metric_name{label1="value1",label2="value2"} value [timestamp]
fn parse_metric_sample(line: &str) -> Result<MetricSample> {
    let (name, labels, rest) = if let Some(brace_start) = line.find('{') {
        let (labels, consumed) = parse_labels(&line[brace_start + 1..])?;
        let rest = line[brace_start + 1 + consumed..].trim();
        (line[..brace_start].trim().to_string(), labels, rest)
    } else {
        // No labels: split on first space
        let (metric_name, rest) = line
            .split_once(' ')
            .ok_or_else(|| anyhow::anyhow!("Invalid metric format: {}", line))?;
        (metric_name.to_string(), HashMap::new(), rest.trim())
    };

    // Parse value and optional timestamp
    let mut parts = rest.split_whitespace();
    let value = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("Missing value in metric line: {}", line))?
        .parse::<f64>()?;

    let timestamp = parts.next().and_then(|ts| ts.parse::<i64>().ok());

    Ok(MetricSample {
        name,
        labels,
        value,
        timestamp,
    })
}

/// Parse label pairs following an opening brace, up to and including the closing brace
/// Format: label1="value1",label2="value2"}
///
/// Returns the labels and the number of bytes consumed. Quoted values may contain
/// commas, braces and escaped quotes.
fn parse_labels(input: &str) -> Result<(HashMap<String, String>, usize)> {
    let mut labels = HashMap::new();
    let mut chars = input.char_indices().peekable();

    loop {
        // Skip separators between pairs
        while let Some(&(_, ch)) = chars.peek() {
            if ch == ',' || ch.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                Some((idx, '}')) if key.is_empty() => return Ok((labels, idx + 1)),
                Some((_, '=')) => break,
                Some((_, ch)) => key.push(ch),
                None => return Err(anyhow::anyhow!("Missing closing brace in labels: {}", input)),
            }
        }

        if !matches!(chars.next(), Some((_, '"'))) {
            return Err(anyhow::anyhow!("Unquoted value for label {}", key.trim()));
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, ch)) => value.push(ch),
                    None => return Err(anyhow::anyhow!("Dangling escape in labels: {}", input)),
                },
                Some((_, '"')) => break,
                Some((_, ch)) => value.push(ch),
                None => return Err(anyhow::anyhow!("Unterminated label value: {}", input)),
            }
        }

        labels.insert(key.trim().to_string(), value);
    }
}

/// Escape label values for Prometheus format
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\t' => result.push_str("\\t"),
            _ => result.push(ch),
        }
    }
    result
}

/// Format a sample value the way the exposition format spells special floats
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "+" } else { "-" };
        format!("{sign}Inf")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_metric() {
        let content = r#"# HELP requests_total Total requests
# TYPE requests_total counter
requests_total 42
"#;
        let metrics = PrometheusMetrics::parse(content).unwrap();
        let family = metrics.get("requests_total").unwrap();
        assert_eq!(family.metric_type.as_deref(), Some("counter"));
        assert_eq!(family.help.as_deref(), Some("Total requests"));
        assert_eq!(family.samples.len(), 1);
        assert_eq!(family.samples[0].value, 42.0);
    }

    #[test]
    fn test_parse_dcgm_gauge() {
        let content = r#"# HELP DCGM_FI_DEV_POWER_USAGE Power draw (in W).
# TYPE DCGM_FI_DEV_POWER_USAGE gauge
DCGM_FI_DEV_POWER_USAGE{gpu="0",UUID="GPU-5a5a7118-e550-79a1-597e-7631e126c57a",device="nvidia0",modelName="NVIDIA A100-SXM4-40GB",Hostname="node-1"} 61.5
DCGM_FI_DEV_POWER_USAGE{gpu="1",UUID="GPU-b8ea3855-276c-c9cb-b366-c6fa655957c5",device="nvidia1",modelName="NVIDIA A100-SXM4-40GB",Hostname="node-1"} 58
"#;
        let metrics = PrometheusMetrics::parse(content).unwrap();
        assert_eq!(metrics.families.len(), 1);

        let family = &metrics.families[0];
        assert_eq!(family.name, "DCGM_FI_DEV_POWER_USAGE");
        assert_eq!(family.help.as_deref(), Some("Power draw (in W)."));
        assert_eq!(family.samples.len(), 2);
        assert_eq!(family.samples[0].labels.get("device").unwrap(), "nvidia0");
        assert_eq!(family.samples[1].labels.get("gpu").unwrap(), "1");
        assert_eq!(family.samples[1].value, 58.0);
    }

    #[test]
    fn test_parse_histogram_suffixes_join_family() {
        let content = r#"# HELP request_duration_seconds Request duration
# TYPE request_duration_seconds histogram
request_duration_seconds_bucket{le="0.1"} 10
request_duration_seconds_bucket{le="1.0"} 50
request_duration_seconds_sum 123.45
request_duration_seconds_count 60
"#;
        let metrics = PrometheusMetrics::parse(content).unwrap();
        assert_eq!(metrics.families.len(), 1);
        let family = metrics.get("request_duration_seconds").unwrap();
        assert_eq!(family.samples.len(), 4);
        assert_eq!(family.samples[2].name, "request_duration_seconds_sum");
    }

    #[test]
    fn test_parse_untyped_sample_creates_family() {
        let metrics = PrometheusMetrics::parse("up 1\n").unwrap();
        let family = metrics.get("up").unwrap();
        assert!(family.metric_type.is_none());
        assert_eq!(family.samples[0].value, 1.0);
    }

    #[test]
    fn test_parse_with_timestamp() {
        let content = "request_total{path=\"/api\"} 42 1234567890";
        let sample = parse_metric_sample(content).unwrap();
        assert_eq!(sample.value, 42.0);
        assert_eq!(sample.timestamp, Some(1234567890));
        assert_eq!(sample.labels.get("path").unwrap(), "/api");
    }

    #[test]
    fn test_parse_label_values_with_separators() {
        let content = r#"info{name="a,b",desc="x}y",quote="say \"hi\""} 1"#;
        let sample = parse_metric_sample(content).unwrap();
        assert_eq!(sample.labels.get("name").unwrap(), "a,b");
        assert_eq!(sample.labels.get("desc").unwrap(), "x}y");
        assert_eq!(sample.labels.get("quote").unwrap(), "say \"hi\"");
        assert_eq!(sample.value, 1.0);
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let content = r#"# TYPE good gauge
good 1
broken{label="x" 2
good 3
"#;
        let metrics = PrometheusMetrics::parse(content).unwrap();
        let family = metrics.get("good").unwrap();
        assert_eq!(family.samples.len(), 2);
        assert!(metrics.get("broken").is_none());
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_label_value("line\nbreak"), "line\\nbreak");
        assert_eq!(escape_label_value("col\tcol"), "col\\tcol");
    }

    #[test]
    fn test_escaped_label_values_survive_reparse() {
        let content = r#"info{desc="tab\tnew\nline \"q\" back\\slash"} 1"#;
        let sample = parse_metric_sample(content).unwrap();
        let desc = sample.labels.get("desc").unwrap();
        assert_eq!(desc, "tab\tnew\nline \"q\" back\\slash");

        let rendered = format!(r#"info{{desc="{}"}} 1"#, escape_label_value(desc));
        assert_eq!(rendered, content);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(61.5), "61.5");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
