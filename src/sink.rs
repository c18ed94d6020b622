use std::collections::BTreeMap;
use std::fmt;

pub const PROBE_SUCCESS_METRIC: &str = "probe_success";
pub const PROBE_DURATION_METRIC: &str = "probe_duration_seconds";
pub const PROBE_IP_PROTOCOL_METRIC: &str = "probe_ip_protocol";
pub const PROBE_DNS_LOOKUP_TIME_METRIC: &str = "probe_dns_lookup_time_seconds";
pub const PROBE_FAILED_DUE_TO_REGEX_METRIC: &str = "probe_failed_due_to_regex";
pub const PROBE_SSL_EARLIEST_EXPIRY_METRIC: &str = "probe_ssl_earliest_cert_expiry";

pub const PHASE_LABEL: &str = "phase";

type Labels = Vec<(String, String)>;

/// One named numeric value with its (sorted) label set.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Labels,
    pub value: f64,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            let labels: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{v}\""))
                .collect();
            write!(f, "{{{}}}", labels.join(","))?;
        }
        write!(f, " {}", self.value)
    }
}

/// Destination for the samples of a single probe invocation.
///
/// The caller creates a fresh sink per probe and owns it; probers only
/// write into it.
#[derive(Debug, Default)]
pub struct ResultSink {
    samples: BTreeMap<(String, Labels), f64>,
}

fn normalize(labels: &[(&str, &str)]) -> Labels {
    let mut labels: Labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    labels
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.set_labeled(name, &[], value);
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set(name, if value { 1.0 } else { 0.0 });
    }

    pub fn set_labeled(&mut self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.samples
            .insert((name.to_string(), normalize(labels)), value);
    }

    /// Adds to a gauge, creating it at zero first.
    pub fn add_labeled(&mut self, name: &str, labels: &[(&str, &str)], delta: f64) {
        *self
            .samples
            .entry((name.to_string(), normalize(labels)))
            .or_insert(0.0) += delta;
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.get_labeled(name, &[])
    }

    pub fn get_labeled(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.samples
            .get(&(name.to_string(), normalize(labels)))
            .copied()
    }

    /// Values of `label` across every sample of `name`, e.g. all phases
    /// recorded under `probe_http_duration_seconds`.
    pub fn labels_of(&self, name: &str, label: &str) -> Vec<String> {
        self.samples
            .keys()
            .filter(|(n, _)| n == name)
            .filter_map(|(_, labels)| {
                labels
                    .iter()
                    .find(|(k, _)| k == label)
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .iter()
            .map(|((name, labels), value)| Sample {
                name: name.clone(),
                labels: labels.clone(),
                value: *value,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
