//! Host grouping and measure payload assembly.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::identifier::{SuffixTable, metric_basename};
use crate::sample::Sample;

pub const RESOURCE_ID_PREFIX: &str = "collectd:";

/// One point as the batch measures endpoint accepts it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Measure {
    pub timestamp: f64,
    pub value: f64,
}

/// Measures for one host, keyed by metric name in first-derived order.
pub type MetricMeasures = IndexMap<String, Vec<Measure>>;

/// Gnocchi resource id for a host: fixed prefix plus the host name with
/// path separators flattened, since the id ends up in URL paths.
pub fn resource_id(host: &str) -> String {
    format!("{}{}", RESOURCE_ID_PREFIX, host.replace('/', "_"))
}

/// Groups a flushed batch by host, keeping arrival order within each group.
///
/// Hosts may interleave arbitrarily in the input; every sample of a host
/// lands in that host's single group.
pub fn group_by_host(samples: Vec<Sample>) -> IndexMap<String, Vec<Sample>> {
    let mut groups: IndexMap<String, Vec<Sample>> = IndexMap::new();
    for sample in samples {
        groups.entry(sample.host.clone()).or_default().push(sample);
    }
    groups
}

/// Payload for one host group, plus the (plugin, type) pairs that fell back
/// to positional suffixes while building it so the caller can warn once per
/// pair per flush.
#[derive(Debug)]
pub struct HostPayload {
    pub resource_id: String,
    pub metrics: MetricMeasures,
    pub fallback_pairs: HashSet<(String, String)>,
}

/// Converts one host's samples into the measures keyed by metric name.
///
/// NaN values are dropped entirely; each metric's measure list follows the
/// samples' arrival order.
pub fn build_payload(host: &str, samples: &[Sample], suffixes: &SuffixTable) -> HostPayload {
    let mut metrics = MetricMeasures::new();
    let mut fallback_pairs = HashSet::new();
    for sample in samples {
        let resolved = suffixes.resolve(sample);
        if resolved.fallback {
            fallback_pairs.insert((sample.plugin.clone(), sample.type_name.clone()));
        }
        let base = metric_basename(sample);
        for (value, suffix) in sample.values.iter().zip(&resolved.suffixes) {
            if value.is_nan() {
                continue;
            }
            metrics
                .entry(format!("{base}{suffix}"))
                .or_default()
                .push(Measure {
                    timestamp: sample.time,
                    value: *value,
                });
        }
    }
    HostPayload {
        resource_id: resource_id(host),
        metrics,
        fallback_pairs,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample(host: &str, plugin: &str, type_name: &str, time: f64, values: Vec<f64>) -> Sample {
        Sample {
            host: host.into(),
            plugin: plugin.into(),
            plugin_instance: None,
            type_name: type_name.into(),
            type_instance: None,
            time,
            values,
        }
    }

    #[test]
    fn resource_id_flattens_path_separators() {
        assert_eq!(resource_id("web01"), "collectd:web01");
        assert_eq!(resource_id("rack/web01"), "collectd:rack_web01");
    }

    #[test]
    fn grouping_collects_interleaved_hosts() {
        let samples = vec![
            sample("h1", "cpu", "gauge", 1.0, vec![1.0]),
            sample("h2", "cpu", "gauge", 2.0, vec![2.0]),
            sample("h1", "cpu", "gauge", 3.0, vec![3.0]),
            sample("h2", "cpu", "gauge", 4.0, vec![4.0]),
        ];
        let groups = group_by_host(samples);
        assert_eq!(groups.len(), 2);
        let times: Vec<f64> = groups["h1"].iter().map(|s| s.time).collect();
        assert_eq!(times, vec![1.0, 3.0]);
        let times: Vec<f64> = groups["h2"].iter().map(|s| s.time).collect();
        assert_eq!(times, vec![2.0, 4.0]);
    }

    #[test]
    fn load_samples_fan_out_into_named_metrics() {
        let samples = vec![
            sample("h1", "load", "load", 10.0, vec![0.1, 0.2, 0.3]),
            sample("h1", "load", "load", 20.0, vec![0.2, 0.1, 0.4]),
        ];
        let payload = build_payload("h1", &samples, &SuffixTable::default());

        assert_eq!(payload.resource_id, "collectd:h1");
        assert!(payload.fallback_pairs.is_empty());
        let keys: Vec<&str> = payload.metrics.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["load@load-1min", "load@load-5min", "load@load-15min"]);
        assert_eq!(
            payload.metrics["load@load-1min"],
            vec![
                Measure {
                    timestamp: 10.0,
                    value: 0.1
                },
                Measure {
                    timestamp: 20.0,
                    value: 0.2
                },
            ]
        );
    }

    #[test]
    fn nan_values_are_dropped() {
        let samples = vec![sample(
            "h1",
            "interface",
            "if_octets",
            10.0,
            vec![f64::NAN, 42.0],
        )];
        let payload = build_payload("h1", &samples, &SuffixTable::default());
        let keys: Vec<&str> = payload.metrics.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["interface@if_octets-tx"]);
    }

    #[test]
    fn all_nan_sample_produces_no_metrics() {
        let samples = vec![sample("h1", "cpu", "gauge", 10.0, vec![f64::NAN])];
        let payload = build_payload("h1", &samples, &SuffixTable::default());
        assert!(payload.metrics.is_empty());
    }

    #[test]
    fn fallback_pairs_are_deduplicated() {
        let samples = vec![
            sample("h1", "custom", "mystery", 10.0, vec![1.0, 2.0]),
            sample("h1", "custom", "mystery", 20.0, vec![3.0, 4.0]),
        ];
        let payload = build_payload("h1", &samples, &SuffixTable::default());
        assert_eq!(payload.fallback_pairs.len(), 1);
        assert!(
            payload
                .fallback_pairs
                .contains(&("custom".to_owned(), "mystery".to_owned()))
        );
        assert_eq!(
            payload.metrics["custom@mystery-0"],
            vec![
                Measure {
                    timestamp: 10.0,
                    value: 1.0
                },
                Measure {
                    timestamp: 20.0,
                    value: 3.0
                },
            ]
        );
    }
}
