//! Metric name derivation.
//!
//! A sample's value vector fans out into one Gnocchi metric per value. The
//! name is `plugin[-plugin_instance]@type[-type_instance]` plus a suffix
//! identifying the value's position: nothing for single-valued types, the
//! data-source names from the types database for known multi-valued types,
//! and the positional index as a fallback.

use std::collections::HashMap;

use crate::sample::Sample;

/// Data-source suffixes for the multi-valued types in collectd's stock
/// types database. Single-valued types never consult this table.
static DEFAULT_SUFFIXES: &[(&str, &[&str])] = &[
    ("compression", &["-uncompressed", "-compressed"]),
    ("disk_merged", &["-read", "-write"]),
    ("disk_octets", &["-read", "-write"]),
    ("disk_ops", &["-read", "-write"]),
    ("disk_time", &["-read", "-write"]),
    ("dns_octets", &["-queries", "-responses"]),
    ("if_dropped", &["-rx", "-tx"]),
    ("if_errors", &["-rx", "-tx"]),
    ("if_octets", &["-rx", "-tx"]),
    ("if_packets", &["-rx", "-tx"]),
    ("io_octets", &["-rx", "-tx"]),
    ("io_packets", &["-rx", "-tx"]),
    ("load", &["-1min", "-5min", "-15min"]),
    ("ps_count", &["-processes", "-threads"]),
    ("ps_cputime", &["-user", "-syst"]),
    ("ps_disk_octets", &["-read", "-write"]),
    ("ps_disk_ops", &["-read", "-write"]),
    ("ps_pagefaults", &["-minflt", "-majflt"]),
    ("serial_octets", &["-rx", "-tx"]),
    ("voltage_threshold", &["-value", "-threshold"]),
];

/// Per-value suffixes resolved for one sample, in value order.
#[derive(Debug, PartialEq)]
pub struct ResolvedSuffixes {
    pub suffixes: Vec<String>,
    /// The type was multi-valued but unknown, or its arity disagreed with
    /// the table, so positional indexes were used instead of names.
    pub fallback: bool,
}

/// Immutable lookup table mapping a metric type to the name suffix of each
/// of its values, built once at startup from the built-in defaults plus any
/// configured extensions.
#[derive(Clone, Debug)]
pub struct SuffixTable {
    entries: HashMap<String, Vec<String>>,
}

impl SuffixTable {
    pub fn new(extensions: &HashMap<String, Vec<String>>) -> Self {
        let mut entries: HashMap<String, Vec<String>> = DEFAULT_SUFFIXES
            .iter()
            .map(|(type_name, suffixes)| {
                (
                    (*type_name).to_owned(),
                    suffixes.iter().map(|s| (*s).to_owned()).collect(),
                )
            })
            .collect();
        for (type_name, suffixes) in extensions {
            entries.insert(type_name.clone(), suffixes.clone());
        }
        Self { entries }
    }

    /// Resolves the suffix for each value of `sample`.
    pub fn resolve(&self, sample: &Sample) -> ResolvedSuffixes {
        let arity = sample.values.len();
        if arity <= 1 {
            return ResolvedSuffixes {
                suffixes: vec![String::new(); arity],
                fallback: false,
            };
        }
        match self.entries.get(&sample.type_name) {
            Some(suffixes) if suffixes.len() == arity => ResolvedSuffixes {
                suffixes: suffixes.clone(),
                fallback: false,
            },
            _ => ResolvedSuffixes {
                suffixes: (0..arity).map(|i| format!("-{i}")).collect(),
                fallback: true,
            },
        }
    }
}

impl Default for SuffixTable {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

/// `plugin[-plugin_instance]@type[-type_instance]`, the shared prefix of
/// every metric derived from `sample`.
///
/// Follows FORMAT_VL from collectd's daemon/common.h, minus the leading
/// host and with `@` in place of the slash so the name stays inert inside
/// a URL path.
pub fn metric_basename(sample: &Sample) -> String {
    let mut name = sample.plugin.clone();
    if let Some(instance) = &sample.plugin_instance {
        name.push('-');
        name.push_str(instance);
    }
    name.push('@');
    name.push_str(&sample.type_name);
    if let Some(instance) = &sample.type_instance {
        name.push('-');
        name.push_str(instance);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(type_name: &str, values: Vec<f64>) -> Sample {
        Sample {
            host: "web01".into(),
            plugin: "interface".into(),
            plugin_instance: None,
            type_name: type_name.into(),
            type_instance: None,
            time: 1_500_000_000.0,
            values,
        }
    }

    #[test]
    fn basename_without_instances() {
        let sample = sample("if_octets", vec![1.0, 2.0]);
        assert_eq!(metric_basename(&sample), "interface@if_octets");
    }

    #[test]
    fn basename_with_instances() {
        let mut sample = sample("cpu", vec![1.0]);
        sample.plugin = "cpu".into();
        sample.plugin_instance = Some("0".into());
        sample.type_instance = Some("idle".into());
        assert_eq!(metric_basename(&sample), "cpu-0@cpu-idle");
    }

    #[test]
    fn single_value_never_gets_a_suffix() {
        let table = SuffixTable::default();
        // "load" is in the table, but arity 1 short-circuits the lookup.
        let resolved = table.resolve(&sample("load", vec![0.5]));
        assert_eq!(resolved.suffixes, vec![String::new()]);
        assert!(!resolved.fallback);
    }

    #[test]
    fn known_type_uses_named_suffixes() {
        let table = SuffixTable::default();
        let resolved = table.resolve(&sample("load", vec![0.1, 0.2, 0.3]));
        assert_eq!(resolved.suffixes, vec!["-1min", "-5min", "-15min"]);
        assert!(!resolved.fallback);
    }

    #[test]
    fn unknown_type_falls_back_to_indexes() {
        let table = SuffixTable::default();
        let resolved = table.resolve(&sample("mystery", vec![1.0, 2.0]));
        assert_eq!(resolved.suffixes, vec!["-0", "-1"]);
        assert!(resolved.fallback);
    }

    #[test]
    fn arity_mismatch_falls_back_to_indexes() {
        let table = SuffixTable::default();
        let resolved = table.resolve(&sample("load", vec![0.1, 0.2]));
        assert_eq!(resolved.suffixes, vec!["-0", "-1"]);
        assert!(resolved.fallback);
    }

    #[test]
    fn configured_entries_override_defaults() {
        let mut extensions = HashMap::new();
        extensions.insert("load".to_owned(), vec!["-a".to_owned(), "-b".to_owned()]);
        extensions.insert(
            "mystery".to_owned(),
            vec!["-x".to_owned(), "-y".to_owned()],
        );
        let table = SuffixTable::new(&extensions);

        let resolved = table.resolve(&sample("load", vec![0.1, 0.2]));
        assert_eq!(resolved.suffixes, vec!["-a", "-b"]);
        assert!(!resolved.fallback);

        let resolved = table.resolve(&sample("mystery", vec![1.0, 2.0]));
        assert_eq!(resolved.suffixes, vec!["-x", "-y"]);
        assert!(!resolved.fallback);
    }
}
