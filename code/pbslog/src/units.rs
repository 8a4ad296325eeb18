/// Unit handling for decoded per-GPU values.
///
/// Values come with a unit suffix of known length for each metric family, and for most families
/// we just chop it off and keep the number as a string.  Whether the rest is really a number is
/// only checked when the value is converted for output (see schema.rs), where a bad value becomes
/// NULL.
///
/// Duration is different: the suffix says what the unit is, and the value must be converted to
/// hours, so it is parsed here.
use crate::error::{AcctError, AcctResult};
use crate::gpustat::RawGpuStats;

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPolicy {
    /// "MHZ"
    Clock,
    /// "GB"
    Memory,
    /// "W"
    Energy,
    /// "%"
    Utilization,
    /// "hrs", "min", "sec", or an abbreviation
    Duration,
}

/// A value after unit handling.

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Stripped(String),
    Hours(f64),
}

impl UnitPolicy {
    pub fn suffix_len(self) -> usize {
        match self {
            UnitPolicy::Clock => 3,
            UnitPolicy::Memory => 2,
            UnitPolicy::Energy => 1,
            UnitPolicy::Utilization => 1,
            UnitPolicy::Duration => 3,
        }
    }

    /// Apply the policy to every decoded value.  `metric` is for error messages; a duration that
    /// can't be converted fails the whole metric.
    pub fn apply(self, metric: &str, stats: &RawGpuStats) -> AcctResult<Vec<(String, MetricValue)>> {
        match self {
            UnitPolicy::Duration => stats
                .iter()
                .map(|(k, v)| match duration_to_hours(v) {
                    Some(h) => Ok((k.clone(), MetricValue::Hours(h))),
                    None => Err(AcctError::InvalidValue {
                        field: metric.to_string(),
                        value: v.clone(),
                    }),
                })
                .collect(),
            _ => Ok(strip_units(stats, self.suffix_len())
                .into_iter()
                .map(|(k, v)| (k, MetricValue::Stripped(v)))
                .collect()),
        }
    }
}

/// Remove the last `n` characters of every value.

pub fn strip_units(stats: &RawGpuStats, n: usize) -> RawGpuStats {
    stats
        .iter()
        .map(|(k, v)| (k.clone(), strip_n(v, n)))
        .collect()
}

fn strip_n(s: &str, n: usize) -> String {
    let keep = s.chars().count().saturating_sub(n);
    s.chars().take(keep).collect()
}

/// Convert a duration to hours, looking at the unit to pick the divisor: h... is hours, m...
/// minutes, s... seconds.  A bare number is hours.  Returns None if the unit is unknown or the
/// number can't be parsed.

pub fn duration_to_hours(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let number = raw.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let unit = &raw[number.len()..];
    let divisor = match unit.chars().next().map(|c| c.to_ascii_lowercase()) {
        None | Some('h') => 1.0,
        Some('m') => 60.0,
        Some('s') => 3600.0,
        Some(_) => return None,
    };
    match f64::from_str(number) {
        Ok(n) if n.is_finite() => Some(n / divisor),
        _ => None,
    }
}

#[cfg(test)]
fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_strip_units() {
    let stats = vec![
        ("n1:0".to_string(), "1000MHZ".to_string()),
        ("n1:1".to_string(), "12.5GB".to_string()),
    ];
    let s = strip_units(&stats, 3);
    assert!(s[0] == ("n1:0".to_string(), "1000".to_string()));
    assert!(s[1].1 == "12.");
    assert!(strip_units(&stats, 2)[1].1 == "12.5");
    // Short values become empty rather than failing.
    assert!(strip_n("W", 3) == "");
    assert!(strip_n("", 1) == "");
}

#[cfg(test)]
fn apply1(policy: UnitPolicy, raw: &str) -> AcctResult<MetricValue> {
    let stats = vec![("n:0".to_string(), raw.to_string())];
    policy.apply("GPU_x_per_node_gpu", &stats).map(|mut v| v.remove(0).1)
}

#[test]
fn test_policies() {
    let stripped = |s: &str| MetricValue::Stripped(s.to_string());
    assert!(apply1(UnitPolicy::Clock, "1000MHZ").unwrap() == stripped("1000"));
    assert!(apply1(UnitPolicy::Memory, "10.25GB").unwrap() == stripped("10.25"));
    assert!(apply1(UnitPolicy::Energy, "300W").unwrap() == stripped("300"));
    assert!(apply1(UnitPolicy::Utilization, "87%").unwrap() == stripped("87"));
    // Garbage is kept, it is not our job to judge it.
    assert!(apply1(UnitPolicy::Energy, "lotsW").unwrap() == stripped("lots"));
    assert!(apply1(UnitPolicy::Duration, "2.00hrs").unwrap() == MetricValue::Hours(2.0));
    assert!(matches!(
        apply1(UnitPolicy::Duration, "soon"),
        Err(AcctError::InvalidValue { .. })
    ));
}

#[test]
fn test_duration_to_hours() {
    assert!(close(duration_to_hours("1.50hrs").unwrap(), 1.5));
    assert!(close(duration_to_hours("30.00m").unwrap(), 0.5));
    assert!(close(duration_to_hours("30.00min").unwrap(), 0.5));
    assert!(close(duration_to_hours("3600.00s").unwrap(), 1.0));
    assert!(close(duration_to_hours("90.00sec").unwrap(), 0.025));
    assert!(close(duration_to_hours("2").unwrap(), 2.0));
    assert!(duration_to_hours("1.0days").is_none());
    assert!(duration_to_hours("hrs").is_none());
    assert!(duration_to_hours("1.0.0hrs").is_none());
}
