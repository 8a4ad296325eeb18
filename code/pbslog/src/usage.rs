/// Per-GPU usage derived from a job's resources_used.
///
/// The GPU monitoring hook on the PBS server writes one `GPU_*_per_node_gpu` resource per metric,
/// each holding readings for every GPU of the job (see gpustat.rs).  We want the transpose: one
/// entity per GPU holding all eight metrics.
///
/// Assembly is two passes.  The first decodes every recognized metric and files the values by GPU
/// identity, in the order the identities are first seen.  The second checks that every identity
/// got exactly the eight metrics and builds the entities; an identity that didn't is dropped, the
/// others are kept.  A metric that can't be decoded at all abandons the job's GPU data.
use crate::error::{AcctError, AcctResult};
use crate::gpustat::decode_gpu_stats;
use crate::jobrecord::JobRecord;
use crate::units::{MetricValue, UnitPolicy};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMetric {
    MemClockAvg,
    MemUtilMax,
    MemUsedMax,
    MemUtilAvg,
    SmClockAvg,
    SmUtilAvg,
    EnergyUsed,
    GpuDuration,
}

pub const NUM_GPU_METRICS: usize = 8;

const ALL_METRICS: [GpuMetric; NUM_GPU_METRICS] = [
    GpuMetric::MemClockAvg,
    GpuMetric::MemUtilMax,
    GpuMetric::MemUsedMax,
    GpuMetric::MemUtilAvg,
    GpuMetric::SmClockAvg,
    GpuMetric::SmUtilAvg,
    GpuMetric::EnergyUsed,
    GpuMetric::GpuDuration,
];

impl GpuMetric {
    /// The resource name in resources_used.
    pub fn resource_name(self) -> &'static str {
        match self {
            GpuMetric::MemClockAvg => "GPU_memoryClock_average_per_node_gpu",
            GpuMetric::MemUtilMax => "GPU_memoryUtilization_maxValue_per_node_gpu",
            GpuMetric::MemUsedMax => "GPU_maxGpuMemoryUsed_per_node_gpu",
            GpuMetric::MemUtilAvg => "GPU_memoryUtilization_average_per_node_gpu",
            GpuMetric::SmClockAvg => "GPU_smClock_average_per_node_gpu",
            GpuMetric::SmUtilAvg => "GPU_smUtilization_average_per_node_gpu",
            GpuMetric::EnergyUsed => "GPU_energyConsumed_per_node_gpu",
            GpuMetric::GpuDuration => "GPU_duration_per_node_gpu",
        }
    }

    /// Recognize a resource name.  It must be one of the eight, start with "GPU", and be a
    /// per_node_gpu resource.
    pub fn from_resource_name(name: &str) -> Option<GpuMetric> {
        if !name.starts_with("GPU") || !name.contains("per_node_gpu") {
            return None;
        }
        ALL_METRICS.into_iter().find(|m| m.resource_name() == name)
    }
}

/// Keyword in the resource name → unit policy, in the order they are tried.  Every keyword that
/// matches applies, and for the same metric a later result replaces an earlier one.  The eight
/// known names each match exactly one keyword.

const KEYWORD_POLICIES: [(&str, UnitPolicy); 5] = [
    ("duration", UnitPolicy::Duration),
    ("Clock", UnitPolicy::Clock),
    ("Utilization", UnitPolicy::Utilization),
    ("MemoryUsed", UnitPolicy::Memory),
    ("energy", UnitPolicy::Energy),
];

/// The policies to apply to each recognized metric, computed once from the keywords.

pub struct PolicyTable {
    entries: Vec<(GpuMetric, Vec<UnitPolicy>)>,
}

impl PolicyTable {
    pub fn new() -> PolicyTable {
        PolicyTable {
            entries: ALL_METRICS
                .into_iter()
                .map(|m| (m, policies_for(m.resource_name())))
                .collect(),
        }
    }

    pub fn policies(&self, metric: GpuMetric) -> &[UnitPolicy] {
        self.entries
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, ps)| ps.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}

fn policies_for(name: &str) -> Vec<UnitPolicy> {
    KEYWORD_POLICIES
        .iter()
        .filter(|(kw, _)| name.contains(kw))
        .map(|(_, p)| *p)
        .collect()
}

/// Usage for one GPU of one job.  The non-duration metrics are the unit-stripped strings from the
/// log, see units.rs; they are interpreted as numbers in schema.rs.

#[derive(Debug, Clone, PartialEq)]
pub struct GpuUsageEntity {
    pub job_id: String,
    pub node_gpu: String,
    pub mem_clock_avg: String,
    pub mem_util_max: String,
    pub mem_used_max: String,
    pub mem_util_avg: String,
    pub sm_clock_avg: String,
    pub sm_util_avg: String,
    pub energy_used: String,
    pub gpu_duration: f64,
}

impl GpuUsageEntity {
    /// `metrics` must hold each metric exactly once, otherwise ArityMismatch.
    pub fn from_metrics(
        job_id: &str,
        node_gpu: &str,
        metrics: &[(GpuMetric, MetricValue)],
    ) -> AcctResult<GpuUsageEntity> {
        let arity_error = || AcctError::ArityMismatch {
            identity: node_gpu.to_string(),
            expected: NUM_GPU_METRICS,
            found: metrics.len(),
        };
        if metrics.len() != NUM_GPU_METRICS {
            return Err(arity_error());
        }
        let stripped = |which: GpuMetric| -> AcctResult<String> {
            match metrics.iter().find(|(m, _)| *m == which) {
                Some((_, MetricValue::Stripped(s))) => Ok(s.clone()),
                Some((_, MetricValue::Hours(h))) => Ok(h.to_string()),
                None => Err(arity_error()),
            }
        };
        let gpu_duration = match metrics.iter().find(|(m, _)| *m == GpuMetric::GpuDuration) {
            Some((_, MetricValue::Hours(h))) => *h,
            Some((_, MetricValue::Stripped(s))) => {
                s.parse::<f64>().map_err(|_| AcctError::InvalidValue {
                    field: GpuMetric::GpuDuration.resource_name().to_string(),
                    value: s.clone(),
                })?
            }
            None => return Err(arity_error()),
        };
        Ok(GpuUsageEntity {
            job_id: job_id.to_string(),
            node_gpu: node_gpu.to_string(),
            mem_clock_avg: stripped(GpuMetric::MemClockAvg)?,
            mem_util_max: stripped(GpuMetric::MemUtilMax)?,
            mem_used_max: stripped(GpuMetric::MemUsedMax)?,
            mem_util_avg: stripped(GpuMetric::MemUtilAvg)?,
            sm_clock_avg: stripped(GpuMetric::SmClockAvg)?,
            sm_util_avg: stripped(GpuMetric::SmUtilAvg)?,
            energy_used: stripped(GpuMetric::EnergyUsed)?,
            gpu_duration,
        })
    }
}

/// The outcome for one job: the entities that could be built and the identities that were
/// dropped, with the reason.

#[derive(Debug, Default)]
pub struct GpuUsage {
    pub entities: Vec<GpuUsageEntity>,
    pub dropped: Vec<AcctError>,
}

/// Values collected for one identity in the first pass.

struct PartialUsage {
    node_gpu: String,
    metrics: Vec<(GpuMetric, MetricValue)>,
}

impl PartialUsage {
    fn set(&mut self, metric: GpuMetric, value: MetricValue) {
        match self.metrics.iter().position(|(m, _)| *m == metric) {
            Some(ix) => self.metrics[ix].1 = value,
            None => self.metrics.push((metric, value)),
        }
    }
}

pub struct GpuUsageAssembler {
    table: PolicyTable,
}

impl GpuUsageAssembler {
    pub fn new() -> GpuUsageAssembler {
        GpuUsageAssembler {
            table: PolicyTable::new(),
        }
    }

    /// Fails if any recognized metric is malformed; then nothing is produced for the job.
    pub fn assemble(&self, job: &JobRecord) -> AcctResult<GpuUsage> {
        let partials = self.decode(job)?;

        let mut usage = GpuUsage::default();
        for p in partials {
            match GpuUsageEntity::from_metrics(job.id(), &p.node_gpu, &p.metrics) {
                Ok(entity) => usage.entities.push(entity),
                Err(e) => {
                    warn!(job = job.id(), gpu = p.node_gpu.as_str(), "Dropping GPU usage: {e}");
                    usage.dropped.push(e);
                }
            }
        }
        Ok(usage)
    }

    fn decode(&self, job: &JobRecord) -> AcctResult<Vec<PartialUsage>> {
        let mut partials: Vec<PartialUsage> = vec![];
        for (key, value) in job.resources_used().iter() {
            let Some(metric) = GpuMetric::from_resource_name(key) else {
                continue;
            };
            let raw = decode_gpu_stats(key, value)?;
            for policy in self.table.policies(metric) {
                for (node_gpu, v) in policy.apply(key, &raw)? {
                    match partials.iter().position(|p| p.node_gpu == node_gpu) {
                        Some(ix) => partials[ix].set(metric, v),
                        None => {
                            let mut p = PartialUsage {
                                node_gpu,
                                metrics: vec![],
                            };
                            p.set(metric, v);
                            partials.push(p);
                        }
                    }
                }
            }
        }
        Ok(partials)
    }
}

impl Default for GpuUsageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
use crate::jobrecord::{assemble_job, required_entries};

#[cfg(test)]
fn job_with(resources: &[(&'static str, &'static str)]) -> JobRecord {
    let mut entries = required_entries();
    entries.extend_from_slice(resources);
    assemble_job("7.server", None, &entries).unwrap()
}

#[cfg(test)]
fn full_gpu_resources() -> Vec<(&'static str, &'static str)> {
    vec![
        ("resources_used.GPU_memoryClock_average_per_node_gpu", "n1:(0:1215MHZ+1:1215MHZ)+n2:(0:877MHZ)"),
        ("resources_used.GPU_memoryUtilization_maxValue_per_node_gpu", "n1:(0:40%+1:41%)+n2:(0:5%)"),
        ("resources_used.GPU_maxGpuMemoryUsed_per_node_gpu", "n1:(0:10.5GB+1:11.0GB)+n2:(0:0.5GB)"),
        ("resources_used.GPU_memoryUtilization_average_per_node_gpu", "n1:(0:20%+1:21%)+n2:(0:2%)"),
        ("resources_used.GPU_smClock_average_per_node_gpu", "n1:(0:1410MHZ+1:1400MHZ)+n2:(0:1380MHZ)"),
        ("resources_used.GPU_smUtilization_average_per_node_gpu", "n1:(0:90%+1:91%)+n2:(0:9%)"),
        ("resources_used.GPU_energyConsumed_per_node_gpu", "n1:(0:250W+1:251W)+n2:(0:30W)"),
        ("resources_used.GPU_duration_per_node_gpu", "n1:(0:1.50hrs+1:90.00min)+n2:(0:3600.00sec)"),
    ]
}

#[test]
fn test_policy_table() {
    let t = PolicyTable::new();
    assert!(t.policies(GpuMetric::GpuDuration) == [UnitPolicy::Duration]);
    assert!(t.policies(GpuMetric::MemClockAvg) == [UnitPolicy::Clock]);
    assert!(t.policies(GpuMetric::SmUtilAvg) == [UnitPolicy::Utilization]);
    assert!(t.policies(GpuMetric::MemUsedMax) == [UnitPolicy::Memory]);
    assert!(t.policies(GpuMetric::EnergyUsed) == [UnitPolicy::Energy]);
    for m in ALL_METRICS {
        assert!(t.policies(m).len() == 1);
    }
    // A name with several keywords gets all their policies, in keyword order.
    assert!(policies_for("GPU_energyClock_per_node_gpu") == vec![UnitPolicy::Clock, UnitPolicy::Energy]);
    assert!(policies_for("GPU_other_per_node_gpu").is_empty());
}

#[test]
fn test_assemble_later_policy_wins() {
    // Energy first strips "W", then Clock strips three characters from the same raw value, and the
    // second result replaces the first for every GPU.
    let mut table = PolicyTable::new();
    for (m, ps) in table.entries.iter_mut() {
        if *m == GpuMetric::EnergyUsed {
            *ps = vec![UnitPolicy::Energy, UnitPolicy::Clock];
        }
    }
    let assembler = GpuUsageAssembler { table };
    let job = job_with(&full_gpu_resources());

    let partials = assembler.decode(&job).unwrap();
    for p in &partials {
        assert!(p.metrics.len() == NUM_GPU_METRICS);
        assert!(p.metrics.iter().filter(|(m, _)| *m == GpuMetric::EnergyUsed).count() == 1);
    }

    let usage = assembler.assemble(&job).unwrap();
    assert!(usage.dropped.is_empty());
    let energy = usage.entities.iter().map(|e| e.energy_used.as_str()).collect::<Vec<&str>>();
    assert!(energy == vec!["2", "2", ""]);
    assert!(usage.entities[0].sm_clock_avg == "1410");
}

#[test]
fn test_recognize() {
    assert!(GpuMetric::from_resource_name("GPU_duration_per_node_gpu") == Some(GpuMetric::GpuDuration));
    assert!(GpuMetric::from_resource_name("GPU_duration").is_none());
    assert!(GpuMetric::from_resource_name("GPU_temperature_per_node_gpu").is_none());
    assert!(GpuMetric::from_resource_name("ngpus").is_none());
}

#[test]
fn test_assemble() {
    let job = job_with(&full_gpu_resources());
    let usage = GpuUsageAssembler::new().assemble(&job).unwrap();
    assert!(usage.dropped.is_empty());
    assert!(usage.entities.len() == 3);
    let ids = usage.entities.iter().map(|e| e.node_gpu.as_str()).collect::<Vec<&str>>();
    assert!(ids == vec!["n1:0", "n1:1", "n2:0"]);

    let e = &usage.entities[0];
    assert!(e.job_id == "7.server");
    assert!(e.mem_clock_avg == "1215");
    assert!(e.mem_util_max == "40");
    assert!(e.mem_used_max == "10.5");
    assert!(e.mem_util_avg == "20");
    assert!(e.sm_clock_avg == "1410");
    assert!(e.sm_util_avg == "90");
    assert!(e.energy_used == "250");
    assert!((e.gpu_duration - 1.5).abs() < 1e-9);
    assert!((usage.entities[1].gpu_duration - 1.5).abs() < 1e-9);
    assert!((usage.entities[2].gpu_duration - 1.0).abs() < 1e-9);
}

#[test]
fn test_assemble_arity() {
    // n2 is missing from the energy metric, so it has seven metrics and is dropped, while the n1
    // GPUs are complete.
    let mut resources = full_gpu_resources();
    resources[6].1 = "n1:(0:250W+1:251W)";
    let job = job_with(&resources);
    let usage = GpuUsageAssembler::new().assemble(&job).unwrap();
    assert!(usage.entities.len() == 2);
    assert!(
        usage.dropped
            == vec![AcctError::ArityMismatch {
                identity: "n2:0".to_string(),
                expected: 8,
                found: 7
            }]
    );

    // Fewer than eight metrics across the board: nothing.
    let job = job_with(&full_gpu_resources()[0..7]);
    let usage = GpuUsageAssembler::new().assemble(&job).unwrap();
    assert!(usage.entities.is_empty());
    assert!(usage.dropped.len() == 3);
}

#[test]
fn test_from_metrics_arity() {
    let metrics = vec![(GpuMetric::MemClockAvg, MetricValue::Stripped("1".to_string()))];
    assert!(matches!(
        GpuUsageEntity::from_metrics("1", "n:0", &metrics),
        Err(AcctError::ArityMismatch { found: 1, .. })
    ));
    // Eight entries but a duplicate in place of the duration.
    let mut metrics = ALL_METRICS[0..7]
        .iter()
        .map(|m| (*m, MetricValue::Stripped("1".to_string())))
        .collect::<Vec<(GpuMetric, MetricValue)>>();
    metrics.push((GpuMetric::MemClockAvg, MetricValue::Stripped("1".to_string())));
    assert!(GpuUsageEntity::from_metrics("1", "n:0", &metrics).is_err());
}

#[test]
fn test_assemble_malformed() {
    let mut resources = full_gpu_resources();
    resources[2].1 = "n1:0:10GB";
    let job = job_with(&resources);
    assert!(matches!(
        GpuUsageAssembler::new().assemble(&job),
        Err(AcctError::MalformedGpuEncoding { .. })
    ));

    let mut resources = full_gpu_resources();
    resources[7].1 = "n1:(0:forever+1:1hrs)+n2:(0:1hrs)";
    let job = job_with(&resources);
    assert!(matches!(
        GpuUsageAssembler::new().assemble(&job),
        Err(AcctError::InvalidValue { .. })
    ));
}

#[test]
fn test_assemble_ignores_other_resources() {
    let mut resources = full_gpu_resources();
    resources.push(("resources_used.ngpus", "3"));
    resources.push(("resources_used.GPU_temperature_per_node_gpu", "garbage"));
    resources.push(("resources_used.walltime", "01:00:00"));
    let job = job_with(&resources);
    let usage = GpuUsageAssembler::new().assemble(&job).unwrap();
    assert!(usage.entities.len() == 3);

    let job = job_with(&[("resources_used.ngpus", "0")]);
    let usage = GpuUsageAssembler::new().assemble(&job).unwrap();
    assert!(usage.entities.is_empty() && usage.dropped.is_empty());
}
