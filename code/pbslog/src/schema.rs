/// The flat row shapes handed to the persistence layer, and the conversions into them.
///
/// Units: memory in GB, energy in W, durations of GPU use in hours, walltime in seconds, clocks
/// in MHz, utilization in percent.  Times are Unix seconds.
///
/// A value that should be numeric but isn't becomes None (NULL); the exception is start and end,
/// without which the job row is meaningless.
use crate::error::{AcctError, AcctResult};
use crate::jobrecord::JobRecord;
use crate::usage::GpuUsageEntity;

use rustutils::parse_walltime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub job_id: String,
    pub ngpus: i64,
    pub energy_used: Option<f64>,
    pub max_mem: Option<f64>,
    pub gpu_duration: Option<f64>,
    pub starttime: i64,
    pub endtime: i64,
    pub used_walltime: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuUsageRow {
    pub job_id: String,
    pub node_name_and_gpu_number: String,
    pub mem_clock_avg: Option<i64>,
    pub mem_util_max: Option<f64>,
    pub mem_used_max: Option<f64>,
    pub mem_util_avg: Option<f64>,
    pub sm_clock_avg: Option<i64>,
    pub sm_util_avg: Option<f64>,
    pub energy_used: Option<f64>,
    pub gpu_duration: Option<f64>,
}

impl JobRow {
    /// `gpus` are the job's usage entities, or None if GPU data were not derived or could not be.
    /// The job's energy and GPU hours are the sums across its GPUs.
    pub fn from_job(job: &JobRecord, gpus: Option<&[GpuUsageEntity]>) -> AcctResult<JobRow> {
        let ngpus = match job.resource_list().get("ngpus") {
            Some(s) => get_i64(s).ok_or_else(|| invalid("Resource_List.ngpus", s))?,
            None => 0,
        };
        let starttime = get_i64(job.field("start")).ok_or_else(|| invalid("start", job.field("start")))?;
        let endtime = get_i64(job.field("end")).ok_or_else(|| invalid("end", job.field("end")))?;
        let max_mem = job.resources_used().get("mem").and_then(memory_to_gb);
        let used_walltime = job
            .resources_used()
            .get("walltime")
            .and_then(|s| parse_walltime(s).ok())
            .and_then(|s| i64::try_from(s).ok());
        let (energy_used, gpu_duration) = match gpus {
            Some(gpus) if !gpus.is_empty() => (
                Some(gpus.iter().filter_map(|g| get_f64(&g.energy_used)).sum::<f64>()),
                Some(gpus.iter().map(|g| g.gpu_duration).sum::<f64>()),
            ),
            _ => (None, None),
        };
        Ok(JobRow {
            job_id: job.id().to_string(),
            ngpus,
            energy_used,
            max_mem,
            gpu_duration,
            starttime,
            endtime,
            used_walltime,
        })
    }
}

impl From<&GpuUsageEntity> for GpuUsageRow {
    fn from(e: &GpuUsageEntity) -> GpuUsageRow {
        GpuUsageRow {
            job_id: e.job_id.clone(),
            node_name_and_gpu_number: e.node_gpu.clone(),
            mem_clock_avg: get_f64(&e.mem_clock_avg).map(|x| x.round() as i64),
            mem_util_max: get_f64(&e.mem_util_max),
            mem_used_max: get_f64(&e.mem_used_max),
            mem_util_avg: get_f64(&e.mem_util_avg),
            sm_clock_avg: get_f64(&e.sm_clock_avg).map(|x| x.round() as i64),
            sm_util_avg: get_f64(&e.sm_util_avg),
            energy_used: get_f64(&e.energy_used),
            gpu_duration: Some(e.gpu_duration),
        }
    }
}

/// PBS memory amounts are an integer with a unit: b, kb, mb, gb, tb (case does not matter).  The
/// unit is binary.

pub fn memory_to_gb(s: &str) -> Option<f64> {
    let s = s.trim().to_ascii_lowercase();
    let number = s.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let scale = match &s[number.len()..] {
        "" | "b" => 1.0 / (1024.0 * 1024.0 * 1024.0),
        "kb" => 1.0 / (1024.0 * 1024.0),
        "mb" => 1.0 / 1024.0,
        "gb" => 1.0,
        "tb" => 1024.0,
        _ => return None,
    };
    get_f64(number).map(|n| n * scale)
}

fn get_i64(s: &str) -> Option<i64> {
    i64::from_str(s.trim()).ok()
}

fn get_f64(s: &str) -> Option<f64> {
    match f64::from_str(s.trim()) {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

fn invalid(field: &str, value: &str) -> AcctError {
    AcctError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
use crate::jobrecord::{assemble_job, required_entries};

#[cfg(test)]
fn entity(node_gpu: &str, energy: &str, hours: f64) -> GpuUsageEntity {
    GpuUsageEntity {
        job_id: "5.s".to_string(),
        node_gpu: node_gpu.to_string(),
        mem_clock_avg: "1215".to_string(),
        mem_util_max: "40".to_string(),
        mem_used_max: "10.5".to_string(),
        mem_util_avg: "20.5".to_string(),
        sm_clock_avg: "1409.6".to_string(),
        sm_util_avg: "90".to_string(),
        energy_used: energy.to_string(),
        gpu_duration: hours,
    }
}

#[test]
fn test_job_row() {
    let mut entries = required_entries();
    entries.push(("resources_used.mem", "2097152kb"));
    entries.push(("resources_used.walltime", "01:00:30"));
    entries.push(("Resource_List.ngpus", "2"));
    let job = assemble_job("5.s", None, &entries).unwrap();

    let gpus = vec![entity("n1:0", "100", 1.5), entity("n1:1", "bad", 0.5)];
    let row = JobRow::from_job(&job, Some(&gpus)).unwrap();
    assert!(row.job_id == "5.s");
    assert!(row.ngpus == 2);
    assert!(row.starttime == 50 && row.endtime == 100);
    assert!(row.used_walltime == Some(3630));
    assert!(row.max_mem == Some(2.0));
    assert!(row.energy_used == Some(100.0));
    assert!(row.gpu_duration == Some(2.0));

    let row = JobRow::from_job(&job, None).unwrap();
    assert!(row.energy_used.is_none() && row.gpu_duration.is_none());
}

#[test]
fn test_job_row_defaults_and_errors() {
    let job = assemble_job("5.s", None, &required_entries()).unwrap();
    let row = JobRow::from_job(&job, Some(&[])).unwrap();
    assert!(row.ngpus == 0);
    assert!(row.max_mem.is_none() && row.used_walltime.is_none() && row.energy_used.is_none());

    let mut entries = required_entries()
        .into_iter()
        .filter(|(t, _)| *t != "end")
        .collect::<Vec<(&str, &str)>>();
    entries.push(("end", "yesterday"));
    let job = assemble_job("5.s", None, &entries).unwrap();
    assert!(JobRow::from_job(&job, None).unwrap_err() == invalid("end", "yesterday"));
}

#[test]
fn test_job_row_oversized_walltime() {
    let mut entries = required_entries();
    entries.push(("resources_used.walltime", "999999999999999999:00:00"));
    let job = assemble_job("5.s", None, &entries).unwrap();
    let row = JobRow::from_job(&job, None).unwrap();
    assert!(row.used_walltime.is_none());
    assert!(row.starttime == 50 && row.endtime == 100);

    let mut entries = required_entries();
    entries.push(("resources_used.walltime", "0:0:18446744073709551615"));
    let job = assemble_job("5.s", None, &entries).unwrap();
    assert!(JobRow::from_job(&job, None).unwrap().used_walltime.is_none());
}

#[test]
fn test_gpu_row() {
    let row = GpuUsageRow::from(&entity("n1:0", "junk", 0.25));
    assert!(row.node_name_and_gpu_number == "n1:0");
    assert!(row.mem_clock_avg == Some(1215));
    assert!(row.sm_clock_avg == Some(1410));
    assert!(row.mem_util_avg == Some(20.5));
    assert!(row.energy_used.is_none());
    assert!(row.gpu_duration == Some(0.25));
}

#[test]
fn test_memory_to_gb() {
    assert!(memory_to_gb("1048576kb") == Some(1.0));
    assert!(memory_to_gb("512mb") == Some(0.5));
    assert!(memory_to_gb("3GB") == Some(3.0));
    assert!(memory_to_gb("1tb") == Some(1024.0));
    assert!(memory_to_gb("1073741824") == Some(1.0));
    assert!(memory_to_gb("12pb").is_none());
    assert!(memory_to_gb("kb").is_none());
}
