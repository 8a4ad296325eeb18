/// Turn parsed job records into output rows.  This is where per-job failures are caught: a job
/// whose row can't be built is dropped, a job whose GPU data can't be decoded keeps its row
/// without the GPU data, and a GPU whose metrics are incomplete is dropped by itself.  Each of
/// these is logged and counted.
use crate::jobrecord::JobRecord;
use crate::schema::{GpuUsageRow, JobRow};
use crate::usage::GpuUsageAssembler;

use tracing::warn;

/// Record selection.  Empty lists select everything.

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    /// User names to include.
    pub users: Vec<String>,
    /// User names to exclude, applied after `users`.
    pub exclude_users: Vec<String>,
    /// Node names, a job is included if it ran on any of them.
    pub hosts: Vec<String>,
    /// Job ids, either in full ("1002.pbs") or just the sequence number ("1002").
    pub jobs: Vec<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &JobRecord) -> bool {
        let user = job.field("user");
        if !self.users.is_empty() && !self.users.iter().any(|u| u == user) {
            return false;
        }
        if self.exclude_users.iter().any(|u| u == user) {
            return false;
        }
        if !self.hosts.is_empty() {
            let nodes = job.nodes();
            if !self.hosts.iter().any(|h| nodes.contains(&h.as_str())) {
                return false;
            }
        }
        if !self.jobs.is_empty() {
            let id = job.id();
            let seq = id.split('.').next().unwrap_or(id);
            if !self.jobs.iter().any(|j| j == id || j == seq) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct Ingested {
    pub job_rows: Vec<JobRow>,
    pub usage_rows: Vec<GpuUsageRow>,
    /// Jobs that were selected but could not be converted.
    pub discarded_jobs: usize,
    /// Jobs that kept their row but lost their GPU data.
    pub abandoned_gpu_jobs: usize,
    /// Individual GPUs dropped for incomplete metrics.
    pub dropped_gpus: usize,
}

/// Process the selected jobs in order.  Usage rows for a job follow the order in which its GPUs
/// appear in the log.

pub fn ingest_jobs(
    jobs: &[JobRecord],
    filter: &JobFilter,
    assembler: &GpuUsageAssembler,
) -> Ingested {
    let mut out = Ingested::default();
    for job in jobs.iter().filter(|j| filter.matches(j)) {
        let gpus = match assembler.assemble(job) {
            Ok(usage) => {
                out.dropped_gpus += usage.dropped.len();
                Some(usage.entities)
            }
            Err(e) => {
                warn!(job = job.id(), "Abandoning GPU usage: {e}");
                out.abandoned_gpu_jobs += 1;
                None
            }
        };
        match JobRow::from_job(job, gpus.as_deref()) {
            Ok(row) => out.job_rows.push(row),
            Err(e) => {
                warn!(job = job.id(), "Discarding job: {e}");
                out.discarded_jobs += 1;
                continue;
            }
        }
        if let Some(gpus) = gpus {
            out.usage_rows.extend(gpus.iter().map(GpuUsageRow::from));
        }
    }
    out
}

#[cfg(test)]
fn test_jobs() -> Vec<JobRecord> {
    let tokenizer = crate::FieldTokenizer::new(&rustutils::default_field_names());
    let files = crate::find_logfiles("../tests/pbslog/acct", None, None).unwrap();
    crate::read_logfiles(&files, &tokenizer).unwrap().0
}

#[test]
fn test_ingest_all() {
    let jobs = test_jobs();
    let out = ingest_jobs(&jobs, &JobFilter::default(), &GpuUsageAssembler::new());
    let ids = out.job_rows.iter().map(|r| r.job_id.as_str()).collect::<Vec<&str>>();
    assert!(ids == vec!["1001.pbs", "1002.pbs", "1003.pbs", "1004.pbs", "1005.pbs"]);
    assert!(out.discarded_jobs == 0);
    assert!(out.abandoned_gpu_jobs == 1);
    assert!(out.dropped_gpus == 1);

    // 1002 has three GPUs, 1003 keeps one of two, 1004 has none, 1005 one.
    let gpus = out
        .usage_rows
        .iter()
        .map(|r| (r.job_id.as_str(), r.node_name_and_gpu_number.as_str()))
        .collect::<Vec<(&str, &str)>>();
    assert!(
        gpus == vec![
            ("1002.pbs", "g1:0"),
            ("1002.pbs", "g1:1"),
            ("1002.pbs", "g2:0"),
            ("1003.pbs", "g3:0"),
            ("1005.pbs", "g1:3"),
        ]
    );

    let cpu_job = &out.job_rows[0];
    assert!(cpu_job.ngpus == 0);
    assert!(cpu_job.energy_used.is_none());
    assert!(cpu_job.max_mem == Some(1.0));
    assert!(cpu_job.used_walltime == Some(3600));

    let gpu_job = &out.job_rows[1];
    assert!(gpu_job.ngpus == 3);
    assert!(gpu_job.energy_used == Some(900.0));
    assert!(gpu_job.gpu_duration == Some(4.5));
    assert!(gpu_job.max_mem == Some(24.0));
    assert!(gpu_job.used_walltime == Some(5400));

    let broken = &out.job_rows[3];
    assert!(broken.ngpus == 1 && broken.energy_used.is_none() && broken.gpu_duration.is_none());

    let last = out.usage_rows.last().unwrap();
    assert!(last.mem_clock_avg == Some(877));
    assert!(last.mem_used_max == Some(1.0));
    assert!(last.gpu_duration == Some(0.5));
}

#[test]
fn test_filter() {
    let jobs = test_jobs();
    let assembler = GpuUsageAssembler::new();

    let filter = JobFilter {
        users: vec!["bob".to_string()],
        ..Default::default()
    };
    let out = ingest_jobs(&jobs, &filter, &assembler);
    let ids = out.job_rows.iter().map(|r| r.job_id.as_str()).collect::<Vec<&str>>();
    assert!(ids == vec!["1002.pbs", "1004.pbs", "1005.pbs"]);

    let filter = JobFilter {
        users: vec!["bob".to_string()],
        hosts: vec!["g2".to_string()],
        ..Default::default()
    };
    let out = ingest_jobs(&jobs, &filter, &assembler);
    assert!(out.job_rows.len() == 1 && out.job_rows[0].job_id == "1002.pbs");
    assert!(out.usage_rows.len() == 3);

    let filter = JobFilter {
        exclude_users: vec!["bob".to_string(), "carol".to_string()],
        ..Default::default()
    };
    let out = ingest_jobs(&jobs, &filter, &assembler);
    assert!(out.job_rows.len() == 1 && out.job_rows[0].job_id == "1001.pbs");

    let filter = JobFilter {
        jobs: vec!["1003".to_string(), "1005.pbs".to_string()],
        ..Default::default()
    };
    let out = ingest_jobs(&jobs, &filter, &assembler);
    let ids = out.job_rows.iter().map(|r| r.job_id.as_str()).collect::<Vec<&str>>();
    assert!(ids == vec!["1003.pbs", "1005.pbs"]);
}
