/// A file-backed table pair for the output rows.  Rows are upserted: a job row replaces the row
/// with the same job_id, a GPU usage row replaces the row with the same job_id and GPU identity.
/// Reprocessing a log file, which happens when the file was read while still being written, is
/// therefore harmless.
///
/// The file is a single JSON object `{ "jobs": [...], "gpu_usage": [...] }` with the rows sorted
/// by key.
use crate::schema::{GpuUsageRow, JobRow};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

#[derive(Default)]
pub struct MergeStore {
    jobs: BTreeMap<String, JobRow>,
    usages: BTreeMap<(String, String), GpuUsageRow>,
}

#[derive(Serialize, Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    jobs: Vec<JobRow>,
    #[serde(default)]
    gpu_usage: Vec<GpuUsageRow>,
}

impl MergeStore {
    pub fn new() -> MergeStore {
        MergeStore::default()
    }

    /// Load the store from `path`.  A file that does not exist is an empty store.
    pub fn load(path: &Path) -> Result<MergeStore> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(MergeStore::new()),
            Err(e) => return Err(e).context("Reading store"),
        };
        let file: StoreFile = serde_json::from_str(&text).context("Store is not well-formed")?;
        let mut store = MergeStore::new();
        store.upsert_jobs(file.jobs);
        store.upsert_usages(file.gpu_usage);
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = StoreFile {
            jobs: self.jobs.values().cloned().collect(),
            gpu_usage: self.usages.values().cloned().collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?).context("Writing store")?;
        debug!(
            jobs = file.jobs.len(),
            gpu_usage = file.gpu_usage.len(),
            "Saved store"
        );
        Ok(())
    }

    pub fn upsert_jobs<I: IntoIterator<Item = JobRow>>(&mut self, rows: I) {
        for row in rows {
            self.jobs.insert(row.job_id.clone(), row);
        }
    }

    pub fn upsert_usages<I: IntoIterator<Item = GpuUsageRow>>(&mut self, rows: I) {
        for row in rows {
            self.usages.insert(
                (row.job_id.clone(), row.node_name_and_gpu_number.clone()),
                row,
            );
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobRow> {
        self.jobs.values()
    }

    pub fn usages(&self) -> impl Iterator<Item = &GpuUsageRow> {
        self.usages.values()
    }
}

#[cfg(test)]
fn job_row(id: &str, ngpus: i64) -> JobRow {
    JobRow {
        job_id: id.to_string(),
        ngpus,
        energy_used: None,
        max_mem: Some(1.0),
        gpu_duration: None,
        starttime: 50,
        endtime: 100,
        used_walltime: Some(50),
    }
}

#[cfg(test)]
fn usage_row(id: &str, gpu: &str, energy: f64) -> GpuUsageRow {
    GpuUsageRow {
        job_id: id.to_string(),
        node_name_and_gpu_number: gpu.to_string(),
        mem_clock_avg: Some(1215),
        mem_util_max: Some(40.0),
        mem_used_max: None,
        mem_util_avg: Some(20.0),
        sm_clock_avg: Some(1410),
        sm_util_avg: Some(90.0),
        energy_used: Some(energy),
        gpu_duration: Some(1.5),
    }
}

#[test]
fn test_upsert() {
    let mut store = MergeStore::new();
    store.upsert_jobs(vec![job_row("2.s", 1), job_row("1.s", 0)]);
    store.upsert_jobs(vec![job_row("2.s", 4)]);
    let jobs = store.jobs().collect::<Vec<&JobRow>>();
    assert!(jobs.len() == 2);
    assert!(jobs[0].job_id == "1.s");
    assert!(jobs[1].ngpus == 4);

    store.upsert_usages(vec![usage_row("2.s", "n1:0", 1.0), usage_row("2.s", "n1:1", 2.0)]);
    store.upsert_usages(vec![usage_row("2.s", "n1:1", 3.0), usage_row("3.s", "n1:1", 4.0)]);
    let energy = store
        .usages()
        .map(|u| u.energy_used.unwrap())
        .collect::<Vec<f64>>();
    assert!(energy == vec![1.0, 3.0, 4.0]);
}

#[test]
fn test_load_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let store = MergeStore::load(&path).unwrap();
    assert!(store.jobs().count() == 0 && store.usages().count() == 0);

    let mut store = MergeStore::new();
    store.upsert_jobs(vec![job_row("1.s", 1)]);
    store.upsert_usages(vec![usage_row("1.s", "n1:0", 1.0)]);
    store.save(&path).unwrap();

    let mut store = MergeStore::load(&path).unwrap();
    assert!(store.jobs().next() == Some(&job_row("1.s", 1)));
    assert!(store.usages().next() == Some(&usage_row("1.s", "n1:0", 1.0)));

    store.upsert_jobs(vec![job_row("1.s", 2)]);
    store.save(&path).unwrap();
    let store = MergeStore::load(&path).unwrap();
    assert!(store.jobs().count() == 1);
    assert!(store.jobs().next().unwrap().ngpus == 2);

    fs::write(&path, "not json").unwrap();
    assert!(MergeStore::load(&path).is_err());
}
