/// Print job rows.
use crate::format;
use crate::PrintArgs;

use anyhow::Result;
use chrono::DateTime;
use pbslog::JobRow;
use std::collections::HashMap;
use std::io;

pub fn print_jobs(output: &mut dyn io::Write, print_args: &PrintArgs, rows: &[JobRow]) -> Result<()> {
    let (formatters, aliases) = my_formatters();
    let spec = print_args.fmt.as_deref().unwrap_or(FMT_DEFAULTS);
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases)?;
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, rows)
}

pub fn fmt_help() -> format::Help {
    let (formatters, aliases) = my_formatters();
    format::Help {
        fields: formatters.keys().cloned().collect::<Vec<String>>(),
        aliases: aliases.into_iter().collect::<Vec<(String, Vec<String>)>>(),
        defaults: FMT_DEFAULTS.to_string(),
    }
}

const FMT_DEFAULTS: &str = "job_id,ngpus,energy_used,max_mem,gpu_duration,start,end,used_walltime";

type JobFormatter = &'static dyn Fn(&JobRow) -> String;

fn my_formatters() -> (HashMap<String, JobFormatter>, HashMap<String, Vec<String>>) {
    let mut formatters: HashMap<String, JobFormatter> = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    formatters.insert("job_id".to_string(), &format_job_id);
    formatters.insert("ngpus".to_string(), &format_ngpus);
    formatters.insert("energy_used".to_string(), &format_energy_used);
    formatters.insert("max_mem".to_string(), &format_max_mem);
    formatters.insert("gpu_duration".to_string(), &format_gpu_duration);
    formatters.insert("starttime".to_string(), &format_starttime);
    formatters.insert("endtime".to_string(), &format_endtime);
    formatters.insert("start".to_string(), &format_start);
    formatters.insert("end".to_string(), &format_end);
    formatters.insert("used_walltime".to_string(), &format_used_walltime);

    // The columns of the stored table, in order.
    aliases.insert(
        "all".to_string(),
        [
            "job_id",
            "ngpus",
            "energy_used",
            "max_mem",
            "gpu_duration",
            "starttime",
            "endtime",
            "used_walltime",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );

    (formatters, aliases)
}

pub fn format_opt<T: ToString>(x: Option<T>) -> String {
    x.map(|x| x.to_string()).unwrap_or_default()
}

pub fn format_unix_time(t: i64) -> String {
    match DateTime::from_timestamp(t, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => t.to_string(),
    }
}

fn format_job_id(d: &JobRow) -> String {
    d.job_id.clone()
}

fn format_ngpus(d: &JobRow) -> String {
    d.ngpus.to_string()
}

fn format_energy_used(d: &JobRow) -> String {
    format_opt(d.energy_used)
}

fn format_max_mem(d: &JobRow) -> String {
    format_opt(d.max_mem)
}

fn format_gpu_duration(d: &JobRow) -> String {
    format_opt(d.gpu_duration)
}

fn format_starttime(d: &JobRow) -> String {
    d.starttime.to_string()
}

fn format_endtime(d: &JobRow) -> String {
    d.endtime.to_string()
}

fn format_start(d: &JobRow) -> String {
    format_unix_time(d.starttime)
}

fn format_end(d: &JobRow) -> String {
    format_unix_time(d.endtime)
}

fn format_used_walltime(d: &JobRow) -> String {
    format_opt(d.used_walltime)
}

#[cfg(test)]
fn test_rows() -> Vec<JobRow> {
    vec![
        JobRow {
            job_id: "1002.pbs".to_string(),
            ngpus: 3,
            energy_used: Some(900.0),
            max_mem: Some(24.0),
            gpu_duration: Some(4.5),
            starttime: 1685577600,
            endtime: 1685583000,
            used_walltime: Some(5400),
        },
        JobRow {
            job_id: "1004.pbs".to_string(),
            ngpus: 1,
            energy_used: None,
            max_mem: Some(1.0),
            gpu_duration: None,
            starttime: 1685577600,
            endtime: 1685581200,
            used_walltime: None,
        },
    ]
}

#[test]
fn test_print_jobs() {
    let mut out = Vec::new();
    let args = PrintArgs {
        fmt: Some("all,csv".to_string()),
    };
    print_jobs(&mut out, &args, &test_rows()).unwrap();
    assert!(
        String::from_utf8(out).unwrap()
            == "1002.pbs,3,900,24,4.5,1685577600,1685583000,5400\n\
                1004.pbs,1,,1,,1685577600,1685581200,\n"
    );

    let mut out = Vec::new();
    let args = PrintArgs {
        fmt: Some("job_id,start,end,noheader".to_string()),
    };
    print_jobs(&mut out, &args, &test_rows()).unwrap();
    assert!(
        String::from_utf8(out).unwrap()
            == "1002.pbs  2023-06-01 00:00  2023-06-01 01:30\n\
                1004.pbs  2023-06-01 00:00  2023-06-01 01:00\n"
    );

    let mut out = Vec::new();
    let args = PrintArgs {
        fmt: Some("fixed".to_string()),
    };
    assert!(print_jobs(&mut out, &args, &test_rows()).is_err());
}
