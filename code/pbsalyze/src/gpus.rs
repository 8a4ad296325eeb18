/// Print GPU usage rows, one per GPU per job.
use crate::format;
use crate::jobs::format_opt;
use crate::PrintArgs;

use anyhow::Result;
use pbslog::GpuUsageRow;
use std::collections::HashMap;
use std::io;

pub fn print_gpus(
    output: &mut dyn io::Write,
    print_args: &PrintArgs,
    rows: &[GpuUsageRow],
) -> Result<()> {
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

const FMT_DEFAULTS: &str = "all";

type GpuFormatter = &'static dyn Fn(&GpuUsageRow) -> String;

fn my_formatters() -> (HashMap<String, GpuFormatter>, HashMap<String, Vec<String>>) {
    let mut formatters: HashMap<String, GpuFormatter> = HashMap::new();
    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    formatters.insert("job_id".to_string(), &format_job_id);
    formatters.insert("gpu".to_string(), &format_gpu);
    formatters.insert("mem_clock_avg".to_string(), &format_mem_clock_avg);
    formatters.insert("mem_util_max".to_string(), &format_mem_util_max);
    formatters.insert("mem_used_max".to_string(), &format_mem_used_max);
    formatters.insert("mem_util_avg".to_string(), &format_mem_util_avg);
    formatters.insert("sm_clock_avg".to_string(), &format_sm_clock_avg);
    formatters.insert("sm_util_avg".to_string(), &format_sm_util_avg);
    formatters.insert("energy_used".to_string(), &format_energy_used);
    formatters.insert("gpu_duration".to_string(), &format_gpu_duration);

    aliases.insert(
        "all".to_string(),
        [
            "job_id",
            "gpu",
            "mem_clock_avg",
            "mem_util_max",
            "mem_used_max",
            "mem_util_avg",
            "sm_clock_avg",
            "sm_util_avg",
            "energy_used",
            "gpu_duration",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    aliases.insert(
        "clocks".to_string(),
        vec!["mem_clock_avg".to_string(), "sm_clock_avg".to_string()],
    );
    aliases.insert(
        "util".to_string(),
        vec![
            "mem_util_max".to_string(),
            "mem_util_avg".to_string(),
            "sm_util_avg".to_string(),
        ],
    );

    (formatters, aliases)
}

fn format_job_id(d: &GpuUsageRow) -> String {
    d.job_id.clone()
}

fn format_gpu(d: &GpuUsageRow) -> String {
    d.node_name_and_gpu_number.clone()
}

fn format_mem_clock_avg(d: &GpuUsageRow) -> String {
    format_opt(d.mem_clock_avg)
}

fn format_mem_util_max(d: &GpuUsageRow) -> String {
    format_opt(d.mem_util_max)
}

fn format_mem_used_max(d: &GpuUsageRow) -> String {
    format_opt(d.mem_used_max)
}

fn format_mem_util_avg(d: &GpuUsageRow) -> String {
    format_opt(d.mem_util_avg)
}

fn format_sm_clock_avg(d: &GpuUsageRow) -> String {
    format_opt(d.sm_clock_avg)
}

fn format_sm_util_avg(d: &GpuUsageRow) -> String {
    format_opt(d.sm_util_avg)
}

fn format_energy_used(d: &GpuUsageRow) -> String {
    format_opt(d.energy_used)
}

fn format_gpu_duration(d: &GpuUsageRow) -> String {
    format_opt(d.gpu_duration)
}

#[test]
fn test_print_gpus() {
    let rows = vec![GpuUsageRow {
        job_id: "1005.pbs".to_string(),
        node_name_and_gpu_number: "g1:3".to_string(),
        mem_clock_avg: Some(877),
        mem_util_max: Some(10.0),
        mem_used_max: Some(1.0),
        mem_util_avg: Some(5.0),
        sm_clock_avg: Some(1380),
        sm_util_avg: None,
        energy_used: Some(120.0),
        gpu_duration: Some(0.5),
    }];

    let mut out = Vec::new();
    let args = PrintArgs { fmt: None };
    print_gpus(&mut out, &args, &rows).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 2);
    assert!(lines[0].starts_with("job_id    gpu   mem_clock_avg"));
    assert!(lines[1].starts_with("1005.pbs  g1:3  877"));

    let mut out = Vec::new();
    let args = PrintArgs {
        fmt: Some("gpu,util,csv,header".to_string()),
    };
    print_gpus(&mut out, &args, &rows).unwrap();
    assert!(
        String::from_utf8(out).unwrap()
            == "gpu,mem_util_max,mem_util_avg,sm_util_avg\ng1:3,10,5,\n"
    );
}
