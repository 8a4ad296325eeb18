/// `pbsalyze` -- Extract job and GPU usage data from PBS accounting logs
///
/// Run with --help for brief help.
///
/// Quirks
///
/// The --from and --to values select log *files* by the date in the file name, not records by
/// their timestamp.  A job that ends just after midnight is in the next day's file.
///
/// The record filters (--user, --exclude-user, --host, --job) select *jobs*; a job selected by
/// --host is reported with all its GPUs, not just those on the named hosts.
///
/// The `store` command merges into an existing store file, so running it twice on the same logs
/// leaves the store unchanged.
mod format;
mod gpus;
mod jobs;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pbslog::{FieldTokenizer, GpuUsageAssembler, Ingested, JobFilter, JobRecord, MergeStore};
use rustutils::{default_field_names, parse_date, read_acct_config, read_field_names};
use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Parse the accounting logs, apply filtering, and print job records as JSON, one per line
    Parse(ParseCmdArgs),

    /// Print one row per job
    Jobs(ReportCmdArgs),

    /// Print one row per GPU per job
    Gpus(ReportCmdArgs),

    /// Merge job and GPU rows into a store file, replacing rows for the same job and GPU
    Store(StoreCmdArgs),
}

#[derive(Args, Debug)]
pub struct ParseCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    record_filter_args: RecordFilterArgs,

    #[command(flatten)]
    input_args: InputArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ReportCmdArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    record_filter_args: RecordFilterArgs,

    #[command(flatten)]
    input_args: InputArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct StoreCmdArgs {
    /// The store file, created if it does not exist
    store: String,

    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    record_filter_args: RecordFilterArgs,

    #[command(flatten)]
    input_args: InputArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Select the accounting directory [default: $PBS_ACCT_ROOT, or the PBS server default]
    #[arg(long)]
    data_path: Option<String>,

    /// Select log files for this date and later.  Format can be YYYY-MM-DD or YYYYMMDD
    /// [default: no limit]
    #[arg(long, short, value_parser = parse_date)]
    from: Option<NaiveDate>,

    /// Select log files for this date and earlier.  Format can be YYYY-MM-DD or YYYYMMDD
    /// [default: no limit]
    #[arg(long, short, value_parser = parse_date)]
    to: Option<NaiveDate>,

    /// Log file names (overrides --data-path)
    #[arg(last = true)]
    logfiles: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct RecordFilterArgs {
    /// Select jobs that ran on this node (repeatable) [default: all]
    #[arg(long)]
    host: Vec<String>,

    /// Select jobs with this user, "-" for all (repeatable) [default: all]
    #[arg(long, short)]
    user: Vec<String>,

    /// Exclude jobs where the user name equals this string (repeatable) [default: none]
    #[arg(long)]
    exclude_user: Vec<String>,

    /// Select this job, either the full ID or the sequence number (repeatable) [default: all]
    #[arg(long, short)]
    job: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// File containing JSON data with the cluster configuration [default: none]
    #[arg(long)]
    config_file: Option<String>,

    /// File containing the known attribute names, one per line (overrides the configuration)
    /// [default: built-in list]
    #[arg(long)]
    field_names: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct PrintArgs {
    /// Select fields and format for the output, "help" for a list [default: command dependent]
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Log progress and per-file statistics to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

/// Default location of the accounting logs on a PBS server.

const DEFAULT_DATA_PATH: &str = "/var/spool/pbs/server_priv/accounting";

fn main() {
    match pbsalyze() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn pbsalyze() -> Result<()> {
    let cli = Cli::parse();

    let mut stdout = io::stdout();
    match cli.command {
        Commands::Version => {
            // Syntax:
            //  - components of the version string are space-separated but there are spaces nowhere else
            //  - the keyword "pbsalyze" is always the first component
            //  - every component is keyword(value)
            //  - "version" carries a semver
            println!("pbsalyze version({})", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Parse(ref a) => {
            let (jobs, filter) =
                read_jobs(&a.source_args, &a.record_filter_args, &a.input_args, &a.meta_args)?;
            print_records(&mut stdout, &jobs, &filter)
        }
        Commands::Jobs(ref a) => {
            if format::maybe_help(&a.print_args.fmt, jobs::fmt_help) {
                return Ok(());
            }
            let (jobs, filter) =
                read_jobs(&a.source_args, &a.record_filter_args, &a.input_args, &a.meta_args)?;
            let ingested = ingest(&jobs, &filter);
            jobs::print_jobs(&mut stdout, &a.print_args, &ingested.job_rows)
        }
        Commands::Gpus(ref a) => {
            if format::maybe_help(&a.print_args.fmt, gpus::fmt_help) {
                return Ok(());
            }
            let (jobs, filter) =
                read_jobs(&a.source_args, &a.record_filter_args, &a.input_args, &a.meta_args)?;
            let ingested = ingest(&jobs, &filter);
            gpus::print_gpus(&mut stdout, &a.print_args, &ingested.usage_rows)
        }
        Commands::Store(ref a) => {
            let (jobs, filter) =
                read_jobs(&a.source_args, &a.record_filter_args, &a.input_args, &a.meta_args)?;
            let ingested = ingest(&jobs, &filter);
            let path = Path::new(&a.store);
            let mut store = MergeStore::load(path)?;
            store.upsert_jobs(ingested.job_rows);
            store.upsert_usages(ingested.usage_rows);
            store.save(path)
        }
    }
}

/// The setup shared by every command that reads logs: logging, field names, the record filter, and
/// the parsed jobs from the selected log files.

fn read_jobs(
    source_args: &SourceArgs,
    record_filter_args: &RecordFilterArgs,
    input_args: &InputArgs,
    meta_args: &MetaArgs,
) -> Result<(Vec<JobRecord>, JobFilter)> {
    init_logging(meta_args.verbose);

    let (field_names, config_excluded) = field_names_and_exclusions(input_args)?;
    let filter = make_filter(record_filter_args, config_excluded);
    let logfiles = select_logfiles(source_args)?;
    debug!(files = ?logfiles, "Log files");

    let tokenizer = FieldTokenizer::new(&field_names);
    let (jobs, _) = pbslog::read_logfiles(&logfiles, &tokenizer)?;
    Ok((jobs, filter))
}

/// Install a stderr subscriber.  RUST_LOG overrides the level selected by --verbose.

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    // A subscriber that is already installed stays.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

/// The attribute names come from --field-names, or the configuration file, or the built-in list,
/// in that order.  Users excluded by the configuration are returned along with them.

fn field_names_and_exclusions(input_args: &InputArgs) -> Result<(Vec<String>, Vec<String>)> {
    let config = match input_args.config_file {
        Some(ref filename) => Some(read_acct_config(filename)?),
        None => None,
    };
    let field_names = if let Some(ref filename) = input_args.field_names {
        read_field_names(filename)?
    } else if let Some(ref config) = config {
        config.field_names.clone()
    } else {
        default_field_names()
    };
    let excluded = config.map(|c| c.exclude_user).unwrap_or_default();
    Ok((field_names, excluded))
}

fn make_filter(args: &RecordFilterArgs, config_excluded: Vec<String>) -> JobFilter {
    let users = if args.user.iter().any(|u| u == "-") {
        vec![]
    } else {
        args.user.clone()
    };
    let mut exclude_users = config_excluded;
    exclude_users.extend(args.exclude_user.iter().cloned());
    JobFilter {
        users,
        exclude_users,
        hosts: args.host.clone(),
        jobs: args.job.clone(),
    }
}

/// Explicit log files are used as given, with no date filtering.

fn select_logfiles(source_args: &SourceArgs) -> Result<Vec<String>> {
    if let (Some(from), Some(to)) = (source_args.from, source_args.to) {
        if from > to {
            bail!("The --from date is after the --to date");
        }
    }
    if !source_args.logfiles.is_empty() {
        return Ok(source_args.logfiles.clone());
    }
    let data_path = match source_args.data_path {
        Some(ref p) => p.clone(),
        None => env::var("PBS_ACCT_ROOT").unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string()),
    };
    info!(data_path = data_path.as_str(), "Data path");
    pbslog::find_logfiles(&data_path, source_args.from, source_args.to)
}

fn ingest(jobs: &[JobRecord], filter: &JobFilter) -> Ingested {
    let ingested = pbslog::ingest_jobs(jobs, filter, &GpuUsageAssembler::new());
    info!(
        jobs = ingested.job_rows.len(),
        gpus = ingested.usage_rows.len(),
        discarded_jobs = ingested.discarded_jobs,
        abandoned_gpu_jobs = ingested.abandoned_gpu_jobs,
        dropped_gpus = ingested.dropped_gpus,
        "Derived rows"
    );
    ingested
}

fn print_records(output: &mut dyn Write, jobs: &[JobRecord], filter: &JobFilter) -> Result<()> {
    for job in jobs.iter().filter(|j| filter.matches(j)) {
        // Ignore errors here, they are common for broken pipelines
        let _ = writeln!(output, "{}", job.to_json());
    }
    Ok(())
}

#[cfg(test)]
fn parse_cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn test_cli() {
    let cli = parse_cli(&[
        "pbsalyze",
        "jobs",
        "--data-path",
        "../tests/pbslog/acct",
        "--from",
        "2023-06-01",
        "--to",
        "20230602",
        "--user",
        "bob",
        "--host",
        "g1",
        "--fmt",
        "all,csv",
    ]);
    let Commands::Jobs(a) = cli.command else {
        panic!("Expected jobs")
    };
    assert!(a.source_args.from == NaiveDate::from_ymd_opt(2023, 6, 1));
    assert!(a.source_args.to == NaiveDate::from_ymd_opt(2023, 6, 2));
    assert!(a.record_filter_args.user == vec!["bob"]);
    assert!(a.print_args.fmt.as_deref() == Some("all,csv"));
    assert!(!a.meta_args.verbose);

    let cli = parse_cli(&["pbsalyze", "store", "out.json", "-v", "--", "a", "b"]);
    let Commands::Store(a) = cli.command else {
        panic!("Expected store")
    };
    assert!(a.store == "out.json");
    assert!(a.meta_args.verbose);
    assert!(a.source_args.logfiles == vec!["a", "b"]);

    assert!(Cli::try_parse_from(["pbsalyze", "jobs", "--from", "June"]).is_err());
}

#[test]
fn test_version_and_read_jobs() {
    assert!(matches!(parse_cli(&["pbsalyze", "version"]).command, Commands::Version));

    let cli = parse_cli(&[
        "pbsalyze",
        "parse",
        "--data-path",
        "../tests/pbslog/acct",
        "--exclude-user",
        "bob",
    ]);
    let Commands::Parse(a) = cli.command else {
        panic!("Expected parse")
    };
    let (jobs, filter) =
        read_jobs(&a.source_args, &a.record_filter_args, &a.input_args, &a.meta_args).unwrap();
    assert!(!jobs.is_empty());
    assert!(filter.exclude_users == vec!["bob"]);
    assert!(jobs.iter().filter(|j| filter.matches(j)).all(|j| j.field("user") != "bob"));

    // The shared setup can run more than once in a process.
    assert!(read_jobs(&a.source_args, &a.record_filter_args, &a.input_args, &a.meta_args).is_ok());
}

#[test]
fn test_select_logfiles() {
    let args = SourceArgs {
        data_path: Some("../tests/pbslog/acct".to_string()),
        from: NaiveDate::from_ymd_opt(2023, 6, 1),
        to: None,
        logfiles: vec![],
    };
    let files = select_logfiles(&args).unwrap();
    assert!(files.len() == 2);

    let args = SourceArgs {
        data_path: None,
        from: None,
        to: None,
        logfiles: vec!["x".to_string()],
    };
    assert!(select_logfiles(&args).unwrap() == vec!["x"]);

    let args = SourceArgs {
        data_path: Some("../tests/pbslog/acct".to_string()),
        from: NaiveDate::from_ymd_opt(2023, 6, 2),
        to: NaiveDate::from_ymd_opt(2023, 6, 1),
        logfiles: vec![],
    };
    assert!(select_logfiles(&args).is_err());
}

#[test]
fn test_config_and_filter() {
    let input = InputArgs {
        config_file: Some("../tests/pbslog/whitebox-config.json".to_string()),
        field_names: None,
    };
    let (names, excluded) = field_names_and_exclusions(&input).unwrap();
    assert!(names == vec!["user", "group", "jobname"]);
    assert!(excluded == vec!["root"]);

    let input = InputArgs {
        config_file: Some("../tests/pbslog/whitebox-config.json".to_string()),
        field_names: Some("../tests/pbslog/fieldNames.txt".to_string()),
    };
    let (names, _) = field_names_and_exclusions(&input).unwrap();
    assert!(names.len() == 14);

    let (names, excluded) = field_names_and_exclusions(&InputArgs::default()).unwrap();
    assert!(names == default_field_names());
    assert!(excluded.is_empty());

    let args = RecordFilterArgs {
        user: vec!["-".to_string()],
        exclude_user: vec!["bob".to_string()],
        ..Default::default()
    };
    let filter = make_filter(&args, vec!["root".to_string()]);
    assert!(filter.users.is_empty());
    assert!(filter.exclude_users == vec!["root", "bob"]);
}

#[test]
fn test_store_pipeline() {
    let tokenizer = FieldTokenizer::new(&default_field_names());
    let files = pbslog::find_logfiles("../tests/pbslog/acct", None, None).unwrap();
    let (jobs, _) = pbslog::read_logfiles(&files, &tokenizer).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    for _ in 0..2 {
        let ingested = ingest(&jobs, &JobFilter::default());
        let mut store = MergeStore::load(&path).unwrap();
        store.upsert_jobs(ingested.job_rows);
        store.upsert_usages(ingested.usage_rows);
        store.save(&path).unwrap();
    }
    let store = MergeStore::load(&path).unwrap();
    assert!(store.jobs().count() == 5);
    assert!(store.usages().count() == 5);

    let mut out = Vec::new();
    let filter = JobFilter {
        jobs: vec!["1005".to_string()],
        ..Default::default()
    };
    print_records(&mut out, &jobs, &filter).unwrap();
    let text = String::from_utf8(out).unwrap();
    let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert!(v["jobid"] == "1005.pbs");
    assert!(v["user"] == "bob");
    assert!(v["resources_used"]["GPU_duration_per_node_gpu"] == "g1:(3:30.00min)");
}
