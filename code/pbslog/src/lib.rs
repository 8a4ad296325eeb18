/// The PBS server writes an accounting log: one file per day, one line per event, and for every
/// finished job an "E" (end) record carrying the job's attributes and its final resource usage.
/// This library reads those records and turns them into flat rows suitable for storage: one row
/// per job, and one row per GPU per job when the site's GPU monitoring hook has added per-GPU
/// statistics to the job's resources_used.
///
/// The record format is loose.  The attribute part of a line is `name=value` entries separated by
/// spaces, but values can themselves contain spaces, '=' and ';', and there is no quoting.  We
/// therefore don't split on delimiters; instead we look for the positions of the names we know
/// about (a configurable list, plus any `resources_used.*` and `Resource_List.*` name) and cut the
/// line at those positions.  See tokenizer.rs.
///
/// The GPU statistics are packed one metric per resource, all GPUs of the job in the value, eg
///
///   resources_used.GPU_smClock_average_per_node_gpu=n1:(0:1410MHZ+1:1400MHZ)+n2:(0:1380MHZ)
///
/// and have to be decoded (gpustat.rs), stripped of units (units.rs) and transposed into one
/// entity per GPU (usage.rs).
///
/// The processing breaks down as:
///
/// - Find log files in the accounting directory, filtering by date (logtree.rs).
///
/// - Parse the end records into JobRecords, dropping lines that can't be parsed (logfile.rs,
///   tokenizer.rs, jobrecord.rs).
///
/// - Select jobs and derive job rows and GPU usage rows, dropping what can't be derived at the
///   smallest granularity possible (ingest.rs, usage.rs, schema.rs).
///
/// - Merge the rows into a store keyed by job and GPU (store.rs).
///
/// Failures for single lines, jobs and GPUs are AcctErrors; they are logged and counted and never
/// stop the processing.  I/O failures stop it and are returned as anyhow errors.
mod error;
mod gpustat;
mod ingest;
mod jobrecord;
mod logfile;
mod logtree;
mod schema;
mod store;
mod tokenizer;
mod units;
mod usage;

// Errors for lines, jobs and GPUs that can't be processed.

pub use error::AcctError;
pub use error::AcctResult;

// Split the attribute part of an accounting line into (name, value) entries.

pub use tokenizer::FieldTokenizer;

// One job end record: required attributes, other attributes, and the two resource maps.

pub use jobrecord::JobRecord;
pub use jobrecord::ResourceMap;

// The attributes every job end record must have.

pub use jobrecord::REQUIRED_FIELDS;

// Build a JobRecord from tokenized entries.

pub use jobrecord::assemble_job;

// Split an accounting line into its four parts.

pub use logfile::split_line;
pub use logfile::AcctLine;

// Parse a single line, a stream of lines, or a file into job records.

pub use logfile::parse_line;
pub use logfile::parse_lines;
pub use logfile::parse_logfile;

// Find the daily log files within a date range.

pub use logtree::find_logfiles;

// Read a set of log files into job records, counting discarded lines.

pub use logtree::read_logfiles;

// Decode one packed per-GPU metric value into (node:gpu, value) pairs.

pub use gpustat::decode_gpu_stats;
pub use gpustat::RawGpuStats;

// Unit handling for GPU metric values.

pub use units::duration_to_hours;
pub use units::strip_units;
pub use units::MetricValue;
pub use units::UnitPolicy;

// The eight GPU metrics, their unit policies, and the per-GPU entity built from them.

pub use usage::GpuMetric;
pub use usage::GpuUsage;
pub use usage::GpuUsageAssembler;
pub use usage::GpuUsageEntity;
pub use usage::PolicyTable;
pub use usage::NUM_GPU_METRICS;

// Flat output rows.

pub use schema::memory_to_gb;
pub use schema::GpuUsageRow;
pub use schema::JobRow;

// Select jobs and turn them into rows.

pub use ingest::ingest_jobs;
pub use ingest::Ingested;
pub use ingest::JobFilter;

// File-backed row store with upsert semantics.

pub use store::MergeStore;
