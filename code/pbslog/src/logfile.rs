/// Reader for PBS accounting log files.
///
/// An accounting line is
///
///   <timestamp>;<record type>;<id>;<fields>
///
/// where the fields part may itself contain ';', so we split into at most four parts.  Only "E"
/// (job end) records carry final resource usage and only those are parsed; the other record types
/// and '#' comment lines are skipped without comment.
///
/// NOTE:
///
/// - A bad record is dropped and counted, and the reason is logged, but reading continues.  Log
///   files are appended to by the server while we may be reading them, so a partly written line
///   at the end is not unusual.
///
/// - I/O errors, including bad UTF-8, end the read and are returned to the caller.
use crate::error::{AcctError, AcctResult};
use crate::jobrecord::{assemble_job, JobRecord};
use crate::tokenizer::FieldTokenizer;

use anyhow::Result;
use rustutils::parse_acct_timestamp;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, warn};

const END_RECORD: &str = "E";

/// The four parts of an accounting line.

#[derive(Debug, PartialEq)]
pub struct AcctLine<'a> {
    pub timestamp: &'a str,
    pub record_type: &'a str,
    pub id: &'a str,
    pub fields: &'a str,
}

/// Split a line into its parts.  Returns Ok(None) for lines that are not job end records: blank
/// lines, comments, and other record types.

pub fn split_line(line: &str) -> AcctResult<Option<AcctLine<'_>>> {
    let line = line.trim_end_matches(&['\n', '\r'][..]);
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let parts = line.splitn(4, ';').collect::<Vec<&str>>();
    if parts.len() >= 2 && parts[1] != END_RECORD {
        return Ok(None);
    }
    if parts.len() != 4 {
        return Err(AcctError::MalformedLine(parts.len()));
    }
    Ok(Some(AcctLine {
        timestamp: parts[0],
        record_type: parts[1],
        id: parts[2],
        fields: parts[3],
    }))
}

/// Parse one line into a job record, or Ok(None) if the line is not a job end record.  A
/// timestamp that does not parse is not an error, the record just has no time.

pub fn parse_line(line: &str, tokenizer: &FieldTokenizer) -> AcctResult<Option<JobRecord>> {
    let Some(parts) = split_line(line)? else {
        return Ok(None);
    };
    let timestamp = parse_acct_timestamp(parts.timestamp).ok();
    let entries = tokenizer.tokenize(parts.fields)?;
    assemble_job(parts.id, timestamp, &entries).map(Some)
}

/// Parse every line from `reader`, appending job records to `jobs` in the order encountered.
/// Returns the number of discarded lines.  Lines that are skipped by design are not counted.

pub fn parse_lines<R: BufRead>(
    reader: R,
    tokenizer: &FieldTokenizer,
    jobs: &mut Vec<JobRecord>,
) -> Result<usize> {
    let mut discarded = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line, tokenizer) {
            Ok(Some(job)) => jobs.push(job),
            Ok(None) => {}
            Err(e) => {
                warn!(line = lineno + 1, "Discarding record: {e}");
                discarded += 1;
            }
        }
    }
    Ok(discarded)
}

/// Parse a log file, see parse_lines.

pub fn parse_logfile(
    file_name: &str,
    tokenizer: &FieldTokenizer,
    jobs: &mut Vec<JobRecord>,
) -> Result<usize> {
    let file = File::open(file_name)?;
    let before = jobs.len();
    let discarded = parse_lines(BufReader::new(file), tokenizer, jobs)?;
    debug!(
        file = file_name,
        jobs = jobs.len() - before,
        discarded,
        "Parsed accounting log"
    );
    Ok(discarded)
}

#[cfg(test)]
fn test_tokenizer() -> FieldTokenizer {
    FieldTokenizer::new(&rustutils::default_field_names())
}

#[cfg(test)]
const E2E_LINE: &str = "06/01/2023 00:00:00;E;123.host;user=alice exec_host=n1/0 \
    exec_vnode=(n1:ncpus=1) group=g end=100 start=50 ctime=10 qtime=10 etime=10 Exit_status=0 \
    queue=q jobname=job1 session=1 run_count=1 resources_used.ngpus=1 \
    resources_used.GPU_memoryClock_average_per_node_gpu=n1:(0:1000MHZ) Resource_List.ngpus=1";

#[test]
fn test_split_line() {
    let p = split_line("06/01/2023 00:00:00;E;1.s;a=b;c=d\n").unwrap().unwrap();
    assert!(p.timestamp == "06/01/2023 00:00:00");
    assert!(p.record_type == "E");
    assert!(p.id == "1.s");
    assert!(p.fields == "a=b;c=d");

    assert!(split_line("06/01/2023 00:00:00;Q;1.s;queue=q").unwrap().is_none());
    assert!(split_line("06/01/2023 00:00:00;L;license;floating").unwrap().is_none());
    assert!(split_line("#06/01/2023 00:00:00;E;1.s;a=b").unwrap().is_none());
    assert!(split_line("# a comment").unwrap().is_none());
    assert!(split_line("  \r\n").unwrap().is_none());
    assert!(split_line("06/01/2023 00:00:00;E;1.s").unwrap_err() == AcctError::MalformedLine(3));
    assert!(split_line("garbage").unwrap_err() == AcctError::MalformedLine(1));
}

#[test]
fn test_end_to_end_line() {
    let t = test_tokenizer();
    let job = parse_line(E2E_LINE, &t).unwrap().unwrap();
    assert!(job.id() == "123.host");
    assert!(job.timestamp() == Some(rustutils::parse_acct_timestamp("06/01/2023 00:00:00").unwrap()));
    assert!(job.resources_used().get("ngpus") == Some("1"));
    assert!(job.resource_list().get("ngpus") == Some("1"));
    assert!(job.field("exec_vnode") == "(n1:ncpus=1)");
    assert!(job.field("run_count") == "1");

    let raw = crate::gpustat::decode_gpu_stats(
        "GPU_memoryClock_average_per_node_gpu",
        job.resources_used()
            .get("GPU_memoryClock_average_per_node_gpu")
            .unwrap(),
    )
    .unwrap();
    let stripped = crate::units::strip_units(&raw, crate::units::UnitPolicy::Clock.suffix_len());
    assert!(stripped == vec![("n1:0".to_string(), "1000".to_string())]);
}

#[test]
fn test_parse_lines() {
    let text = format!(
        "# header\n\
         {E2E_LINE}\n\
         06/01/2023 00:00:01;Q;124.host;queue=q\n\
         06/01/2023 00:00:02;E;125.host;user=bob group=g\n\
         broken\n\
         {}\n",
        E2E_LINE.replace("123.host", "126.host")
    );
    let t = test_tokenizer();
    let mut jobs = vec![];
    let discarded = parse_lines(text.as_bytes(), &t, &mut jobs).unwrap();
    assert!(discarded == 2);
    assert!(jobs.iter().map(|j| j.id()).collect::<Vec<&str>>() == vec!["123.host", "126.host"]);
}

#[test]
fn test_parse_logfile() {
    let t = test_tokenizer();
    let mut jobs = vec![];
    let discarded = parse_logfile("../tests/pbslog/acct/20230601", &t, &mut jobs).unwrap();
    assert!(discarded == 1);
    assert!(jobs.len() == 3);
    assert!(parse_logfile("../tests/pbslog/acct/nonexistent", &t, &mut jobs).is_err());
}
