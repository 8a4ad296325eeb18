/// Enumerate accounting log files in a directory; read sets of files.
use crate::jobrecord::JobRecord;
use crate::logfile::parse_logfile;
use crate::tokenizer::FieldTokenizer;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use rustutils::date_from_log_name;
use std::path;
use tracing::info;

/// Find the accounting log files in `data_path`.  The returned names are sorted lexicographically,
/// which is also date order.
///
/// The PBS server keeps one file per day in its accounting directory, named YYYYMMDD.  We list
/// the regular files in `data_path` (not recursively) whose name is such a date, and if `from`
/// or `to` is given, whose date is within the inclusive range.
///
/// This returns an error if `data_path` does not name a directory or can't be read.  It does not
/// return an error if the files can't be read; that has to be handled later.
///
/// File names that are not representable as UTF8 are ignored.

pub fn find_logfiles(
    data_path: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<String>> {
    let p = path::Path::new(data_path);
    if !p.is_dir() {
        // Path redacted so as not to reveal secrets
        bail!("Not a viable data directory");
    }

    let mut filenames = vec![];
    for entry in p.read_dir()? {
        // Bad directory entries are ignored, though these would probably be I/O errors.
        let Ok(entry) = entry else {
            continue;
        };
        let p = entry.path();
        if !p.is_file() {
            continue;
        }
        let (Some(pstr), Some(name)) = (p.to_str(), p.file_name().and_then(|n| n.to_str())) else {
            continue;
        };
        let Some(date) = date_from_log_name(name) else {
            continue;
        };
        if from.is_some_and(|from| date < from) || to.is_some_and(|to| date > to) {
            continue;
        }
        filenames.push(pstr.to_string());
    }
    filenames.sort();
    Ok(filenames)
}

/// Read all the files into a vector of job records, in file order and then line order.
///
/// Returns error on I/O error and discards illegal records, but returns the number of records
/// discarded.

pub fn read_logfiles(
    logfiles: &[String],
    tokenizer: &FieldTokenizer,
) -> Result<(Vec<JobRecord>, usize)> {
    let mut jobs = vec![];
    let mut discarded = 0;
    for file in logfiles {
        discarded += parse_logfile(file, tokenizer, &mut jobs)?;
    }
    info!(
        files = logfiles.len(),
        jobs = jobs.len(),
        discarded,
        "Read accounting logs"
    );
    Ok((jobs, discarded))
}

#[cfg(test)]
fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

#[test]
fn test_find_logfiles1() {
    // No date bounds: every file with a date name, but not README, the malformed names, or the
    // directory that looks like a date.
    let xs = find_logfiles("../tests/pbslog/acct", None, None).unwrap();
    assert!(xs.eq(&vec![
        "../tests/pbslog/acct/20230531",
        "../tests/pbslog/acct/20230601",
        "../tests/pbslog/acct/20230602",
    ]));
}

#[test]
fn test_find_logfiles2() {
    // Inclusive bounds.
    let xs = find_logfiles("../tests/pbslog/acct", ymd(2023, 6, 1), ymd(2023, 6, 2)).unwrap();
    assert!(xs.eq(&vec![
        "../tests/pbslog/acct/20230601",
        "../tests/pbslog/acct/20230602",
    ]));
    let xs = find_logfiles("../tests/pbslog/acct", None, ymd(2023, 5, 31)).unwrap();
    assert!(xs.eq(&vec!["../tests/pbslog/acct/20230531"]));
    let xs = find_logfiles("../tests/pbslog/acct", ymd(2024, 1, 1), None).unwrap();
    assert!(xs.is_empty());
}

#[test]
fn test_find_logfiles3() {
    // Nonexistent data_path, and a file rather than a directory.
    assert!(find_logfiles("../tests/pbslog/no-such-dir", None, None).is_err());
    assert!(find_logfiles("../tests/pbslog/acct/20230601", None, None).is_err());
}

#[test]
fn test_read_logfiles() {
    let tokenizer = FieldTokenizer::new(&rustutils::default_field_names());
    let files = find_logfiles("../tests/pbslog/acct", None, None).unwrap();
    let (jobs, discarded) = read_logfiles(&files, &tokenizer).unwrap();
    assert!(discarded == 1);
    let ids = jobs.iter().map(|j| j.id()).collect::<Vec<&str>>();
    assert!(ids == vec!["1001.pbs", "1002.pbs", "1003.pbs", "1004.pbs", "1005.pbs"]);
}
