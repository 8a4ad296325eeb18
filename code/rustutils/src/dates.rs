/// Types and utilities for the timestamps and dates found in PBS accounting data.
///
/// Accounting lines carry a local wall-clock timestamp `MM/DD/YYYY HH:MM:SS` without a zone; we
/// treat it as UTC since nothing downstream depends on the zone.  Accounting files are named by
/// the date they cover, `YYYYMMDD`.
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

pub type Timestamp = DateTime<Utc>;

/// Parse the timestamp at the head of an accounting line.

pub fn parse_acct_timestamp(s: &str) -> Result<Timestamp> {
    match NaiveDateTime::parse_from_str(s.trim(), "%m/%d/%Y %H:%M:%S") {
        Ok(t) => Ok(t.and_utc()),
        Err(_) => bail!("Bad accounting timestamp {s}"),
    }
}

/// Parse a PBS duration `[[HH:]MM:]SS` into seconds.  Hours can be any number of digits.

pub fn parse_walltime(s: &str) -> Result<u64> {
    let mut secs = 0u64;
    let mut n = 0;
    for part in s.trim().split(':') {
        n += 1;
        if n > 3 {
            bail!("Bad duration {s}");
        }
        match part.parse::<u64>() {
            Ok(v) => match secs.checked_mul(60).and_then(|x| x.checked_add(v)) {
                Some(x) => secs = x,
                None => bail!("Bad duration {s}"),
            },
            Err(_) => bail!("Bad duration {s}"),
        }
    }
    Ok(secs)
}

/// Parse a date given as YYYY-MM-DD or YYYYMMDD.

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Some(d) = date_from_log_name(s) {
        return Ok(d);
    }
    bail!("Bad date {s}, expected YYYY-MM-DD or YYYYMMDD")
}

/// If `name` is an accounting file name - exactly eight digits forming a valid year-first date -
/// return that date.

pub fn date_from_log_name(name: &str) -> Option<NaiveDate> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap());
    let caps = re.captures(name)?;
    let year = caps[1].parse::<i32>().ok()?;
    let month = caps[2].parse::<u32>().ok()?;
    let day = caps[3].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
use chrono::TimeZone;

#[test]
fn test_parse_acct_timestamp() {
    let t = parse_acct_timestamp("06/01/2023 13:14:15").unwrap();
    assert!(t == Utc.with_ymd_and_hms(2023, 6, 1, 13, 14, 15).unwrap());
    assert!(parse_acct_timestamp("2023-06-01 13:14:15").is_err());
    assert!(parse_acct_timestamp("#06/01/2023 13:14:15").is_err());
}

#[test]
fn test_parse_walltime() {
    assert!(parse_walltime("00:00:00").unwrap() == 0);
    assert!(parse_walltime("01:02:03").unwrap() == 3723);
    assert!(parse_walltime("100:00:01").unwrap() == 360001);
    assert!(parse_walltime("59").unwrap() == 59);
    assert!(parse_walltime("1:00:00:00").is_err());
    assert!(parse_walltime("1:xx:00").is_err());
    assert!(parse_walltime("999999999999999999:00:00").is_err());
    assert!(parse_walltime("0:0:18446744073709551615").unwrap() == u64::MAX);
}

#[test]
fn test_date_from_log_name() {
    assert!(date_from_log_name("20230601") == NaiveDate::from_ymd_opt(2023, 6, 1));
    assert!(date_from_log_name("20231301").is_none());
    assert!(date_from_log_name("2023060").is_none());
    assert!(date_from_log_name("20230601.gz").is_none());
    assert!(date_from_log_name("x20230601").is_none());
    assert!(parse_date("2023-06-02").unwrap() == NaiveDate::from_ymd_opt(2023, 6, 2).unwrap());
    assert!(parse_date("20230602").unwrap() == NaiveDate::from_ymd_opt(2023, 6, 2).unwrap());
    assert!(parse_date("yesterday").is_err());
}
