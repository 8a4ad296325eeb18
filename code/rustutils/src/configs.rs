/// Read configuration data for accounting-log processing.
///
/// There are two sources of configuration:
///
/// The field-name file, a plain text file with one known top-level accounting field name per line.
/// Blank lines and lines starting with '#' are ignored, and a trailing '=' on a name is dropped.
/// The tokenizer can only find fields whose names it knows, so this list has to track whatever the
/// PBS server writes.
///
/// The config file, a JSON object { ... } with the following named fields and value types:
///
///   name - string, the canonical name of the cluster whose logs these are
///   description - string, optional, arbitrary text describing the cluster
///   field-names - array of strings, optional, the known top-level field names; if absent the
///      built-in list is used
///   exclude-user - array of strings, optional, user names whose jobs should be excluded when
///      filtering records
///
/// Any field name starting with '#' is reserved for arbitrary comments.
use anyhow::{bail, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path;

/// The top-level fields of a PBS Pro "E" record as they are written by the server.  The dotted
/// `resources_used.*` and `Resource_List.*` names are found by pattern and are not listed here.

const DEFAULT_FIELD_NAMES: &[&str] = &[
    "user",
    "group",
    "project",
    "account",
    "jobname",
    "queue",
    "resvname",
    "resvID",
    "ctime",
    "qtime",
    "etime",
    "start",
    "end",
    "exec_host",
    "exec_vnode",
    "Exit_status",
    "session",
    "alt_id",
    "run_count",
    "eligible_time",
    "array_indices",
    "pcap_node",
    "pcap_accelerator",
];

pub fn default_field_names() -> Vec<String> {
    DEFAULT_FIELD_NAMES.iter().map(|s| s.to_string()).collect()
}

// See above comment block for field documentation.

#[derive(Debug, Default, Clone)]
pub struct AcctConfig {
    pub name: String,
    pub description: String,
    pub field_names: Vec<String>,
    pub exclude_user: Vec<String>,
}

/// Since the input is human-generated and has optional fields, use the generic JSON parser
/// followed by explicit decoding of the fields, rather than a (derived) strongly-typed parser.

pub fn read_acct_config(filename: &str) -> Result<AcctConfig> {
    let file = File::open(path::Path::new(filename))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)?;
    let mut cfg: AcctConfig = Default::default();
    if let Value::Object(fields) = v {
        cfg.name = grab_string(&fields, "name")?;
        cfg.description = grab_string_opt(&fields, "description")?;
        cfg.field_names = grab_strings_opt(&fields, "field-names")?
            .iter()
            .filter_map(|s| clean_field_name(s))
            .collect();
        if cfg.field_names.is_empty() {
            cfg.field_names = default_field_names();
        }
        cfg.exclude_user = grab_strings_opt(&fields, "exclude-user")?;
    } else {
        bail!("Expected an object value")
    }
    Ok(cfg)
}

/// Read a field-name file, see above.  An empty file is an error, as nothing could be parsed with
/// it.

pub fn read_field_names(filename: &str) -> Result<Vec<String>> {
    let file = File::open(path::Path::new(filename))?;
    let mut names = vec![];
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim_start().starts_with('#') {
            continue;
        }
        if let Some(name) = clean_field_name(&line) {
            names.push(name);
        }
    }
    if names.is_empty() {
        bail!("No field names in {filename}");
    }
    Ok(names)
}

fn clean_field_name(s: &str) -> Option<String> {
    let name = s.trim();
    let name = name.strip_suffix('=').unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn grab_string(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    if let Some(Value::String(s)) = fields.get(name) {
        Ok(s.to_string())
    } else {
        bail!("Field '{name}' must be present and have a string value");
    }
}

fn grab_string_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    if let Some(val) = fields.get(name) {
        if let Value::String(s) = val {
            Ok(s.to_string())
        } else {
            bail!("Field '{name}' must have a string value");
        }
    } else {
        Ok("".to_string())
    }
}

fn grab_strings_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Vec<String>> {
    let mut result = vec![];
    match fields.get(name) {
        None => {}
        Some(Value::Array(vals)) => {
            for v in vals {
                if let Value::String(s) = v {
                    result.push(s.to_string());
                } else {
                    bail!("Field '{name}' must have string values");
                }
            }
        }
        Some(_) => bail!("Field '{name}' must be an array"),
    }
    Ok(result)
}

// Whitebox tests for reading the config files.

#[test]
fn test_config() {
    let conf = read_acct_config("../tests/pbslog/whitebox-config.json").unwrap();
    assert!(conf.name == "thx");
    assert!(conf.description == "GPU partition accounting");
    assert!(conf.field_names == vec!["user", "group", "jobname"]);
    assert!(conf.exclude_user == vec!["root"]);
}

#[test]
fn test_config_defaults() {
    let conf = read_acct_config("../tests/pbslog/whitebox-config-minimal.json").unwrap();
    assert!(conf.name == "minimal");
    assert!(conf.description == "");
    assert!(conf.field_names == default_field_names());
    assert!(conf.exclude_user.is_empty());
    assert!(read_acct_config("../tests/pbslog/no-such-config.json").is_err());
}

#[test]
fn test_field_names() {
    let names = read_field_names("../tests/pbslog/fieldNames.txt").unwrap();
    assert!(names.len() == 14);
    assert!(names[0] == "user");
    assert!(names.iter().any(|n| n == "Exit_status"));
    assert!(!names.iter().any(|n| n.ends_with('=') || n.starts_with('#')));
}
