/// A JobRecord holds the fields of one "E" (job end) accounting record, still as raw strings.
///
/// The top-level fields go into a flat map keyed by field name.  The dotted resources go into two
/// nested maps keyed by the part after the dot: `resources_used.ngpus=2` lands in `resources_used`
/// under `ngpus`, and `Resource_List.ngpus=2` in `resource_list` under `ngpus`.  Values are not
/// interpreted here; see schema.rs and usage.rs for that.
use crate::error::{AcctError, AcctResult};

use rustutils::Timestamp;
use serde_json::{Map, Value};
use std::collections::HashMap;
use ustr::Ustr;

/// These top-level fields must be present in every record.  The resources_used and Resource_List
/// maps are required too but always exist here, possibly empty.

pub const REQUIRED_FIELDS: &[&str] = &[
    "user",
    "exec_host",
    "exec_vnode",
    "group",
    "end",
    "start",
    "ctime",
    "qtime",
    "etime",
    "Exit_status",
    "queue",
    "jobname",
    "session",
    "run_count",
];

const RESOURCES_USED: &str = "resources_used";
const RESOURCE_LIST: &str = "Resource_List";

/// A string-to-string map that remembers insertion order, which is the order of the fields in the
/// log line.  Re-inserting a key replaces its value in place.  These maps are small (a few dozen
/// entries) so a vector is fine.

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResourceMap {
    entries: Vec<(Ustr, String)>,
}

impl ResourceMap {
    pub fn new() -> ResourceMap {
        Default::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let key = Ustr::from(key);
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(ix) => self.entries[ix].1 = value.to_string(),
            None => self.entries.push((key, value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_json(&self) -> Value {
        let mut m = Map::new();
        for (k, v) in self.iter() {
            m.insert(k.to_string(), Value::String(v.to_string()));
        }
        Value::Object(m)
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    id: String,
    timestamp: Option<Timestamp>,
    fields: HashMap<Ustr, String>,
    resources_used: ResourceMap,
    resource_list: ResourceMap,
}

impl JobRecord {
    /// Fails with MissingField for the first required field that is absent.
    pub fn new(
        id: &str,
        timestamp: Option<Timestamp>,
        fields: HashMap<Ustr, String>,
        resources_used: ResourceMap,
        resource_list: ResourceMap,
    ) -> AcctResult<JobRecord> {
        for name in REQUIRED_FIELDS {
            if !fields.contains_key(&Ustr::from(*name)) {
                return Err(AcctError::MissingField(name.to_string()));
            }
        }
        Ok(JobRecord {
            id: id.to_string(),
            timestamp,
            fields,
            resources_used,
            resource_list,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The time the record was written, if the line's timestamp could be parsed.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(&Ustr::from(name)).map(|s| s.as_str())
    }

    /// For the required fields.  Other fields may be absent and should be read with get().
    pub fn field(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn resources_used(&self) -> &ResourceMap {
        &self.resources_used
    }

    pub fn resource_list(&self) -> &ResourceMap {
        &self.resource_list
    }

    /// The node names in exec_vnode, which looks like `(n1:ncpus=4:ngpus=1)+(n2:ncpus=4)`.
    pub fn nodes(&self) -> Vec<&str> {
        self.field("exec_vnode")
            .split('+')
            .filter_map(|chunk| {
                let chunk = chunk.trim().trim_start_matches('(');
                let name = chunk.split(':').next().unwrap_or("").trim_end_matches(')');
                if name.is_empty() {
                    None
                } else {
                    Some(name)
                }
            })
            .collect()
    }

    /// The record as a JSON object: the top-level fields with the two resource maps as nested
    /// objects, plus "jobid".
    pub fn to_json(&self) -> Value {
        let mut m = Map::new();
        m.insert("jobid".to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            m.insert(k.to_string(), Value::String(v.clone()));
        }
        m.insert(RESOURCES_USED.to_string(), self.resources_used.to_json());
        m.insert(RESOURCE_LIST.to_string(), self.resource_list.to_json());
        Value::Object(m)
    }
}

/// Route the (tag, value) pairs from the tokenizer into a JobRecord.  A tag's namespace is the
/// part before the first '.', and only the two resource namespaces are special.

pub fn assemble_job(
    id: &str,
    timestamp: Option<Timestamp>,
    entries: &[(&str, &str)],
) -> AcctResult<JobRecord> {
    let mut fields = HashMap::new();
    let mut resources_used = ResourceMap::new();
    let mut resource_list = ResourceMap::new();
    for (tag, value) in entries {
        let tag = tag.trim();
        match tag.split_once('.') {
            Some((RESOURCES_USED, key)) => resources_used.insert(key, value),
            Some((RESOURCE_LIST, key)) => resource_list.insert(key, value),
            _ => {
                fields.insert(Ustr::from(tag), value.to_string());
            }
        }
    }
    JobRecord::new(id, timestamp, fields, resources_used, resource_list)
}

#[cfg(test)]
pub(crate) fn required_entries() -> Vec<(&'static str, &'static str)> {
    vec![
        ("user", "alice"),
        ("exec_host", "n1/0"),
        ("exec_vnode", "(n1:ncpus=1)"),
        ("group", "g"),
        ("end", "100"),
        ("start", "50"),
        ("ctime", "10"),
        ("qtime", "10"),
        ("etime", "10"),
        ("Exit_status", "0"),
        ("queue", "q"),
        ("jobname", "job1"),
        ("session", "1"),
        ("run_count", "1"),
    ]
}

#[test]
fn test_assemble_routing() {
    let mut entries = required_entries();
    entries.push(("resources_used.ngpus", "1"));
    entries.push(("Resource_List.ngpus", "2"));
    entries.push(("Resource_List.select", "1:ncpus=4:ngpus=2"));
    entries.push(("account", "proj"));
    let job = assemble_job("123.host", None, &entries).unwrap();
    assert!(job.id() == "123.host");
    assert!(job.resources_used().get("ngpus") == Some("1"));
    assert!(job.resources_used().len() == 1);
    assert!(job.resource_list().get("ngpus") == Some("2"));
    assert!(job.resource_list().get("select") == Some("1:ncpus=4:ngpus=2"));
    assert!(job.get("account") == Some("proj"));
    assert!(job.get("ngpus").is_none());
    assert!(job.field("user") == "alice");
    // Every field lands exactly once.
    for (tag, value) in required_entries() {
        assert!(job.get(tag) == Some(value));
    }
}

#[test]
fn test_missing_field() {
    let entries = required_entries()
        .into_iter()
        .filter(|(t, _)| *t != "start")
        .collect::<Vec<(&str, &str)>>();
    let r = assemble_job("1.x", None, &entries);
    assert!(r.unwrap_err() == AcctError::MissingField("start".to_string()));

    // A resource named like a required field does not count.
    let mut entries = required_entries()
        .into_iter()
        .filter(|(t, _)| *t != "queue")
        .collect::<Vec<(&str, &str)>>();
    entries.push(("Resource_List.queue", "q"));
    assert!(assemble_job("1.x", None, &entries).is_err());
}

#[test]
fn test_resource_map_order() {
    let mut m = ResourceMap::new();
    m.insert("b", "1");
    m.insert("a", "2");
    m.insert("b", "3");
    assert!(m.iter().collect::<Vec<(&str, &str)>>() == vec![("b", "3"), ("a", "2")]);
    assert!(m.len() == 2 && !m.is_empty());
}

#[test]
fn test_nodes() {
    let mut entries = required_entries()
        .into_iter()
        .filter(|(t, _)| *t != "exec_vnode")
        .collect::<Vec<(&str, &str)>>();
    entries.push(("exec_vnode", "(n1:ncpus=4:ngpus=1)+(n2:ncpus=4)"));
    let job = assemble_job("1.x", None, &entries).unwrap();
    assert!(job.nodes() == vec!["n1", "n2"]);
    let j = job.to_json();
    assert!(j["jobid"] == "1.x");
    assert!(j["exec_vnode"] == "(n1:ncpus=4:ngpus=1)+(n2:ncpus=4)");
    assert!(j["resources_used"].as_object().unwrap().is_empty());
}
