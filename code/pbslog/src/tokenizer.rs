/// Splitter for the fields part of an accounting record.
///
/// The fields part is a sequence of `tag=value` entries separated by single spaces, but values
/// may themselves contain spaces, `=`, `;`, `:`, `+` and parentheses (exec_vnode, jobname, and the
/// per_node_gpu resources all do).  So we can't split on the separator.  Instead we use anchors:
///
///  - every known top-level field name `name`, found as ` name=` or, for the first field which has
///    no leading space, as `name=` at the start of the string;
///  - every ` resources_used.<word>=` and ` Resource_List.<word>=`, found by pattern since the set
///    of resources is open-ended.
///
/// The anchor offsets are sorted and the string is sliced between consecutive offsets.  Text
/// before the first anchor is dropped.
///
/// This goes wrong when an anchor appears verbatim inside a value: a jobname containing ` queue=`
/// will be cut there, and only the first occurrence of each known name is used.  The format gives
/// us nothing better to go on.
///
/// TODO: If we ever control the writer of these logs, quote values and replace this with a real
/// tokenizing grammar.
use crate::error::{AcctError, AcctResult};

use itertools::Itertools;
use regex::Regex;
use std::sync::OnceLock;

pub struct FieldTokenizer {
    anchors: Vec<String>,
}

fn namespace_anchors() -> &'static [Regex; 2] {
    static ANCHORS: OnceLock<[Regex; 2]> = OnceLock::new();
    ANCHORS.get_or_init(|| {
        [
            Regex::new(r" resources_used\.\w+=").unwrap(),
            Regex::new(r" Resource_List\.\w+=").unwrap(),
        ]
    })
}

impl FieldTokenizer {
    /// `names` are the known top-level field names, without the `=`.
    pub fn new(names: &[String]) -> FieldTokenizer {
        FieldTokenizer {
            anchors: names.iter().map(|n| format!("{n}=")).collect(),
        }
    }

    /// The offsets at which entries start, ascending and unique.  An offset may point at the space
    /// preceding a tag.
    pub fn split_points(&self, fields: &str) -> Vec<usize> {
        let mut offsets = vec![];
        let prefixed = format!(";{fields}");
        for anchor in &self.anchors {
            if let Some(ix) = fields.find(&format!(" {anchor}")) {
                offsets.push(ix);
            } else if let Some(ix) = prefixed.find(&format!(";{anchor}")) {
                // ix is the ';' in `prefixed`, which is the start of the tag in `fields`.
                offsets.push(ix);
            }
        }
        for re in namespace_anchors() {
            offsets.extend(re.find_iter(fields).map(|m| m.start()));
        }
        // A known name that is itself dotted is found twice.
        offsets.into_iter().sorted().dedup().collect()
    }

    /// The raw entries, each running from one split point to the next.
    pub fn entries<'a>(&self, fields: &'a str) -> Vec<&'a str> {
        let points = self.split_points(fields);
        let mut entries = Vec::with_capacity(points.len());
        for (i, &start) in points.iter().enumerate() {
            let lim = points.get(i + 1).copied().unwrap_or(fields.len());
            entries.push(&fields[start..lim]);
        }
        entries
    }

    /// Split `fields` into (tag, value) pairs in order of appearance.  The tag is trimmed, the
    /// value is everything after the first '=' up to the next entry.
    pub fn tokenize<'a>(&self, fields: &'a str) -> AcctResult<Vec<(&'a str, &'a str)>> {
        self.entries(fields)
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((tag, value)) => Ok((tag.trim(), value)),
                None => Err(AcctError::MalformedEntry(entry.trim().to_string())),
            })
            .collect()
    }
}

#[cfg(test)]
fn tokenizer(names: &[&str]) -> FieldTokenizer {
    FieldTokenizer::new(&names.iter().map(|s| s.to_string()).collect::<Vec<String>>())
}

#[test]
fn test_split_points() {
    let t = tokenizer(&["user", "group", "queue"]);
    let fields = "user=alice group=g queue=q";
    assert!(t.split_points(fields) == vec![0, 10, 18]);

    // Order of the names does not matter, nor do names that are absent.
    let t = tokenizer(&["queue", "session", "group", "user"]);
    assert!(t.split_points(fields) == vec![0, 10, 18]);
}

#[test]
fn test_namespaces() {
    let t = tokenizer(&["user"]);
    let fields = "user=bob resources_used.ngpus=2 Resource_List.ngpus=2 resources_used.mem=10kb";
    assert!(
        t.tokenize(fields).unwrap()
            == vec![
                ("user", "bob"),
                ("resources_used.ngpus", "2"),
                ("Resource_List.ngpus", "2"),
                ("resources_used.mem", "10kb"),
            ]
    );
}

#[test]
fn test_values_with_delimiters() {
    let t = tokenizer(&["exec_vnode", "jobname", "user"]);
    let fields = "user=u exec_vnode=(n1:ncpus=4:ngpus=2)+(n2:ncpus=4) jobname=a b=c;d \
                  resources_used.GPU_duration_per_node_gpu=n1:(0:1.00hrs+1:2.00hrs)+n2:(0:3.00hrs)";
    let toks = t.tokenize(fields).unwrap();
    assert!(toks.len() == 4);
    assert!(toks[1] == ("exec_vnode", "(n1:ncpus=4:ngpus=2)+(n2:ncpus=4)"));
    assert!(toks[2] == ("jobname", "a b=c;d"));
    assert!(toks[3].1 == "n1:(0:1.00hrs+1:2.00hrs)+n2:(0:3.00hrs)");
}

#[test]
fn test_dotted_known_name() {
    // The name is found both as a known name and by the pattern, yielding only one entry.
    let t = tokenizer(&["user", "resources_used.walltime"]);
    let toks = t.tokenize("user=u resources_used.walltime=00:01:00").unwrap();
    assert!(toks == vec![("user", "u"), ("resources_used.walltime", "00:01:00")]);
}

#[test]
fn test_leading_garbage_dropped() {
    let t = tokenizer(&["user", "group"]);
    assert!(t.tokenize("xyz user=u group=g").unwrap() == vec![("user", "u"), ("group", "g")]);
    assert!(t.tokenize("nothing to see").unwrap().is_empty());
}

#[test]
fn test_anchor_collision() {
    // A known anchor inside a value splits the value there, and the first occurrence of a name
    // wins.  This is the accepted limitation of the format.
    let t = tokenizer(&["user", "jobname", "queue"]);
    let toks = t.tokenize("user=u jobname=run queue=fake queue=q").unwrap();
    assert!(toks == vec![("user", "u"), ("jobname", "run"), ("queue", "fake queue=q")]);

    let t = tokenizer(&["user", "jobname"]);
    let toks = t
        .tokenize("user=u jobname=x resources_used.cpu=1 resources_used.cput=00:00:01")
        .unwrap();
    assert!(toks.len() == 4);
    assert!(toks[1] == ("jobname", "x"));
}

#[test]
fn test_malformed_entry() {
    // Overlapping anchors from a badly configured name list cut an entry before its '='.
    let t = tokenizer(&["user", "exec host", "host"]);
    let r = t.tokenize("user=u exec host=h");
    assert!(r == Err(AcctError::MalformedEntry("exec".to_string())));

    // Empty values are fine.
    let t = tokenizer(&["user"]);
    let toks = t.tokenize("user= resources_used.x=").unwrap();
    assert!(toks == vec![("user", ""), ("resources_used.x", "")]);
}
