/// Generic formatting code for a set of rows to be presented columnar, as csv, or as json, and
/// (except for json) with or without a header.
use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::io;

pub struct Help {
    pub fields: Vec<String>,
    pub aliases: Vec<(String, Vec<String>)>,
    pub defaults: String,
}

pub fn maybe_help<F>(fmt: &Option<String>, f: F) -> bool
where
    F: Fn() -> Help,
{
    if let Some(ref s) = fmt {
        if s.starts_with("help") {
            let mut help = f();
            println!("Syntax:\n  --fmt=(field|alias|control),...");
            println!("\nFields:");
            help.fields.sort();
            for f in help.fields {
                println!("  {f}");
            }
            if !help.aliases.is_empty() {
                println!("\nAliases:");
                help.aliases.sort();
                for (name, fields) in help.aliases {
                    println!("  {name} --> {}", fields.join(","));
                }
            }
            println!("\nDefaults:\n  {}", help.defaults);
            println!("\nControl:\n  csv\n  csvnamed\n  fixed\n  json\n  header\n  noheader");
            return true;
        }
    }
    false
}

/// Return a vector of the known fields in `spec` wrt the formatters, and a HashSet of any other
/// strings found in `spec`.  It returns an error if zero output fields were selected.

pub fn parse_fields<'a, DataT, FmtT>(
    spec: &'a str,
    formatters: &HashMap<String, FmtT>,
    aliases: &'a HashMap<String, Vec<String>>,
) -> Result<(Vec<&'a str>, HashSet<&'a str>)>
where
    FmtT: Fn(&DataT) -> String,
{
    let mut others = HashSet::new();
    let mut fields = vec![];
    for x in spec.split(',') {
        if formatters.contains_key(x) {
            fields.push(x);
        } else if let Some(aliases) = aliases.get(x) {
            for alias in aliases {
                if formatters.contains_key(alias) {
                    fields.push(alias.as_ref());
                } else {
                    others.insert(alias.as_ref());
                }
            }
        } else {
            others.insert(x);
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected")
    }
    Ok((fields, others))
}

pub struct FormatOptions {
    pub json: bool,   // json explicitly requested
    pub csv: bool,    // csv or csvnamed explicitly requested
    pub fixed: bool,  // fixed output explicitly requested
    pub named: bool,  // csvnamed explicitly requested
    pub header: bool, // true if nothing requested b/c fixed+header is default
}

pub fn standard_options(others: &HashSet<&str>) -> FormatOptions {
    let csvnamed = others.contains("csvnamed");
    let csv = others.contains("csv") || csvnamed;
    let json = others.contains("json") && !csv;
    let fixed = others.contains("fixed") && !csv && !json;
    // json gets no header, even if one is requested
    let header =
        (!csv && !json && !others.contains("noheader")) || (csv && others.contains("header"));
    FormatOptions {
        csv,
        json,
        header,
        fixed,
        named: csvnamed,
    }
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.  Set `opts.header` to true to print a first row with field names as a
/// header (independent of csv).  Set `opts.csv` to true to get CSV output instead of fixed-format.

pub fn format_data<DataT, FmtT>(
    output: &mut dyn io::Write,
    fields: &[&str],
    formatters: &HashMap<String, FmtT>,
    opts: &FormatOptions,
    data: &[DataT],
) -> Result<()>
where
    FmtT: Fn(&DataT) -> String,
{
    let fmts = fields
        .iter()
        .map(|kwd| match formatters.get(*kwd) {
            Some(f) => Ok(f),
            None => bail!("Unknown field {kwd}"),
        })
        .collect::<Result<Vec<&FmtT>>>()?;

    let mut cols = vec![Vec::<String>::new(); fields.len()];
    for x in data {
        for (col, f) in cols.iter_mut().zip(fmts.iter()) {
            col.push(f(x));
        }
    }

    if opts.csv {
        format_csv(output, fields, opts, cols)
    } else if opts.json {
        format_json(output, fields, cols)
    } else {
        format_fixed_width(output, fields, opts, cols);
        Ok(())
    }
}

fn format_fixed_width(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) {
    // The column width is the max across all the entries in the column (including header,
    // if present).
    let nrows = cols.first().map_or(0, |c| c.len());
    let mut widths = vec![0; fields.len()];
    if opts.header {
        for (w, kwd) in widths.iter_mut().zip(fields) {
            *w = usize::max(*w, kwd.len());
        }
    }
    for (w, col) in widths.iter_mut().zip(&cols) {
        for val in col {
            *w = usize::max(*w, val.len());
        }
    }

    if opts.header {
        write_fixed_row(output, &widths, fields.iter().copied());
    }
    for row in 0..nrows {
        write_fixed_row(output, &widths, cols.iter().map(|c| c[row].as_str()));
    }
}

fn write_fixed_row<'a>(
    output: &mut dyn io::Write,
    widths: &[usize],
    vals: impl Iterator<Item = &'a str>,
) {
    let mut s = "".to_string();
    for (val, w) in vals.zip(widths) {
        s += format!("{:w$}  ", val, w = *w).as_str();
    }
    // Ignore errors here, they are common for broken pipelines
    let _ = output.write_all(s.trim_end().as_bytes());
    let _ = output.write_all(b"\n");
}

fn format_csv(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    cols: Vec<Vec<String>>,
) -> Result<()> {
    let nrows = cols.first().map_or(0, |c| c.len());
    let mut writer = csv::Writer::from_writer(output);

    if opts.header {
        writer.write_record(fields)?;
    }
    for row in 0..nrows {
        let out_fields = cols
            .iter()
            .zip(fields)
            .map(|(col, kwd)| {
                if opts.named {
                    format!("{}={}", kwd, col[row])
                } else {
                    col[row].clone()
                }
            })
            .collect::<Vec<String>>();
        writer.write_record(out_fields)?;
    }

    writer.flush()?;
    Ok(())
}

fn format_json(output: &mut dyn io::Write, fields: &[&str], cols: Vec<Vec<String>>) -> Result<()> {
    let nrows = cols.first().map_or(0, |c| c.len());
    let mut objects = vec![];
    for row in 0..nrows {
        let mut obj = Map::new();
        for (col, kwd) in cols.iter().zip(fields) {
            obj.insert(kwd.to_string(), Value::String(col[row].clone()));
        }
        objects.push(Value::Object(obj));
    }
    serde_json::to_writer(&mut *output, &Value::Array(objects))?;
    let _ = output.write_all(b"\n");
    Ok(())
}

#[cfg(test)]
struct Pair {
    name: &'static str,
    value: i32,
}

#[cfg(test)]
fn pair_name(p: &Pair) -> String {
    p.name.to_string()
}

#[cfg(test)]
fn pair_value(p: &Pair) -> String {
    p.value.to_string()
}

#[cfg(test)]
fn pair_formatters() -> (
    HashMap<String, &'static dyn Fn(&Pair) -> String>,
    HashMap<String, Vec<String>>,
) {
    let mut formatters: HashMap<String, &'static dyn Fn(&Pair) -> String> = HashMap::new();
    formatters.insert("name".to_string(), &pair_name);
    formatters.insert("value".to_string(), &pair_value);
    let mut aliases = HashMap::new();
    aliases.insert(
        "all".to_string(),
        vec!["name".to_string(), "value".to_string()],
    );
    (formatters, aliases)
}

#[cfg(test)]
fn format_pairs(spec: &str) -> String {
    let (formatters, aliases) = pair_formatters();
    let (fields, others) = parse_fields(spec, &formatters, &aliases).unwrap();
    let opts = standard_options(&others);
    let data = vec![
        Pair { name: "alpha", value: 1 },
        Pair { name: "b", value: 1234 },
    ];
    let mut out = Vec::new();
    format_data(&mut out, &fields, &formatters, &opts, &data).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_parse_fields() {
    let (formatters, aliases) = pair_formatters();
    let (fields, others) = parse_fields("all,csv,bogus", &formatters, &aliases).unwrap();
    assert!(fields == vec!["name", "value"]);
    assert!(others.contains("csv") && others.contains("bogus"));
    assert!(parse_fields("csv,header", &formatters, &aliases).is_err());
}

#[test]
fn test_options() {
    let opts = standard_options(&HashSet::from(["json", "header"]));
    assert!(opts.json && !opts.header);
    let opts = standard_options(&HashSet::from(["csv", "json"]));
    assert!(opts.csv && !opts.json && !opts.header);
    let opts = standard_options(&HashSet::new());
    assert!(!opts.csv && !opts.json && opts.header);
}

#[test]
fn test_format_fixed() {
    assert!(format_pairs("all") == "name   value\nalpha  1\nb      1234\n");
    assert!(format_pairs("value,noheader") == "1\n1234\n");
}

#[test]
fn test_format_csv() {
    assert!(format_pairs("name,value,csv") == "alpha,1\nb,1234\n");
    assert!(format_pairs("name,value,csv,header") == "name,value\nalpha,1\nb,1234\n");
    assert!(format_pairs("value,csvnamed") == "value=1\nvalue=1234\n");
}

#[test]
fn test_format_json() {
    assert!(
        format_pairs("all,json")
            == "[{\"name\":\"alpha\",\"value\":\"1\"},{\"name\":\"b\",\"value\":\"1234\"}]\n"
    );
}
