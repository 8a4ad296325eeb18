/// Decoder for the per_node_gpu resource encoding.
///
/// The value of a `resources_used.GPU_*_per_node_gpu` resource packs one reading per GPU per node:
///
///   node1:(0:1000MHZ+1:1200MHZ)+node2:(0:900MHZ)
///
/// that is, node groups `<node>:(<gpu>:<value>+...)` joined by '+'.  Since '+' also separates the
/// GPUs within a group we split groups on ")+", which leaves the closing ')' on the last group
/// only; that is stripped separately.
///
/// The output maps the identity "node:gpu" to the raw value, which still carries its unit.
use crate::error::{AcctError, AcctResult};

/// Identity "node:gpu" → raw value, in the order the identities appear in the encoding.  A repeated
/// identity keeps its first position and its last value.

pub type RawGpuStats = Vec<(String, String)>;

/// `metric` is the resource name and is used for error messages only.

pub fn decode_gpu_stats(metric: &str, raw: &str) -> AcctResult<RawGpuStats> {
    let mut output = RawGpuStats::new();
    for chunk in raw.split(")+") {
        let chunk = chunk.trim();
        let chunk = chunk.strip_suffix(')').unwrap_or(chunk);
        let Some((node_name, gpus)) = chunk.split_once(":(") else {
            return Err(malformed(metric, format!("no ':(' in {chunk:?}")));
        };
        for gpu in gpus.split('+') {
            let Some((gpu_num, gpu_stat)) = gpu.split_once(':') else {
                return Err(malformed(metric, format!("no ':' in {gpu:?}")));
            };
            let identity = format!("{node_name}:{gpu_num}");
            match output.iter().position(|(k, _)| *k == identity) {
                Some(ix) => output[ix].1 = gpu_stat.to_string(),
                None => output.push((identity, gpu_stat.to_string())),
            }
        }
    }
    Ok(output)
}

fn malformed(metric: &str, detail: String) -> AcctError {
    AcctError::MalformedGpuEncoding {
        metric: metric.to_string(),
        detail,
    }
}

#[cfg(test)]
fn pairs(xs: &[(&str, &str)]) -> RawGpuStats {
    xs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn test_decode() {
    let stats = decode_gpu_stats("m", "n1:(g0:10MHZ+g1:20MHZ)+n2:(g0:30MHZ)").unwrap();
    assert!(stats == pairs(&[("n1:g0", "10MHZ"), ("n1:g1", "20MHZ"), ("n2:g0", "30MHZ")]));

    // Decoding is a pure function of the input.
    assert!(stats == decode_gpu_stats("m", "n1:(g0:10MHZ+g1:20MHZ)+n2:(g0:30MHZ)").unwrap());
}

#[test]
fn test_decode_single() {
    let stats = decode_gpu_stats("m", "n1:(0:1000MHZ)").unwrap();
    assert!(stats == pairs(&[("n1:0", "1000MHZ")]));

    // Surrounding whitespace, as when the value ends the line.
    let stats = decode_gpu_stats("m", " n1:(0:1.5hrs)+n2:(3:2.0hrs) \n").unwrap();
    assert!(stats == pairs(&[("n1:0", "1.5hrs"), ("n2:3", "2.0hrs")]));
}

#[test]
fn test_decode_value_with_colon() {
    // Only the first ':' separates the GPU number from the value.
    let stats = decode_gpu_stats("m", "n1:(0:a:b)").unwrap();
    assert!(stats == pairs(&[("n1:0", "a:b")]));
}

#[test]
fn test_decode_repeated_identity() {
    let stats = decode_gpu_stats("m", "n1:(0:1W+1:2W)+n1:(0:3W)").unwrap();
    assert!(stats == pairs(&[("n1:0", "3W"), ("n1:1", "2W")]));
}

#[test]
fn test_decode_malformed() {
    match decode_gpu_stats("GPU_x_per_node_gpu", "n1:0:10MHZ") {
        Err(AcctError::MalformedGpuEncoding { metric, .. }) => {
            assert!(metric == "GPU_x_per_node_gpu")
        }
        _ => panic!("expected failure"),
    }
    assert!(decode_gpu_stats("m", "n1:(0-10MHZ)").is_err());
    assert!(decode_gpu_stats("m", "n1:(0:1W)+n2").is_err());
    assert!(decode_gpu_stats("m", "").is_err());
}
