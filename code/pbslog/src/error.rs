/// Failures that affect a single line, job, or GPU identity.  None of these are fatal to a batch:
/// the batch code logs them, counts them, and moves on.  I/O failures are not represented here,
/// they travel as anyhow errors and do end the run.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AcctError {
    /// The line did not have timestamp;type;id;fields.
    #[error("Malformed line: expected 4 ';'-separated parts, found {0}")]
    MalformedLine(usize),

    /// A tokenized entry had no '='.  The whole line is rejected.
    #[error("Malformed entry without '=': {0:?}")]
    MalformedEntry(String),

    #[error("Missing {0} in data")]
    MissingField(String),

    /// A per_node_gpu value lacked a separator.  The job's GPU data are abandoned.
    #[error("Malformed GPU encoding in {metric}: {detail}")]
    MalformedGpuEncoding { metric: String, detail: String },

    /// A GPU identity did not end up with exactly the expected metrics.
    #[error("The number of expected metrics does not match the actual for {identity}: expected {expected}, found {found}")]
    ArityMismatch {
        identity: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },
}

pub type AcctResult<T> = std::result::Result<T, AcctError>;
