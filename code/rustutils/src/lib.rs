// Misc utilities useful to both pbslog and pbsalyze.

mod configs;
mod dates;

// The configuration for processing the logs of one cluster.

pub use configs::AcctConfig;

// Read a configuration from a JSON file.

pub use configs::read_acct_config;

// Read the known top-level field names from a text file, one per line.

pub use configs::read_field_names;

// The built-in list of known top-level field names.

pub use configs::default_field_names;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;

// Parse the timestamp that starts an accounting line.

pub use dates::parse_acct_timestamp;

// Parse HH:MM:SS into seconds.

pub use dates::parse_walltime;

// Parse YYYY-MM-DD or YYYYMMDD.

pub use dates::parse_date;

// The date encoded in an accounting file name, if it is one.

pub use dates::date_from_log_name;
