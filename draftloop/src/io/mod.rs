//! I/O adapters for the pipeline: filesystem state, child processes, and
//! the external collaborators.

pub mod analyze;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod finalize;
pub mod human_gate;
pub mod init;
pub mod input;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod transitions;

use chrono::{SecondsFormat, Utc};

/// Current UTC time as RFC 3339 with second precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
