//! Stable exit codes for draftloop CLI commands.

/// Command succeeded; `run`/`resume` finalized an artifact.
pub const OK: i32 = 0;
/// Invalid input, config, run identity, or any other command error.
pub const INVALID: i32 = 1;
/// `run`/`resume` ended in `Aborted`.
pub const ABORTED: i32 = 2;
/// `run`/`resume` suspended at the human gate.
pub const AWAITING_HUMAN: i32 = 3;
/// `check` found validation issues or `scan` found secrets.
pub const FINDINGS: i32 = 4;
