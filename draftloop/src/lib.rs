//! Draft → validate → review state machine with bounded revision loops.
//!
//! A run takes an approved input artifact, asks a drafter for a candidate
//! output, checks it mechanically, optionally waits for a human, asks a
//! reviewer for a verdict, and writes the approved draft exactly once. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (routing, state merge, validator
//!   checks, secrets scanning, budgeting, verdict decoding). No I/O.
//! - **[`io`]**: Side-effecting operations (checkpoints, config, child
//!   processes, collaborators, the finalizer).
//!
//! [`engine`] drives a run across both layers; [`review_gate`] is the last
//! check before a draft leaves the machine for review.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod review_gate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
