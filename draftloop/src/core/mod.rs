//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod routing;
pub mod secrets;
pub mod state;
pub mod types;
pub mod validator;
pub mod verdict;
