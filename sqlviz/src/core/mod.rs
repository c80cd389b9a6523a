//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (candidate text, result rows, run state) and return deterministic
//! outputs suitable for tests.

pub mod code_guard;
pub mod data_profile;
pub mod fallback;
pub mod fence;
pub mod routing;
pub mod sql_guard;
pub mod types;
