//! Stage wrappers around the external capabilities.
//!
//! Each stage applies its own deadline and converts every failure into a
//! value; nothing here returns `Err` to the orchestrator except the execution
//! failure it routes on.

pub mod execute;
pub mod generate;
pub mod render;
