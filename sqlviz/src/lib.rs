//! Natural-language questions to validated SQL and safe rendering snippets.
//!
//! A question runs through a bounded stage graph: a model proposes a query,
//! a textual validator accepts or rejects it (rejections loop back with
//! feedback, up to a retry bound), an engine executes it, and a model
//! proposes a Python rendering snippet that must pass a syntax-tree validator
//! or is replaced by a fixed table template. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (validators, fallback, routing).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, prompts, processes, HTTP).
//!   Behind traits so tests can script them.
//!
//! [`stages`] wrap single capability calls with deadlines and
//! [`pipeline`] drives a run to its terminal outcome.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
