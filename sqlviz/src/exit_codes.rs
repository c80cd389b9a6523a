//! Stable exit codes for sqlviz CLI commands.

/// Command succeeded (every question answered, snippet valid).
pub const OK: i32 = 0;
/// Invalid usage, configuration, assets or other errors.
pub const INVALID: i32 = 1;
/// A run exhausted its query regenerations.
pub const MAX_RETRIES: i32 = 2;
/// The engine rejected a validated query.
pub const EXECUTION_FAILED: i32 = 3;
/// `check-sql` or `check-code` rejected the candidate.
pub const REJECTED: i32 = 4;
