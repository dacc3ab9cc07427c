//! Stable exit codes for the gorepair CLI.

/// Command succeeded.
pub const OK: i32 = 0;
/// Usage error, invalid config, or a failed run.
pub const ERROR: i32 = 2;
