//! Stable exit codes for releaser CLI commands.

/// Every targeted host succeeded.
pub const OK: i32 = 0;
/// Invalid invocation, configuration, or role selection; nothing was run.
pub const INVALID: i32 = 1;
/// At least one host failed or finished cleanup incompletely. The per-host
/// report is still printed.
pub const HOST_FAILURE: i32 = 2;
