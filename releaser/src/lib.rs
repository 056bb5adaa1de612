//! Fleet-wide release lifecycle manager.
//!
//! Tracks which release directories completed a successful deploy, cuts the
//! `current` pointer over atomically, and prunes stale releases under a
//! count-based retention policy with time-bound keep-until overrides.
//!
//! - **[`core`]**: Pure, deterministic logic (record log, retention policy,
//!   markers, release ids, inventory, path layout). No I/O.
//! - **[`io`]**: Side-effecting operations (configuration, child processes,
//!   the shell transport behind [`io::remote::RemoteFs`]).
//!
//! [`host`] runs the per-host state machine over a [`io::remote::RemoteFs`];
//! [`fleet`] fans it out across a host set and aggregates per-host results,
//! which [`report`] renders for the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod fleet;
pub mod host;
pub mod io;
pub mod logging;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
