//! Side-effecting operations: configuration files, child processes, and the
//! shell transport that backs remote host capabilities.

pub mod config;
pub mod process;
pub mod remote;
pub mod shell;
