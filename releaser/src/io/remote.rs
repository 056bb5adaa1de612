//! Capabilities the lifecycle core needs from a host.
//!
//! [`RemoteFs`] decouples the per-host state machine from transport. The
//! shell implementation ([`crate::io::shell::ShellHost`]) runs POSIX commands
//! over ssh or locally; tests use an in-memory model.

use crate::error::Result;

/// Filesystem and command capabilities on one host.
///
/// Every call is synchronous. A command that fails, times out, or cannot reach
/// the host surfaces as [`crate::error::LifecycleError::Execution`] and must
/// never be read as "done".
pub trait RemoteFs {
    /// Name of the host these capabilities act on.
    fn host(&self) -> &str;

    /// Run an arbitrary shell command, returning its stdout.
    fn exec(&self, command: &str) -> Result<String>;

    /// Whether `path` is a directory, following symlinks like `test -d`.
    fn is_dir(&self, path: &str) -> Result<bool>;

    /// Create a directory and any missing parents.
    fn make_dir(&self, path: &str) -> Result<()>;

    /// Append one line to `file`, creating it if missing.
    fn append_line(&self, file: &str, line: &str) -> Result<()>;

    /// Lines of `file` in order; a missing file reads as empty.
    fn read_lines(&self, file: &str) -> Result<Vec<String>>;

    /// Drop the last non-blank line of `file`, along with any blank lines after it.
    fn delete_last_line(&self, file: &str) -> Result<()>;

    /// Entry names of `dir` in listing order; a missing directory lists as empty.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>>;

    /// Target of the symlink at `path`, or `None` if there is no link.
    fn read_link(&self, path: &str) -> Result<Option<String>>;

    /// Point the symlink at `path` to `target` in one atomic step.
    fn replace_link(&self, path: &str, target: &str) -> Result<()>;

    /// Recursively remove `path`. Removing a missing path succeeds.
    fn remove_tree(&self, path: &str) -> Result<()>;

    /// Create an empty file (or bump its mtime).
    fn touch(&self, path: &str) -> Result<()>;
}

/// Produces a [`RemoteFs`] handle for a host name.
///
/// Connectors are shared across fan-out workers; each worker connects to its
/// own host, so handles never cross threads.
pub trait HostConnector: Sync {
    type Host: RemoteFs;

    fn connect(&self, host: &str) -> Self::Host;
}
