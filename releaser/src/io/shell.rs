//! [`RemoteFs`] over POSIX shell commands, run via ssh or a local `sh`.
//!
//! Every path and value interpolated into a script is quoted with
//! `shell-escape`; release ids are validated before they get here, but paths
//! from configuration may still contain spaces.

use std::borrow::Cow;
use std::process::Command;
use std::time::Duration;

use anyhow::Result as AnyResult;
use shell_escape::unix::escape;
use tracing::{debug, instrument, warn};

use crate::error::{LifecycleError, Result};
use crate::io::process::{CommandLimits, CommandOutput, run_transport};
use crate::io::remote::{HostConnector, RemoteFs};

/// Suffix of the temporary link renamed over the real one during cutover.
const LINK_TMP_SUFFIX: &str = ".releaser-next";

/// Suffix of the scratch copy used when rewriting a file in place.
const REWRITE_TMP_SUFFIX: &str = ".releaser-tmp";

/// Quote a value for safe interpolation into a POSIX shell script.
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Executes a shell script on a named host.
pub trait CommandRunner {
    fn run(&self, host: &str, script: &str) -> AnyResult<CommandOutput>;

    /// Human-readable limit used in timeout messages.
    fn timeout(&self) -> Duration;
}

/// Runs scripts on remote hosts through the `ssh` client.
#[derive(Debug, Clone)]
pub struct SshRunner {
    pub user: Option<String>,
    pub options: Vec<String>,
    pub sudo_user: Option<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl SshRunner {
    fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }
}

impl CommandRunner for SshRunner {
    fn run(&self, host: &str, script: &str) -> AnyResult<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.options)
            .arg(self.destination(host))
            .arg(wrap_script(script, self.sudo_user.as_deref()));
        run_transport(
            cmd,
            CommandLimits {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
            },
        )
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Runs scripts on this machine with `sh -c`; the host name is only a label.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    pub sudo_user: Option<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandRunner for LocalRunner {
    fn run(&self, _host: &str, script: &str) -> AnyResult<CommandOutput> {
        let script = match self.sudo_user.as_deref() {
            Some(user) => wrap_script(script, Some(user)),
            None => script.to_string(),
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        run_transport(
            cmd,
            CommandLimits {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
            },
        )
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// `sh -c '<script>'`, optionally as another user via non-interactive sudo.
fn wrap_script(script: &str, sudo_user: Option<&str>) -> String {
    match sudo_user {
        Some(user) => format!("sudo -n -u {} sh -c {}", quote(user), quote(script)),
        None => format!("sh -c {}", quote(script)),
    }
}

/// [`RemoteFs`] for one host, backed by a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct ShellHost<R> {
    host: String,
    runner: R,
}

impl<R: CommandRunner> ShellHost<R> {
    pub fn new(host: impl Into<String>, runner: R) -> Self {
        Self {
            host: host.into(),
            runner,
        }
    }

    fn run(&self, script: &str) -> Result<CommandOutput> {
        debug!(host = %self.host, script, "running remote command");
        let output = self
            .runner
            .run(&self.host, script)
            .map_err(|err| LifecycleError::execution(&self.host, format!("{err:#}")))?;
        if output.timed_out {
            warn!(host = %self.host, script, "remote command timed out");
            return Err(LifecycleError::execution(
                &self.host,
                format!(
                    "timed out after {}s: {script}",
                    self.runner.timeout().as_secs()
                ),
            ));
        }
        Ok(output)
    }

    /// Run and require exit status 0.
    fn run_checked(&self, script: &str) -> Result<String> {
        let output = self.run(script)?;
        match output.code() {
            Some(0) => Ok(output.stdout_text()),
            code => Err(LifecycleError::execution(
                &self.host,
                format!(
                    "`{script}` exited with {}: {}",
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    output.stderr_text().trim()
                ),
            )),
        }
    }
}

impl<R: CommandRunner> RemoteFs for ShellHost<R> {
    fn host(&self) -> &str {
        &self.host
    }

    #[instrument(skip_all, fields(host = %self.host))]
    fn exec(&self, command: &str) -> Result<String> {
        self.run_checked(command)
    }

    fn is_dir(&self, path: &str) -> Result<bool> {
        let script = format!("test -d {}", quote(path));
        let output = self.run(&script)?;
        match output.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(LifecycleError::execution(
                &self.host,
                format!("`{script}` exited with {code:?}: {}", output.stderr_text().trim()),
            )),
        }
    }

    fn make_dir(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("mkdir -p -- {}", quote(path)))
            .map(drop)
    }

    fn append_line(&self, file: &str, line: &str) -> Result<()> {
        self.run_checked(&format!("printf '%s\\n' {} >> {}", quote(line), quote(file)))
            .map(drop)
    }

    fn read_lines(&self, file: &str) -> Result<Vec<String>> {
        let file = quote(file);
        let out = self.run_checked(&format!("if [ -f {file} ]; then cat {file}; fi"))?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn delete_last_line(&self, file: &str) -> Result<()> {
        // Copied back with `cat` so the record keeps its inode and mode.
        let tmp = quote(&format!("{file}{REWRITE_TMP_SUFFIX}"));
        let file = quote(file);
        self.run_checked(&format!(
            "awk 'NF {{ last = NR }} {{ lines[NR] = $0 }} \
             END {{ for (i = 1; i < last; i++) print lines[i] }}' {file} > {tmp} \
             && cat {tmp} > {file}; status=$?; rm -f {tmp}; exit $status"
        ))
        .map(drop)
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let dir = quote(dir);
        let out = self.run_checked(&format!("if [ -d {dir} ]; then LC_ALL=C ls -1 {dir}; fi"))?;
        Ok(out
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn read_link(&self, path: &str) -> Result<Option<String>> {
        let path = quote(path);
        let out = self.run_checked(&format!("if [ -L {path} ]; then readlink {path}; fi"))?;
        let target = out.trim_end_matches('\n');
        Ok((!target.is_empty()).then(|| target.to_string()))
    }

    fn replace_link(&self, path: &str, target: &str) -> Result<()> {
        // rename(2) over the old link is atomic; `ln -sfn` alone unlinks first.
        let tmp = format!("{path}{LINK_TMP_SUFFIX}");
        self.run_checked(&format!(
            "ln -sfn {target} {tmp} && mv -Tf {tmp} {path}",
            target = quote(target),
            tmp = quote(&tmp),
            path = quote(path)
        ))
        .map(drop)
    }

    fn remove_tree(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("rm -rf -- {}", quote(path)))
            .map(drop)
    }

    fn touch(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("touch -- {}", quote(path)))
            .map(drop)
    }
}

/// Connects every host through a clone of the same runner.
#[derive(Debug, Clone)]
pub struct ShellConnector<R> {
    runner: R,
}

impl<R> ShellConnector<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner + Clone + Sync> HostConnector for ShellConnector<R> {
    type Host = ShellHost<R>;

    fn connect(&self, host: &str) -> Self::Host {
        ShellHost::new(host, self.runner.clone())
    }
}
