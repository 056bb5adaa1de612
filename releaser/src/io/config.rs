//! Fleet configuration stored in `releaser.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::inventory::Inventory;
use crate::core::layout::ReleaseLayout;
use crate::core::release_id::ReleaseOrdering;
use crate::core::retention::DEFAULT_KEEP;
use crate::io::shell::{LocalRunner, SshRunner};

pub const DEFAULT_CONFIG_PATH: &str = "releaser.toml";

/// Fleet configuration (TOML).
///
/// Edited by humans; every field has a default so a minimal file only needs
/// `[paths] root` and `[roles]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetConfig {
    /// Number of recorded releases cleanup retains.
    pub keep: usize,

    /// How release listings are ordered before the retention scan.
    pub ordering: ReleaseOrdering,

    /// Roles targeted when the CLI is not given `--roles`.
    pub default_roles: Vec<String>,

    pub paths: PathsConfig,
    pub transport: TransportConfig,
    pub cleanup: CleanupConfig,
    pub roles: Inventory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Absolute environment root on every host. `{host}` is replaced by the host name.
    pub root: String,
    /// Directory holding one subdirectory per release.
    pub releases_dir: String,
    /// Symlink naming the serving release.
    pub current_link: String,
    /// Append-only log of successful releases.
    pub record_file: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssh,
    /// Run every host's commands on this machine (single-box installs, tests).
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Remote login user; ssh defaults apply when unset.
    pub user: Option<String>,
    /// Extra arguments passed to `ssh` before the destination.
    pub ssh_options: Vec<String>,
    /// Run remote commands as this user through `sudo -n -u`.
    pub sudo_user: Option<String>,
    /// Wall-clock limit for one remote command.
    pub command_timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanupConfig {
    /// Commands run in the releases directory after a successful prune
    /// (e.g. cleaning a companion service's release cache).
    pub post_commands: Vec<String>,
    /// Garbage collection scheduled in the background inside the current
    /// release after a prune. Empty disables it.
    pub gc_command: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: "/home/deploy/www/app".to_string(),
            releases_dir: "releases".to_string(),
            current_link: "current".to_string(),
            record_file: "RELEASES.txt".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Ssh,
            user: None,
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            sudo_user: None,
            command_timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            post_commands: Vec::new(),
            gc_command: "git gc --quiet".to_string(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            keep: DEFAULT_KEEP,
            ordering: ReleaseOrdering::default(),
            default_roles: vec!["all_src".to_string()],
            paths: PathsConfig::default(),
            transport: TransportConfig::default(),
            cleanup: CleanupConfig::default(),
            roles: Inventory::default(),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keep == 0 {
            return Err(anyhow!("keep must be > 0"));
        }
        if !self.paths.root.starts_with('/') {
            return Err(anyhow!("paths.root must be absolute, got '{}'", self.paths.root));
        }
        for (name, value) in [
            ("paths.releases_dir", &self.paths.releases_dir),
            ("paths.current_link", &self.paths.current_link),
            ("paths.record_file", &self.paths.record_file),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must be non-empty"));
            }
        }
        if self.transport.command_timeout_secs == 0 {
            return Err(anyhow!("transport.command_timeout_secs must be > 0"));
        }
        if self.transport.output_limit_bytes == 0 {
            return Err(anyhow!("transport.output_limit_bytes must be > 0"));
        }
        if self.cleanup.post_commands.iter().any(|c| c.trim().is_empty()) {
            return Err(anyhow!("cleanup.post_commands entries must be non-empty"));
        }
        Ok(())
    }

    /// Remote layout for `host`.
    pub fn layout(&self, host: &str) -> ReleaseLayout {
        ReleaseLayout::resolve(
            &self.paths.root,
            &self.paths.releases_dir,
            &self.paths.current_link,
            &self.paths.record_file,
            host,
        )
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.command_timeout_secs)
    }

    pub fn ssh_runner(&self) -> SshRunner {
        SshRunner {
            user: self.transport.user.clone(),
            options: self.transport.ssh_options.clone(),
            sudo_user: self.transport.sudo_user.clone(),
            timeout: self.command_timeout(),
            output_limit_bytes: self.transport.output_limit_bytes,
        }
    }

    pub fn local_runner(&self) -> LocalRunner {
        LocalRunner {
            sudo_user: self.transport.sudo_user.clone(),
            timeout: self.command_timeout(),
            output_limit_bytes: self.transport.output_limit_bytes,
        }
    }
}

/// Load config from a TOML file. A missing file is an error: without an
/// inventory there is nothing to act on.
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FleetConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FleetConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
