//! Test-only hosts: an in-memory fleet and a temp-dir fleet over local `sh`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result as AnyResult};

use crate::core::inventory::Inventory;
use crate::core::layout::HOST_PLACEHOLDER;
use crate::error::{LifecycleError, Result};
use crate::io::config::{FleetConfig, TransportKind, write_config};
use crate::io::remote::{HostConnector, RemoteFs};
use crate::io::shell::{LocalRunner, ShellConnector};

/// Filesystem of one in-memory host.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    pub dirs: BTreeSet<String>,
    /// File path to its lines.
    pub files: BTreeMap<String, Vec<String>>,
    /// Symlink path to its target.
    pub links: BTreeMap<String, String>,
    /// Every command passed to `exec`, in order.
    pub exec_log: Vec<String>,
    unreachable: bool,
    failing_paths: BTreeSet<String>,
}

impl HostState {
    /// Whether `path` exists, following links like `test -e`.
    pub fn exists(&self, path: &str) -> bool {
        match self.links.get(path) {
            Some(target) => self.dirs.contains(target) || self.files.contains_key(target),
            None => self.dirs.contains(path) || self.files.contains_key(path),
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = self.links.get(path).map_or(path, String::as_str);
        self.dirs.contains(path)
    }

    /// Entry names directly under `dir`, sorted like `LC_ALL=C ls`.
    pub fn children(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let paths = self
            .dirs
            .iter()
            .chain(self.files.keys())
            .chain(self.links.keys());
        let names: BTreeSet<String> = paths
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.into_iter().collect()
    }

    fn insert_dir(&mut self, path: &str) {
        let mut current = path.trim_end_matches('/');
        while !current.is_empty() {
            self.dirs.insert(current.to_string());
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None => break,
            }
        }
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        let doomed = |p: &String| p == path || p.starts_with(&prefix);
        self.dirs.retain(|p| !doomed(p));
        self.files.retain(|p, _| !doomed(p));
        self.links.retain(|p, _| !doomed(p));
    }
}

/// Shared in-memory fleet. Cloning shares state, so a test can keep one
/// handle for assertions while the fleet fans out over another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFleet {
    hosts: Arc<Mutex<BTreeMap<String, HostState>>>,
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call on `host` fails with an execution error while set.
    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        self.with_host(host, |state| state.unreachable = unreachable);
    }

    /// Mutations of exactly `path` on `host` fail with an execution error.
    pub fn fail_path(&self, host: &str, path: &str) {
        self.with_host(host, |state| {
            state.failing_paths.insert(path.to_string());
        });
    }

    /// Snapshot of a host's filesystem.
    pub fn state(&self, host: &str) -> HostState {
        self.with_host(host, |state| state.clone())
    }

    fn with_host<T>(&self, host: &str, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        f(hosts.entry(host.to_string()).or_default())
    }
}

impl HostConnector for MemoryFleet {
    type Host = MemoryHost;

    fn connect(&self, host: &str) -> MemoryHost {
        MemoryHost {
            host: host.to_string(),
            fleet: self.clone(),
        }
    }
}

/// [`RemoteFs`] handle onto one host of a [`MemoryFleet`].
#[derive(Debug, Clone)]
pub struct MemoryHost {
    host: String,
    fleet: MemoryFleet,
}

impl MemoryHost {
    fn access<T>(&self, f: impl FnOnce(&mut HostState) -> Result<T>) -> Result<T> {
        self.fleet.with_host(&self.host, |state| {
            if state.unreachable {
                return Err(LifecycleError::execution(&self.host, "host unreachable"));
            }
            f(state)
        })
    }

    fn mutate<T>(&self, path: &str, f: impl FnOnce(&mut HostState) -> Result<T>) -> Result<T> {
        self.access(|state| {
            if state.failing_paths.contains(path) {
                return Err(LifecycleError::execution(
                    &self.host,
                    format!("injected failure on {path}"),
                ));
            }
            f(state)
        })
    }
}

impl RemoteFs for MemoryHost {
    fn host(&self) -> &str {
        &self.host
    }

    fn exec(&self, command: &str) -> Result<String> {
        self.access(|state| {
            state.exec_log.push(command.to_string());
            Ok(String::new())
        })
    }

    fn is_dir(&self, path: &str) -> Result<bool> {
        self.access(|state| Ok(state.is_dir(path)))
    }

    fn make_dir(&self, path: &str) -> Result<()> {
        self.mutate(path, |state| {
            state.insert_dir(path);
            Ok(())
        })
    }

    fn append_line(&self, file: &str, line: &str) -> Result<()> {
        self.mutate(file, |state| {
            state
                .files
                .entry(file.to_string())
                .or_default()
                .push(line.to_string());
            Ok(())
        })
    }

    fn read_lines(&self, file: &str) -> Result<Vec<String>> {
        self.access(|state| Ok(state.files.get(file).cloned().unwrap_or_default()))
    }

    fn delete_last_line(&self, file: &str) -> Result<()> {
        self.mutate(file, |state| match state.files.get_mut(file) {
            Some(lines) => {
                while lines.last().is_some_and(|line| line.trim().is_empty()) {
                    lines.pop();
                }
                lines.pop();
                Ok(())
            }
            None => Err(LifecycleError::execution(
                &self.host,
                format!("awk: cannot open {file}"),
            )),
        })
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        self.access(|state| Ok(state.children(dir)))
    }

    fn read_link(&self, path: &str) -> Result<Option<String>> {
        self.access(|state| Ok(state.links.get(path).cloned()))
    }

    fn replace_link(&self, path: &str, target: &str) -> Result<()> {
        self.mutate(path, |state| {
            state.links.insert(path.to_string(), target.to_string());
            Ok(())
        })
    }

    fn remove_tree(&self, path: &str) -> Result<()> {
        self.mutate(path, |state| {
            state.remove_tree(path);
            Ok(())
        })
    }

    fn touch(&self, path: &str) -> Result<()> {
        self.mutate(path, |state| {
            state.files.entry(path.to_string()).or_default();
            Ok(())
        })
    }
}

/// Fleet whose hosts are sibling directories in a temp dir, driven through
/// the real shell transport with `kind = "local"`.
#[derive(Debug)]
pub struct LocalFleet {
    dir: tempfile::TempDir,
    pub config: FleetConfig,
}

impl LocalFleet {
    /// Hosts all belong to role `all_src`; gc scheduling is disabled.
    pub fn new(hosts: &[&str]) -> AnyResult<Self> {
        let dir = tempfile::tempdir().context("create temp fleet dir")?;
        let mut config = FleetConfig::default();
        config.paths.root = format!("{}/{HOST_PLACEHOLDER}", dir.path().display());
        config.transport.kind = TransportKind::Local;
        config.transport.command_timeout_secs = 30;
        config.cleanup.gc_command = String::new();
        config.default_roles = vec!["all_src".to_string()];
        config.roles = Inventory::new(BTreeMap::from([(
            "all_src".to_string(),
            hosts.iter().map(|h| (*h).to_string()).collect(),
        )]));
        Ok(Self { dir, config })
    }

    pub fn host_root(&self, host: &str) -> PathBuf {
        self.dir.path().join(host)
    }

    pub fn connector(&self) -> ShellConnector<LocalRunner> {
        ShellConnector::new(self.config.local_runner())
    }

    /// Write `releaser.toml` into the temp dir and return its path.
    pub fn write_config(&self) -> AnyResult<PathBuf> {
        let path = self.dir.path().join("releaser.toml");
        write_config(&path, &self.config)?;
        Ok(path)
    }
}
