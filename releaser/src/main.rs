//! Fleet-wide release lifecycle manager.
//!
//! Records successful releases, repoints `current`, holds releases with
//! keep-until markers, and prunes stale releases on every host of the
//! selected roles. Each command prints one result line per host.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use releaser::core::release_id::new_release_id;
use releaser::exit_codes;
use releaser::fleet::{Fleet, FleetReport};
use releaser::io::config::{DEFAULT_CONFIG_PATH, FleetConfig, TransportKind, load_config, write_config};
use releaser::io::remote::HostConnector;
use releaser::io::shell::ShellConnector;
use releaser::logging;
use releaser::report::{HostSummary, exit_code, render_json, render_text};

#[derive(Parser)]
#[command(
    name = "releaser",
    version,
    about = "Fleet-wide release lifecycle manager"
)]
struct Cli {
    /// Fleet configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Target roles (comma separated). Defaults to `default_roles` from the config.
    #[arg(long, global = true, value_delimiter = ',')]
    roles: Vec<String>,

    /// Roles whose hosts are removed from the target set.
    #[arg(long, global = true, value_delimiter = ',')]
    exclude_roles: Vec<String>,

    /// Print the report as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Log removals and cutovers to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print a fresh timestamped release id.
    NewId,
    /// Create the release directory on every host.
    Create { release: String },
    /// Append the release to every host's record.
    RecordSuccess { release: String },
    /// Drop the most recent record entry on every host.
    RecordFailure,
    /// Point `current` at the release on every host.
    Promote { release: String },
    /// Prune releases outside the retention window.
    Cleanup {
        /// Recorded releases to retain (defaults to `keep` from the config).
        #[arg(long)]
        keep: Option<usize>,
        /// Release under construction; never removed.
        #[arg(long)]
        in_progress: Option<String>,
        /// Report what would be removed without removing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Protect a release from pruning for a number of days.
    KeepUntil {
        release: String,
        #[arg(long)]
        days: u16,
    },
    /// Print the release recorded before the latest one.
    Previous,
    /// Print the number of recorded releases.
    Count,
    /// Report whether the release directory exists.
    Exists { release: String },
    /// Record the release, make it current, then prune.
    Finish {
        release: String,
        #[arg(long)]
        keep: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Init { force } => return cmd_init(&cli.config, *force),
        Command::NewId => {
            println!("{}", new_release_id(Utc::now()));
            return Ok(exit_codes::OK);
        }
        _ => {}
    }

    let config = load_config(&cli.config)?;
    let roles = if cli.roles.is_empty() {
        config.default_roles.clone()
    } else {
        cli.roles.clone()
    };
    let hosts = config
        .roles
        .hosts_in_roles(&roles, &cli.exclude_roles)
        .context("resolve target hosts")?;

    match config.transport.kind {
        TransportKind::Ssh => {
            let connector = ShellConnector::new(config.ssh_runner());
            run_on_hosts(cli, &Fleet::new(connector, config), &hosts)
        }
        TransportKind::Local => {
            let connector = ShellConnector::new(config.local_runner());
            run_on_hosts(cli, &Fleet::new(connector, config), &hosts)
        }
    }
}

fn run_on_hosts<C: HostConnector>(cli: &Cli, fleet: &Fleet<C>, hosts: &[String]) -> Result<i32> {
    let now = Utc::now();
    match &cli.command {
        Command::Create { release } => emit(cli, &fleet.create_release(hosts, release)),
        Command::RecordSuccess { release } => emit(cli, &fleet.record_success(hosts, release)),
        Command::RecordFailure => emit(cli, &fleet.record_failure(hosts)),
        Command::Promote { release } => emit(cli, &fleet.promote_to_current(hosts, release)),
        Command::Cleanup {
            keep,
            in_progress,
            dry_run,
        } => {
            let mut options = fleet.cleanup_options();
            options.keep = keep.unwrap_or(options.keep);
            ensure!(options.keep > 0, "--keep must be > 0");
            options.in_progress.clone_from(in_progress);
            options.dry_run = *dry_run;
            emit(cli, &fleet.cleanup(hosts, &options, now))
        }
        Command::KeepUntil { release, days } => {
            emit(cli, &fleet.mark_keep_until(hosts, release, *days, now))
        }
        Command::Previous => emit(cli, &fleet.previous_release(hosts)),
        Command::Count => emit(cli, &fleet.release_count(hosts)),
        Command::Exists { release } => emit(cli, &fleet.release_exists(hosts, release)),
        Command::Finish { release, keep } => {
            let mut options = fleet.cleanup_options();
            options.keep = keep.unwrap_or(options.keep);
            ensure!(options.keep > 0, "--keep must be > 0");
            emit(cli, &fleet.finish_deploy(hosts, release, &options, now))
        }
        Command::Init { .. } | Command::NewId => bail!("command does not target hosts"),
    }
}

fn emit<T: HostSummary + Serialize>(cli: &Cli, report: &FleetReport<T>) -> Result<i32> {
    let out = if cli.json {
        render_json(report)?
    } else {
        render_text(report)
    };
    println!("{out}");
    Ok(exit_code(report))
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &FleetConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}
