// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `orchestrator` binary's three subcommands (§6): `list`, `run`, and
//! `symbolize`. Argument parsing and output formatting live here and in
//! `commands`; everything else is delegated straight to `orchestrator-runner`.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use orchestrator_runner::output::Color;

/// Remote integration-test orchestrator: runs test bundles on a
/// device-under-test and on the host, collects structured execution
/// events, and reconciles them into durable results.
#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Colorize output.
    #[arg(long, global = true, default_value = "auto")]
    pub color: Color,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List tests and fixtures without running them.
    List(ListArgs),
    /// Run a set of tests.
    Run(RunArgs),
    /// Symbolize a crash dump captured during a run.
    Symbolize(SymbolizeArgs),
}

/// Shared flags for targeting the bundles under test.
#[derive(Debug, Args, Clone)]
pub struct BundleArgs {
    /// Root of the workspace containing the bundle manifest.
    #[arg(long, default_value = ".")]
    pub workspace_root: Utf8PathBuf,

    /// Path to the remote (host-side) bundle executable.
    #[arg(long)]
    pub remote_bundle: Option<Utf8PathBuf>,

    /// SSH connection spec for the local (device-under-test) bundle.
    /// Dialing a local target is not implemented by this core; supplying
    /// one surfaces a clear, actionable dial error rather than a silent
    /// no-op (see `orchestrator_cli::connection::LocalBundleFactory`).
    #[arg(long)]
    pub local_target: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub bundles: BundleArgs,

    /// Emit the entity list as JSON instead of a human-readable table.
    #[arg(long = "json")]
    pub json: bool,

    /// Entity patterns (globs, or a single `(...)` boolean expression).
    /// Defaults to matching every test.
    pub patterns: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub bundles: BundleArgs,

    /// Directory results for this run are written to. Defaults to
    /// `<workspace-root>/orchestrator-results/<timestamp>`, which recreates
    /// the "latest" symlink; an explicit path leaves it alone.
    #[arg(long)]
    pub result_dir: Option<Utf8PathBuf>,

    /// Optional `orchestrator.toml` layered over the built-in defaults.
    #[arg(long)]
    pub config_file: Option<Utf8PathBuf>,

    /// Which profile to resolve out of the layered config.
    #[arg(long, default_value = "default")]
    pub profile: String,

    /// Per-message timeout for the duplex stream to a runner, overriding
    /// the resolved profile's value.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub per_message_timeout: Option<std::time::Duration>,

    /// Abort the run once this many tests have failed, overriding the
    /// resolved profile's value. `0` disables the override.
    #[arg(long)]
    pub max_test_failures: Option<u32>,

    /// Exit with a nonzero status if any test failed.
    #[arg(long)]
    pub fail_for_tests: bool,

    /// This shard's index, zero-based. Requires `--shard-total`.
    #[arg(long, requires = "shard_total")]
    pub shard_index: Option<u64>,

    /// Total number of shards. Requires `--shard-index`.
    #[arg(long, requires = "shard_index")]
    pub shard_total: Option<u64>,

    /// Software feature tags available on the target, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub software_available: Vec<String>,

    /// Hardware attribute tags the target board matches, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub hardware_tags: Vec<String>,

    /// Entity patterns (globs, or a single `(...)` boolean expression).
    /// Defaults to matching every test.
    pub patterns: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SymbolizeArgs {
    /// Path to the crash dump to symbolize.
    pub crash_dump: Utf8PathBuf,

    /// Path to the symbolizer binary. Falls back to
    /// `ORCHESTRATOR_SYMBOLIZER` if unset; this core does not implement
    /// the symbolization tool itself (§1's deliberately-out-of-scope list).
    #[arg(long)]
    pub symbolizer: Option<Utf8PathBuf>,
}
