// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level orchestration: opens a connection to each configured target,
//! validates the run configuration before dialing anything, lays out the
//! result directory, installs the combined log, wires up signal-based
//! cancellation, and drives the [`crate::planner::Planner`]'s output
//! against the fixture stack and the runner streams.
//!
//! This is the internal counterpart to the thin `orchestrator-cli` binary:
//! the CLI parses flags into a [`DriverConfig`] and calls into here, keeping
//! argument parsing and output formatting out of the library crate.

mod cancellation;
mod connection;
mod log;
mod plan_exec;
mod result_dir;
mod stream;

pub use cancellation::{CancellationSignal, ShutdownReason};
pub use connection::{ConnectionCache, ConnectionFactory};
pub use plan_exec::{resolve_plan, PlanStep};
pub use result_dir::ResultDirLayout;
pub use stream::pump_stream;

use crate::config::{ConfigLoader, FeatureSet, RunConfiguration};
use crate::errors::{DriverConfigError, SignalHandlerSetupError};
use crate::partition::PartitionerBuilder;
use crate::signal::{SignalHandlerKind, SignalEvent, ShutdownEvent};
use camino::Utf8PathBuf;

/// Identifies one configured target (the device under test, or the host
/// acting as the remote bundle's runner), by the connection-spec string the
/// [`ConnectionCache`] keys on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetConfig {
    /// The target's name, as named on the command line.
    pub name: String,
    /// Connection-spec string (e.g. an SSH destination, or a local
    /// subprocess marker for the host-side remote bundle).
    pub connection_spec: String,
}

/// Everything the Driver needs to validate and then run one invocation,
/// before any connection has been dialed.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Root of the workspace containing the bundle manifest.
    pub workspace_root: Utf8PathBuf,
    /// Path to SSH key material, if a local target requires one.
    pub key_material: Option<Utf8PathBuf>,
    /// Where results for this run are written.
    pub result_dir: Utf8PathBuf,
    /// True unless the caller passed an explicit, nondefault result
    /// directory (controls whether the "latest" symlink is recreated).
    pub result_dir_is_default: bool,
    /// Optional caller-supplied config file, layered over the built-in
    /// defaults.
    pub config_file: Option<Utf8PathBuf>,
    /// The profile to resolve out of the layered config.
    pub profile_name: String,
    /// Configured targets: at minimum, the local (DUT) bundle; optionally
    /// a remote (host) bundle too.
    pub targets: Vec<TargetConfig>,
    /// Feature availability used by the skip-check.
    pub features: FeatureSet,
    /// Shard assignment, if this invocation is one of several parallel
    /// shards.
    pub shard: Option<PartitionerBuilder>,
}

impl DriverConfig {
    /// Synchronous self-test: validates the run configuration before
    /// dialing any target, surfacing [`DriverConfigError`] variants rather
    /// than failing mid-run. Checked, in order: the workspace has a bundle
    /// manifest, the result directory is creatable, and the requested
    /// profile resolves out of the layered config.
    pub fn validate(&self) -> Result<RunConfiguration, DriverConfigError> {
        if !self.workspace_root.join("orchestrator-bundle.toml").is_file() {
            return Err(DriverConfigError::MissingWorkspace(
                self.workspace_root.clone(),
            ));
        }

        std::fs::create_dir_all(&self.result_dir).map_err(|error| {
            DriverConfigError::MissingWorkspace(Utf8PathBuf::from(format!(
                "{}: {error}",
                self.result_dir
            )))
        })?;

        let mut loader = ConfigLoader::new();
        if let Some(config_file) = &self.config_file {
            loader = loader.with_config_file(config_file);
        }
        let profile = loader.resolve_profile(&self.profile_name)?;

        Ok(RunConfiguration {
            profile,
            result_dir: self.result_dir.clone(),
            shard: self.shard.clone(),
            features: self.features.clone(),
        })
    }

    /// Looks up a configured target by name.
    pub fn resolve_target(&self, name: &str) -> Result<&TargetConfig, DriverConfigError> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| DriverConfigError::UnknownTarget(name.to_string()))
    }
}

/// Owns the state that spans a whole invocation: the validated run
/// configuration, the result directory layout, and the signal handler.
/// Connections and the actual `RunTests` streams are driven separately
/// (via [`ConnectionCache`] and [`pump_stream`]) since their concrete
/// transport type depends on the caller's [`ConnectionFactory`].
pub struct Driver {
    /// The validated, frozen run configuration.
    pub config: RunConfiguration,
    /// The result directory this run writes into.
    pub result_dir: ResultDirLayout,
}

impl Driver {
    /// Validates `driver_config`, lays out the result directory, and
    /// installs the full-text log layer. Does not dial any target or
    /// install the signal handler; callers do that once this succeeds,
    /// using [`Self::signal_handler_kind`] and their own
    /// [`ConnectionCache`].
    pub fn new(driver_config: &DriverConfig) -> Result<Self, DriverConfigError> {
        let config = driver_config.validate()?;
        let result_dir = ResultDirLayout::create(
            driver_config.result_dir.clone(),
            driver_config.result_dir_is_default,
        )
        .map_err(|error| {
            DriverConfigError::MissingWorkspace(Utf8PathBuf::from(format!(
                "{}: {error}",
                driver_config.result_dir
            )))
        })?;

        if let Err(error) = log::install_full_text_log(result_dir.root()) {
            tracing::warn!(%error, "failed to install full-text log layer");
        }

        Ok(Self { config, result_dir })
    }

    /// The signal handler kind a caller should build: the standard handler
    /// for a real run, [`SignalHandlerKind::Noop`] for tests.
    pub fn signal_handler_kind(&self) -> SignalHandlerKind {
        SignalHandlerKind::Standard
    }

    /// Installs process-wide signal handling for this run, per §9's
    /// guidance that it be an explicit init routine rather than a
    /// load-time side effect. Callers race their run against
    /// [`CancellationSignal::cancelled`] and tear the run down cleanly
    /// (SIGINT) or after dumping diagnostics (SIGTERM/SIGHUP/SIGQUIT).
    pub fn install_cancellation(&self) -> Result<CancellationSignal, SignalHandlerSetupError> {
        CancellationSignal::install(self.signal_handler_kind())
    }

    /// Recreates the "latest" symlink, once the run is complete. Best-effort:
    /// failures are logged, not fatal, per the cleanup policy in §5.
    pub fn finish(&self) {
        if let Err(error) = self.result_dir.update_latest_symlink() {
            tracing::warn!(%error, "failed to update the latest-run symlink");
        }
    }
}

/// True if `event` should trigger a shutdown of the current run (as opposed
/// to a job-control or info-query signal, which the Driver's signal loop
/// handles separately).
pub(crate) fn is_shutdown_signal(event: SignalEvent) -> Option<ShutdownEvent> {
    match event {
        SignalEvent::Shutdown(shutdown) => Some(shutdown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSet;
    use camino_tempfile::Utf8TempDir;

    fn base_config(workspace: &Utf8PathBuf, result_dir: &Utf8PathBuf) -> DriverConfig {
        DriverConfig {
            workspace_root: workspace.clone(),
            key_material: None,
            result_dir: result_dir.clone(),
            result_dir_is_default: false,
            config_file: None,
            profile_name: "default".to_string(),
            targets: vec![TargetConfig {
                name: "dut".to_string(),
                connection_spec: "ssh://dut".to_string(),
            }],
            features: FeatureSet::default(),
            shard: None,
        }
    }

    #[test]
    fn missing_bundle_manifest_is_a_configuration_error() {
        let dir = Utf8TempDir::new().unwrap();
        let config = base_config(
            &dir.path().to_path_buf(),
            &dir.path().join("results"),
        );
        assert!(matches!(
            config.validate(),
            Err(DriverConfigError::MissingWorkspace(_))
        ));
    }

    #[test]
    fn valid_workspace_resolves_the_default_profile() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(dir.path().join("orchestrator-bundle.toml"), "").unwrap();
        let config = base_config(
            &dir.path().to_path_buf(),
            &dir.path().join("results"),
        );
        let resolved = config.validate().unwrap();
        assert_eq!(
            resolved.profile.per_message_timeout,
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn unknown_target_name_is_rejected() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(dir.path().join("orchestrator-bundle.toml"), "").unwrap();
        let config = base_config(
            &dir.path().to_path_buf(),
            &dir.path().join("results"),
        );
        assert!(matches!(
            config.resolve_target("not-a-target"),
            Err(DriverConfigError::UnknownTarget(_))
        ));
    }
}
