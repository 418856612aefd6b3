// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the orchestrator core.
//!
//! Each error kind below corresponds to one of the categories surfaced to
//! callers: transport, protocol, timeout, user-function, configuration, and
//! dependency errors. Propagation follows a "doing X: <inner>" wrapping
//! convention throughout; none of these types abort a run chain on their own,
//! callers decide what to do with them.

use camino::Utf8PathBuf;
use thiserror::Error;

/// An error that occurred while parsing run configuration.
#[derive(Debug, Error)]
#[error("failed to parse orchestrator config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }
}

/// The underlying cause of a [`ConfigParseError`].
#[derive(Debug, Error)]
pub enum ConfigParseErrorKind {
    /// The `config` crate failed to build or deserialize the layered TOML.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Deserialization failed at a specific path, reported with context.
    #[error("{0}")]
    Deserialize(String),
    /// The config referenced unknown keys that were not consumed by any field.
    #[error("unknown configuration keys: {}", .0.join(", "))]
    UnknownKeys(Vec<String>),
}

/// A named profile was requested but isn't defined in the run configuration.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFoundError {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFoundError {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error setting up the process signal handler.
#[derive(Debug, Error)]
#[error("failed to set up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error parsing a `PartitionerBuilder` from a `hash:M/N` or `count:M/N` string.
#[derive(Clone, Debug, Error)]
#[error("failed to parse partition input: {message}{}", format_expected(.expected_format))]
pub struct PartitionerBuilderParseError {
    expected_format: Option<&'static str>,
    message: String,
}

fn format_expected(expected_format: &Option<&'static str>) -> String {
    match expected_format {
        Some(format) => format!(" (expected format: {format})"),
        None => String::new(),
    }
}

impl PartitionerBuilderParseError {
    pub(crate) fn new(expected_format: Option<&'static str>, message: impl Into<String>) -> Self {
        Self {
            expected_format,
            message: message.into(),
        }
    }
}

/// A [`crate::fixture_stack::FixtureStack`] operation failed because of a
/// malformed fixture graph or an inconsistent reset sequence.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum FixtureStackError {
    /// A test or fixture declared a parent fixture that doesn't exist.
    #[error("fixture `{child}` declares unknown parent fixture `{parent}`")]
    UnknownParent {
        /// The fixture or test whose parent reference is dangling.
        child: String,
        /// The dangling parent name.
        parent: String,
    },
    /// The fixture forest contains a cycle, so no valid setup order exists.
    #[error("fixture graph contains a cycle involving `{fixture}`")]
    Cycle {
        /// One fixture name on the cycle.
        fixture: String,
    },
    /// A value was requested from a fixture that hasn't run its SetUp yet.
    #[error("fixture `{fixture}` has no SetUp value (status: {status})")]
    ValueNotReady {
        /// The fixture whose value was requested.
        fixture: String,
        /// Its current lattice status, for diagnostics.
        status: String,
    },
}

/// A local test (or local fixture) attempted to read a value that a remote
/// fixture's SetUp produced; cross-process value transfer isn't implemented.
#[derive(Clone, Debug, Error)]
#[error(
    "fixture `{fixture}` set up on the remote bundle has no value visible to the local bundle"
)]
pub struct RemoteValueUnavailableError {
    /// The fixture whose value was requested from the wrong side.
    pub fixture: String,
}

/// Errors raised while preprocessing or dispatching a stream of runner
/// events through the handler chain.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum EventProcessorError {
    /// Two `EntityStart` events arrived for the same entity with no
    /// intervening `EntityEnd`.
    #[error("duplicate EntityStart for `{entity}` with no EntityEnd in between")]
    DuplicateStart {
        /// The entity name.
        entity: String,
    },
    /// An `EntityLog` or `EntityError` arrived for an entity with no open
    /// `EntityStart`.
    #[error("event for `{entity}` arrived outside an open EntityStart/EntityEnd pair")]
    UnopenedEntity {
        /// The entity name.
        entity: String,
    },
    /// A handler reported a condition that must stop the rest of the chain
    /// and the run (for example, the fail-fast budget tripping).
    #[error("{0}")]
    Fatal(String),
}

/// Transport, protocol, and timeout errors from the duplex stream to a
/// runner subprocess. All three are treated identically by the planner:
/// the affected tests are retried once.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RunnerClientError {
    /// The underlying pipe, SSH session, or subprocess died.
    #[error("transport to runner failed: {0}")]
    Transport(String),
    /// A frame could not be decoded, had an unknown message type, or broke
    /// the EntityStart/EntityEnd invariant at the wire level.
    #[error("protocol violation from runner: {0}")]
    Protocol(String),
    /// No message arrived from the runner within the per-message timeout.
    #[error("no message from runner within {0:?}")]
    Timeout(std::time::Duration),
    /// A response frame could not be delivered because the writer half of
    /// the duplex stream had already shut down.
    #[error("cannot send {0} to runner: stream already closed")]
    StreamClosed(&'static str),
}

/// Configuration-level errors surfaced synchronously at driver startup.
/// These cause a usage-level exit rather than a mid-run failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverConfigError {
    /// The requested DUT target wasn't found among the configured targets.
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    /// The workspace root couldn't be located or doesn't contain a bundle
    /// manifest.
    #[error("workspace at `{0}` has no bundle manifest")]
    MissingWorkspace(Utf8PathBuf),
    /// The requested architecture has no known toolchain mapping.
    #[error("architecture `{0}` has no configured toolchain mapping")]
    InvalidArch(String),
    /// An entity pattern failed to parse.
    #[error(transparent)]
    InvalidPattern(#[from] orchestrator_filtering::EntityPatternParseError),
    /// Config parsing failed.
    #[error(transparent)]
    Config(#[from] ConfigParseError),
    /// The requested profile doesn't exist.
    #[error(transparent)]
    ProfileNotFound(#[from] ProfileNotFoundError),
}

/// A referenced fixture is unknown, or a declared data file is missing.
/// Recorded on the entity as an `EntityError` rather than aborting the run.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum DependencyError {
    /// The entity declares a `fixture_parent` that has no matching fixture.
    #[error("unknown fixture dependency `{fixture}` for entity `{entity}`")]
    UnknownFixture {
        /// The entity declaring the dependency.
        entity: String,
        /// The missing fixture name.
        fixture: String,
    },
    /// A declared external data file could not be resolved.
    #[error("required data file {file} missing: {reason}")]
    DataFileMissing {
        /// The data file's relative name.
        file: String,
        /// Why it couldn't be resolved (download error, missing sibling, etc).
        reason: String,
    },
}
