// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration: the frozen, immutable value describing one invocation,
//! layered from a default TOML document and an optional profile file the
//! same way the rest of the ecosystem layers config — via the `config`
//! crate's `ConfigBuilder`, with unknown keys tracked through
//! `serde_ignored` and precise error locations via `serde_path_to_error`.

use crate::errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFoundError};
use crate::partition::PartitionerBuilder;
use camino::{Utf8Path, Utf8PathBuf};
use config::{builder::DefaultState, Config, ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// The default config, layered in first so every key has a sane value even
/// when the caller supplies none of their own.
const DEFAULT_CONFIG: &str = include_str!("config/default-config.toml");

/// An available/unavailable partition of software feature tags, a hardware
/// descriptor, a variable map, and a list of variables allowed to be absent.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeatureSet {
    /// Software feature tags known to be available.
    #[serde(default)]
    pub software_available: BTreeSet<String>,
    /// Hardware attribute tags the target board matches.
    #[serde(default)]
    pub hardware_tags: BTreeSet<String>,
    /// Runtime variable name to value.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Variable names that may be absent without causing a skip.
    #[serde(default)]
    pub missing_allowed: BTreeSet<String>,
}

impl FeatureSet {
    /// Evaluates a software-dependency predicate (the boolean-expression
    /// dialect from `orchestrator_filtering`) against the available tags.
    pub fn software_deps_satisfied(&self, predicate: &str) -> Result<bool, String> {
        self.eval_predicate(predicate, &self.software_available)
    }

    /// Evaluates a hardware-dependency predicate against the board's tags.
    pub fn hardware_deps_satisfied(&self, predicate: &str) -> Result<bool, String> {
        self.eval_predicate(predicate, &self.hardware_tags)
    }

    fn eval_predicate(
        &self,
        predicate: &str,
        available: &BTreeSet<String>,
    ) -> Result<bool, String> {
        let inner = predicate
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(predicate);
        let expr = orchestrator_filtering::EntityPattern::parse(&[format!("({inner})")])
            .map_err(|error| error.to_string())?;
        let tags: Vec<&str> = available.iter().map(String::as_str).collect();
        match expr {
            orchestrator_filtering::EntityPattern::Expression(bool_expr) => {
                Ok(bool_expr.eval(tags.iter().copied()))
            }
            orchestrator_filtering::EntityPattern::Globs(_) => {
                Err(format!("`{predicate}` is not a valid boolean expression"))
            }
        }
    }

    /// True if `name` is present in the variable map, or absent but
    /// explicitly allowed to be.
    pub fn variable_is_satisfied(&self, name: &str) -> bool {
        self.variables.contains_key(name) || self.missing_allowed.contains(name)
    }
}

/// Whether external data files are fetched all at once before the run
/// starts, or lazily just before each test that needs them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadMode {
    /// Download every referenced file up front, in parallel.
    #[default]
    Batch,
    /// Download a test's files immediately before it runs.
    Lazy,
}

/// One named profile's settings, after inheritance and defaults have been
/// applied.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Profile {
    /// Per-message timeout for the duplex stream to a runner.
    #[serde(with = "humantime_serde", default = "default_per_message_timeout")]
    pub per_message_timeout: Duration,
    /// Maximum test failures before the fail-fast handler trips. `None`
    /// disables fail-fast.
    #[serde(default)]
    pub max_test_failures: Option<u32>,
    /// Default timeout applied to an entity with no declared timeout.
    #[serde(with = "humantime_serde", default = "default_entity_timeout")]
    pub default_entity_timeout: Duration,
    /// Grace period after a timeout before a user function is forcibly
    /// abandoned.
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,
    /// How external data files are prefetched.
    #[serde(default)]
    pub download_mode: DownloadMode,
}

fn default_per_message_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_entity_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ConfigDeserialize {
    #[serde(default)]
    profile: BTreeMap<String, Profile>,
}

/// The full set of profiles defined by a layered config document.
#[derive(Clone, Debug)]
pub struct RunProfiles {
    profiles: BTreeMap<String, Profile>,
}

impl RunProfiles {
    /// Looks up a profile by name.
    pub fn resolve(&self, profile_name: &str) -> Result<Profile, ProfileNotFoundError> {
        self.profiles.get(profile_name).cloned().ok_or_else(|| {
            ProfileNotFoundError::new(profile_name, self.profiles.keys().cloned())
        })
    }
}

/// The frozen, immutable description of one invocation: everything the
/// Driver resolves once at startup and never mutates afterward.
#[derive(Clone, Debug)]
pub struct RunConfiguration {
    /// The resolved profile for this run.
    pub profile: Profile,
    /// Result directory this run writes into.
    pub result_dir: Utf8PathBuf,
    /// Shard assignment, if sharding is in effect.
    pub shard: Option<PartitionerBuilder>,
    /// Feature availability for this run.
    pub features: FeatureSet,
}

/// Loads run configuration by layering a default document, then an optional
/// `orchestrator.toml`, then validates the requested profile exists.
pub struct ConfigLoader {
    builder: ConfigBuilder<DefaultState>,
    config_file: Option<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Starts a loader seeded with the built-in defaults.
    pub fn new() -> Self {
        Self {
            builder: Config::builder()
                .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml)),
            config_file: None,
        }
    }

    /// Layers an additional TOML document read from `path`, if it exists.
    pub fn with_config_file(mut self, path: &Utf8Path) -> Self {
        self.builder = self
            .builder
            .add_source(File::new(path.as_str(), FileFormat::Toml).required(false));
        self.config_file = Some(path.to_path_buf());
        self
    }

    /// Builds the layered config and resolves `profile_name` out of it.
    pub fn resolve_profile(self, profile_name: &str) -> Result<Profile, ConfigParseError> {
        let config_file = self
            .config_file
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("<built-in defaults>"));

        let built = self.builder.build().map_err(|error| {
            ConfigParseError::new(config_file.clone(), ConfigParseErrorKind::Config(error))
        })?;

        let mut unused = BTreeSet::new();
        let mut callback = |path: serde_ignored::Path| {
            unused.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(built, &mut callback);
        let deserialized: ConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                ConfigParseError::new(
                    config_file.clone(),
                    ConfigParseErrorKind::Deserialize(error.to_string()),
                )
            })?;

        if !unused.is_empty() {
            return Err(ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::UnknownKeys(unused.into_iter().collect()),
            ));
        }

        deserialized
            .profile
            .get(profile_name)
            .cloned()
            .ok_or_else(|| {
                ConfigParseError::new(
                    config_file,
                    ConfigParseErrorKind::Deserialize(
                        ProfileNotFoundError::new(
                            profile_name,
                            deserialized.profile.keys().cloned(),
                        )
                        .to_string(),
                    ),
                )
            })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_resolves_with_no_config_file() {
        let profile = ConfigLoader::new().resolve_profile("default").unwrap();
        assert_eq!(profile.per_message_timeout, Duration::from_secs(60));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let result = ConfigLoader::new().resolve_profile("does-not-exist");
        assert!(result.is_err());
    }

    #[test]
    fn feature_set_evaluates_software_deps() {
        let mut features = FeatureSet::default();
        features.software_available.insert("dep1".to_string());
        assert!(features.software_deps_satisfied("dep1 && !dep2").unwrap());
        assert!(!features.software_deps_satisfied("dep2").unwrap());
    }

    #[test]
    fn variable_is_satisfied_when_present_or_allowed_missing() {
        let mut features = FeatureSet::default();
        features
            .variables
            .insert("BOARD_REV".to_string(), "3".to_string());
        features.missing_allowed.insert("OPTIONAL_VAR".to_string());
        assert!(features.variable_is_satisfied("BOARD_REV"));
        assert!(features.variable_is_satisfied("OPTIONAL_VAR"));
        assert!(!features.variable_is_satisfied("REQUIRED_BUT_ABSENT"));
    }
}
