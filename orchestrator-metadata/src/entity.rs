// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Whether an entity is a test or a fixture.
///
/// See the data model: an [`Entity`] is "either a test or a fixture".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// A test: a leaf unit of work that produces a [`crate::ResultRecord`].
    Test,
    /// A fixture: a reusable setup/teardown scope with an optional parent.
    Fixture,
}

/// Whether a bundle runs on the device under test or on the orchestrator host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
pub enum BundleRole {
    /// Runs on the device under test, over the SSH-backed transport.
    Local,
    /// Runs on the orchestrator host, as a direct subprocess.
    Remote,
}

/// A single entity (test or fixture) as declared by a bundle's registry.
///
/// Field-for-field, this mirrors the "Entity" paragraph of the data model:
/// stable name, package path, declared data files, declared service
/// dependencies, software/hardware dependency predicates, timeout, fixture
/// parent name, and owning bundle name.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct EntitySummary {
    /// The entity's name. Unique within the universe of entities across all bundles.
    pub name: SmolStr,

    /// Whether this is a test or a fixture.
    pub kind: EntityKind,

    /// The package path the entity's source lives under.
    pub package_path: Utf8PathBuf,

    /// Data files this entity declares a dependency on, relative to the
    /// bundle's data root.
    pub data_files: Vec<Utf8PathBuf>,

    /// Names of services this entity declares a dependency on.
    pub service_deps: Vec<SmolStr>,

    /// Unparsed software-dependency predicate (boolean expression over
    /// software feature tags). Evaluated by `orchestrator-filtering`.
    pub software_deps: Option<SmolStr>,

    /// Unparsed hardware-dependency predicate (boolean expression over
    /// hardware attribute tags).
    pub hardware_deps: Option<SmolStr>,

    /// Declared timeout for this entity's primary operation, in
    /// milliseconds. `None` means the profile default applies.
    pub timeout_millis: Option<u64>,

    /// Name of the immediate fixture parent, if any. Empty string and
    /// `None` are both treated as "no parent".
    pub fixture_parent: Option<SmolStr>,

    /// Name of the bundle (executable) this entity is registered in.
    pub bundle_name: SmolStr,

    /// Runtime variable names this entity requires to be present (and, if
    /// absent, not on the run's missing-allowed list) before it's eligible
    /// to run.
    pub required_vars: Vec<SmolStr>,
}

impl EntitySummary {
    /// Builds an entity with only the fields callers outside this crate
    /// typically need to set explicitly; the rest take their natural empty
    /// default. Needed because `#[non_exhaustive]` blocks struct-literal
    /// construction from other crates.
    pub fn new(name: impl Into<SmolStr>, kind: EntityKind, bundle_name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            kind,
            package_path: Utf8PathBuf::new(),
            data_files: Vec::new(),
            service_deps: Vec::new(),
            software_deps: None,
            hardware_deps: None,
            timeout_millis: None,
            fixture_parent: None,
            bundle_name: bundle_name.into(),
            required_vars: Vec::new(),
        }
    }

    /// Sets the fixture parent, builder-style.
    pub fn with_fixture_parent(mut self, parent: impl Into<SmolStr>) -> Self {
        self.fixture_parent = Some(parent.into());
        self
    }

    /// Sets the software-dependency predicate, builder-style.
    pub fn with_software_deps(mut self, predicate: impl Into<SmolStr>) -> Self {
        self.software_deps = Some(predicate.into());
        self
    }

    /// Sets the hardware-dependency predicate, builder-style.
    pub fn with_hardware_deps(mut self, predicate: impl Into<SmolStr>) -> Self {
        self.hardware_deps = Some(predicate.into());
        self
    }

    /// Sets the declared data files, builder-style.
    pub fn with_data_files(mut self, files: Vec<Utf8PathBuf>) -> Self {
        self.data_files = files;
        self
    }

    /// Sets the required runtime variables, builder-style.
    pub fn with_required_vars(mut self, vars: Vec<SmolStr>) -> Self {
        self.required_vars = vars;
        self
    }

    /// Returns true if this entity declares no fixture parent.
    pub fn is_root(&self) -> bool {
        match &self.fixture_parent {
            None => true,
            Some(s) => s.is_empty(),
        }
    }
}

/// A bundle: an executable containing a registry of entities, distinguished
/// by [`BundleRole`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct BundleSummary {
    /// The bundle's name, unique within its role.
    pub name: SmolStr,

    /// Local (DUT) or remote (host).
    pub role: BundleRole,

    /// Path to the bundle executable, as resolved by the build driver.
    pub binary_path: Utf8PathBuf,

    /// Entities registered in this bundle, keyed by entity name.
    pub entities: BTreeMap<SmolStr, EntitySummary>,
}

/// Root element for a serializable list of entities, as emitted by
/// `orchestrator list -json`.
#[derive(Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct EntityListSummary {
    /// Bundles keyed by name. Local and remote bundles share one namespace
    /// here for listing purposes; role disambiguates.
    pub bundles: BTreeMap<SmolStr, BundleSummary>,

    /// Total number of entities across all bundles (tests and fixtures).
    pub entity_count: usize,

    /// Total number of test entities across all bundles.
    pub test_count: usize,
}

impl EntityListSummary {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `list -json` document.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Serializes this list as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Iterates over every entity across every bundle, in (bundle name,
    /// entity name) order — the stable order `ListTests` promises.
    pub fn iter_entities(&self) -> impl Iterator<Item = (&BundleSummary, &EntitySummary)> {
        self.bundles
            .values()
            .flat_map(|bundle| bundle.entities.values().map(move |e| (bundle, e)))
    }
}
