// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The planner: given a set of tests, a feature set, and a fixture registry,
//! decides execution order and drives the fixture stack's minimum-cost
//! setup/reset/teardown between tests.
//!
//! Composes [`crate::fixture_stack`] (to compute each transition) with
//! [`crate::partition`] (to shard the input) but owns no I/O itself: it
//! produces a [`Plan`], a flat ordered sequence of [`PlanItem`]s, which the
//! driver drives against a [`crate::runner_client`] stream.

mod order;
mod prefetch;
mod retry;

pub use order::TestGroup;
pub use prefetch::{DataFilePrefetcher, ExternalFile};
pub use retry::RetryQueue;

use crate::config::FeatureSet;
use crate::errors::FixtureStackError;
use crate::fixture_stack::resolve_path;
use crate::partition::PartitionerBuilder;
use orchestrator_metadata::EntitySummary;
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// One step of an ordered plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanItem {
    /// A test skipped without ever touching the fixture stack.
    Skip {
        /// The test's name.
        test: SmolStr,
        /// Why it was skipped (at least one reason; see the skip-check).
        reasons: Vec<String>,
    },
    /// A test whose fixture dependency doesn't resolve to a known fixture.
    Orphan {
        /// The test's name.
        test: SmolStr,
        /// The dangling fixture name it named.
        missing_fixture: SmolStr,
    },
    /// A test to run against the fixture stack transitioned to `fixture_path`.
    Run {
        /// The test's name.
        test: SmolStr,
        /// The fixture path (root-first) active while this test runs.
        fixture_path: Vec<SmolStr>,
    },
}

impl PlanItem {
    /// The test name this item is about, regardless of variant.
    pub fn test_name(&self) -> &SmolStr {
        match self {
            PlanItem::Skip { test, .. } => test,
            PlanItem::Orphan { test, .. } => test,
            PlanItem::Run { test, .. } => test,
        }
    }
}

/// A fully ordered plan: orphans first, then skips, then fixture-grouped
/// runs, each in name order within its group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Plan {
    /// The ordered sequence of plan items.
    pub items: Vec<PlanItem>,
}

impl Plan {
    /// Tests that actually traverse the fixture stack, in run order.
    pub fn runs(&self) -> impl Iterator<Item = (&SmolStr, &[SmolStr])> {
        self.items.iter().filter_map(|item| match item {
            PlanItem::Run { test, fixture_path } => Some((test, fixture_path.as_slice())),
            _ => None,
        })
    }
}

/// Builds an execution plan for a set of tests against a fixture registry.
///
/// `fixtures` is the merged registry across both bundles (local and remote);
/// the caller is responsible for tagging each fixture's owning side before
/// driving a [`crate::fixture_stack::CombinedFixtureStack`] — the planner
/// itself only needs fixture *names* and parent links to compute ordering.
pub struct Planner {
    fixtures: BTreeMap<SmolStr, EntitySummary>,
    features: FeatureSet,
    shard: Option<PartitionerBuilder>,
}

enum PlanOutcome {
    Orphan(SmolStr),
    Skip(Vec<String>),
}

impl Planner {
    /// Creates a planner for one run.
    pub fn new(
        fixtures: BTreeMap<SmolStr, EntitySummary>,
        features: FeatureSet,
        shard: Option<PartitionerBuilder>,
    ) -> Self {
        Self {
            fixtures,
            features,
            shard,
        }
    }

    /// Builds a plan for `tests`, applying sharding first (so fixture
    /// planning proceeds within each shard independently), then the
    /// skip-check, the orphan-check, and finally the ordering rule.
    pub fn plan(&self, tests: &[EntitySummary]) -> Plan {
        let mut shard_partitioner = self.shard.as_ref().map(PartitionerBuilder::build);
        let sharded: Vec<&EntitySummary> = tests
            .iter()
            .filter(|t| match &mut shard_partitioner {
                Some(p) => p.test_matches(t.name.as_str()),
                None => true,
            })
            .collect();

        let mut outcomes: Vec<(SmolStr, PlanOutcome)> = Vec::new();
        let mut groups: BTreeMap<Vec<SmolStr>, Vec<&EntitySummary>> = BTreeMap::new();

        for test in &sharded {
            match resolve_path(&self.fixtures, test.fixture_parent.as_ref()) {
                Err(FixtureStackError::UnknownParent { parent, .. }) => {
                    outcomes.push((test.name.clone(), PlanOutcome::Orphan(parent.into())));
                }
                Err(FixtureStackError::Cycle { fixture }) => {
                    outcomes.push((test.name.clone(), PlanOutcome::Orphan(fixture.into())));
                }
                Err(_) => unreachable!("resolve_path only returns UnknownParent or Cycle"),
                Ok(path) => {
                    if let Some(reasons) = self.skip_reasons(test) {
                        outcomes.push((test.name.clone(), PlanOutcome::Skip(reasons)));
                    } else {
                        groups.entry(path).or_default().push(test);
                    }
                }
            }
        }

        // Orphans first (name order), then skipped (name order), both ahead
        // of any fixture traversal.
        let mut plan_items = Vec::new();
        let mut orphan_items: Vec<PlanItem> = outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                PlanOutcome::Orphan(missing) => Some(PlanItem::Orphan {
                    test: name.clone(),
                    missing_fixture: missing.clone(),
                }),
                _ => None,
            })
            .collect();
        orphan_items.sort_by(|a, b| a.test_name().cmp(b.test_name()));
        plan_items.extend(orphan_items);

        let mut skip_items: Vec<PlanItem> = outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                PlanOutcome::Skip(reasons) => Some(PlanItem::Skip {
                    test: name.clone(),
                    reasons: reasons.clone(),
                }),
                _ => None,
            })
            .collect();
        skip_items.sort_by(|a, b| a.test_name().cmp(b.test_name()));
        plan_items.extend(skip_items);

        let test_groups: Vec<TestGroup> = groups
            .into_iter()
            .map(|(fixture_path, mut tests)| {
                tests.sort_by(|a, b| a.name.cmp(&b.name));
                TestGroup {
                    fixture_path,
                    tests: tests.into_iter().map(|t| t.name.clone()).collect(),
                }
            })
            .collect();

        for group in order::order_groups(test_groups) {
            for test in group.tests {
                plan_items.push(PlanItem::Run {
                    test,
                    fixture_path: group.fixture_path.clone(),
                });
            }
        }

        Plan { items: plan_items }
    }

    /// Returns the skip-check's reasons for `test`, or `None` if it should
    /// run: an unavailable software dependency, a non-matching hardware
    /// predicate, or a required runtime variable that's both absent and not
    /// on the missing-allowed list.
    fn skip_reasons(&self, test: &EntitySummary) -> Option<Vec<String>> {
        let mut reasons = Vec::new();

        if let Some(predicate) = &test.software_deps {
            if !matches!(
                self.features.software_deps_satisfied(predicate),
                Ok(true)
            ) {
                reasons.push(format!("missing SoftwareDeps: {predicate}"));
            }
        }

        if let Some(predicate) = &test.hardware_deps {
            if !matches!(
                self.features.hardware_deps_satisfied(predicate),
                Ok(true)
            ) {
                reasons.push(format!("missing HardwareDeps: {predicate}"));
            }
        }

        for variable in &test.required_vars {
            if !self.features.variable_is_satisfied(variable) {
                reasons.push(format!("missing required variable: {variable}"));
            }
        }

        if reasons.is_empty() {
            None
        } else {
            Some(reasons)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_metadata::EntityKind;

    fn fixture(name: &str, parent: Option<&str>) -> EntitySummary {
        let f = EntitySummary::new(name, EntityKind::Fixture, "bundle");
        match parent {
            Some(p) => f.with_fixture_parent(p),
            None => f,
        }
    }

    fn test(name: &str, parent: Option<&str>) -> EntitySummary {
        let t = EntitySummary::new(name, EntityKind::Test, "bundle");
        match parent {
            Some(p) => t.with_fixture_parent(p),
            None => t,
        }
    }

    fn linear_chain_fixtures() -> BTreeMap<SmolStr, EntitySummary> {
        [
            ("f1".into(), fixture("f1", None)),
            ("f2".into(), fixture("f2", Some("f1"))),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn linear_chain_groups_in_order() {
        let planner = Planner::new(linear_chain_fixtures(), FeatureSet::default(), None);
        let tests = vec![
            test("T0", None),
            test("T1", Some("f1")),
            test("T2", Some("f2")),
        ];
        let plan = planner.plan(&tests);
        let order: Vec<&str> = plan.items.iter().map(|i| i.test_name().as_str()).collect();
        assert_eq!(order, vec!["T0", "T1", "T2"]);
    }

    #[test]
    fn orphan_test_is_flagged_and_ordered_first() {
        let planner = Planner::new(linear_chain_fixtures(), FeatureSet::default(), None);
        let tests = vec![test("T9", Some("missing")), test("T0", None)];
        let plan = planner.plan(&tests);
        assert!(matches!(plan.items[0], PlanItem::Orphan { .. }));
        assert_eq!(plan.items[0].test_name(), "T9");
    }

    #[test]
    fn skipped_software_dep_test_emits_no_error() {
        let mut features = FeatureSet::default();
        features.software_available.insert("yes".into());
        let planner = Planner::new(linear_chain_fixtures(), features, None);
        let unavailable = test("T1", None).with_software_deps("dep1");
        let plan = planner.plan(&[unavailable]);
        match &plan.items[0] {
            PlanItem::Skip { reasons, .. } => {
                assert_eq!(reasons, &vec!["missing SoftwareDeps: dep1".to_string()]);
            }
            other => panic!("expected Skip, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_variable_is_skipped() {
        let planner = Planner::new(linear_chain_fixtures(), FeatureSet::default(), None);
        let unset =
            test("T1", None).with_required_vars(vec!["BOARD_REV".into()]);
        let plan = planner.plan(&[unset]);
        match &plan.items[0] {
            PlanItem::Skip { reasons, .. } => {
                assert_eq!(
                    reasons,
                    &vec!["missing required variable: BOARD_REV".to_string()]
                );
            }
            other => panic!("expected Skip, got {other:?}"),
        }
    }

    #[test]
    fn required_variable_on_the_missing_allowed_list_does_not_skip() {
        let mut features = FeatureSet::default();
        features.missing_allowed.insert("BOARD_REV".to_string());
        let planner = Planner::new(linear_chain_fixtures(), features, None);
        let unset = test("T1", None).with_required_vars(vec!["BOARD_REV".into()]);
        let plan = planner.plan(&[unset]);
        assert!(matches!(plan.items[0], PlanItem::Run { .. }));
    }

    #[test]
    fn shared_prefix_groups_stay_adjacent() {
        let fixtures: BTreeMap<SmolStr, EntitySummary> = [
            ("f1".into(), fixture("f1", None)),
            ("f2".into(), fixture("f2", Some("f1"))),
            ("f3".into(), fixture("f3", Some("f1"))),
        ]
        .into_iter()
        .collect();
        let planner = Planner::new(fixtures, FeatureSet::default(), None);
        let tests = vec![
            test("T0", None),
            test("T1", Some("f1")),
            test("T2", Some("f1")),
            test("T3", Some("f2")),
            test("T4", Some("f2")),
            test("T5", Some("f3")),
            test("T6", Some("f3")),
        ];
        let plan = planner.plan(&tests);
        let order: Vec<&str> = plan.items.iter().map(|i| i.test_name().as_str()).collect();
        // T0 (no fixture) always runs first; the two single-fixture groups
        // (f1, and each of f2/f3 which share the f1 prefix) stay contiguous.
        assert_eq!(order[0], "T0");
        assert_eq!(order.len(), 7);
    }
}
