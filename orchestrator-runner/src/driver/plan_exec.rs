// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns a [`crate::planner::Plan`] into the sequence of fixture-stack
//! transitions and synthesized events the Driver needs to drive a run:
//! skipped and orphaned tests never touch a runner at all, while each
//! `Run` item's fixture path is resolved against the combined stack and
//! tagged by which side (local/remote) owns each fixture.
//!
//! Kept synchronous and free of I/O so the ordering logic (which is what
//! the testable properties in the data model actually constrain) can be
//! tested without a runner subprocess in the loop.

use crate::event_processor::Event;
use crate::fixture_stack::{CombinedFixtureStack, TaggedFixture, Transition};
use crate::planner::{Plan, PlanItem};
use orchestrator_metadata::{EntityKind, StructuredError};
use smol_str::SmolStr;

/// One step of driving a plan: either a synthesized event sequence that
/// never involves a runner, or a transition to bring the combined stack in
/// line with a test about to run.
#[derive(Debug)]
pub enum PlanStep {
    /// Emit these events back-to-back; no runner interaction needed. Always
    /// starts with `EntityStart` and ends with `EntityEnd`, with zero or
    /// more `EntityError`s in between.
    Synthesized {
        /// The events to emit, in order.
        events: Vec<Event>,
    },
    /// Transition the stack to `fixture_path` before dispatching `test` to
    /// whichever runner owns it.
    Run {
        /// The test about to run.
        test: SmolStr,
        /// The fixture path this test depends on, tagged by owning side.
        fixture_path: Vec<TaggedFixture>,
        /// The local- and remote-side transitions computed for this step.
        transition: (Transition, Transition),
    },
}

/// Resolves every item in `plan` into a [`PlanStep`], applying transitions
/// to `stack` in order as it goes (each transition's starting point is the
/// previous step's ending point, exactly as the Driver will replay it live).
pub fn resolve_plan(plan: &Plan, stack: &mut CombinedFixtureStack) -> Vec<PlanStep> {
    plan.items
        .iter()
        .map(|item| match item {
            PlanItem::Skip { test, reasons } => PlanStep::Synthesized {
                events: vec![
                    Event::EntityStart {
                        name: test.clone(),
                        kind: EntityKind::Test,
                    },
                    Event::EntityEnd {
                        name: test.clone(),
                        kind: EntityKind::Test,
                        skip_reasons: reasons.clone(),
                        synthesized: false,
                    },
                ],
            },
            PlanItem::Orphan {
                test,
                missing_fixture,
            } => PlanStep::Synthesized {
                events: vec![
                    Event::EntityStart {
                        name: test.clone(),
                        kind: EntityKind::Test,
                    },
                    Event::EntityEnd {
                        name: test.clone(),
                        kind: EntityKind::Test,
                        skip_reasons: vec![format!(
                            "unknown fixture dependency `{missing_fixture}`"
                        )],
                        synthesized: false,
                    },
                ],
            },
            PlanItem::Run { test, fixture_path } => {
                let tagged: Vec<TaggedFixture> = fixture_path
                    .iter()
                    .filter_map(|name| {
                        stack
                            .role_of(name)
                            .map(|role| (name.clone(), role))
                    })
                    .collect();

                if let Some(failed_fixture) = stack.first_red_in_common_prefix(&tagged) {
                    PlanStep::Synthesized {
                        events: vec![
                            Event::EntityStart {
                                name: test.clone(),
                                kind: EntityKind::Test,
                            },
                            Event::EntityError {
                                name: test.clone(),
                                error: StructuredError::reason(format!(
                                    "[Fixture failure] {failed_fixture}: fixture setup failed \
                                     for a previous test and was never recovered"
                                )),
                            },
                            Event::EntityEnd {
                                name: test.clone(),
                                kind: EntityKind::Test,
                                skip_reasons: Vec::new(),
                                synthesized: false,
                            },
                        ],
                    }
                } else {
                    let transition = stack.transition_to(&tagged);
                    PlanStep::Run {
                        test: test.clone(),
                        fixture_path: tagged,
                        transition,
                    }
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Plan;
    use std::collections::BTreeMap;

    #[test]
    fn skip_item_synthesizes_start_and_end_with_reasons() {
        let plan = Plan {
            items: vec![PlanItem::Skip {
                test: "pkg.T1".into(),
                reasons: vec!["missing SoftwareDeps: wifi".to_string()],
            }],
        };
        let mut stack =
            CombinedFixtureStack::build(&BTreeMap::new(), &BTreeMap::new()).unwrap();
        let steps = resolve_plan(&plan, &mut stack);
        assert_eq!(steps.len(), 1);
        match &steps[0] {
            PlanStep::Synthesized { events } => {
                assert!(matches!(events[0], Event::EntityStart { .. }));
                match &events[1] {
                    Event::EntityEnd { skip_reasons, .. } => {
                        assert_eq!(skip_reasons.len(), 1);
                    }
                    _ => panic!("expected EntityEnd"),
                }
            }
            _ => panic!("expected a synthesized step"),
        }
    }

    #[test]
    fn run_item_resolves_fixture_path_against_the_stack() {
        use orchestrator_metadata::{BundleRole, EntityKind as Kind, EntitySummary};

        let mut local = BTreeMap::new();
        local.insert(
            SmolStr::from("f1"),
            EntitySummary::new("f1", Kind::Fixture, "local_bundle"),
        );
        let plan = Plan {
            items: vec![PlanItem::Run {
                test: "pkg.T1".into(),
                fixture_path: vec!["f1".into()],
            }],
        };
        let mut stack = CombinedFixtureStack::build(&local, &BTreeMap::new()).unwrap();
        let steps = resolve_plan(&plan, &mut stack);
        match &steps[0] {
            PlanStep::Run { fixture_path, .. } => {
                assert_eq!(fixture_path, &vec![(SmolStr::from("f1"), BundleRole::Local)]);
            }
            _ => panic!("expected a Run step"),
        }
    }

    #[test]
    fn dependent_test_on_a_poisoned_fixture_synthesizes_a_fixture_failure() {
        use orchestrator_metadata::EntitySummary;

        let mut local = BTreeMap::new();
        local.insert(
            SmolStr::from("f1"),
            EntitySummary::new("f1", EntityKind::Fixture, "local_bundle"),
        );
        let mut stack = CombinedFixtureStack::build(&local, &BTreeMap::new()).unwrap();
        // Bring f1 up, then poison it, as if a previous test's dependent
        // fixture SetUp had failed.
        stack.transition_to(&[(SmolStr::from("f1"), orchestrator_metadata::BundleRole::Local)]);
        stack.poison("f1");

        let plan = Plan {
            items: vec![PlanItem::Run {
                test: "pkg.T2".into(),
                fixture_path: vec!["f1".into()],
            }],
        };
        let steps = resolve_plan(&plan, &mut stack);
        match &steps[0] {
            PlanStep::Synthesized { events } => {
                assert_eq!(events.len(), 3);
                assert!(matches!(events[0], Event::EntityStart { .. }));
                match &events[1] {
                    Event::EntityError { error, .. } => {
                        assert!(error.reason.starts_with("[Fixture failure] f1:"));
                    }
                    _ => panic!("expected EntityError"),
                }
                assert!(matches!(events[2], Event::EntityEnd { .. }));
            }
            _ => panic!("expected a synthesized fixture-failure step"),
        }
    }
}
