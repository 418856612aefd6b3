// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixture stack state machine: a forest of setup/teardown contexts,
//! ordered so that consecutive tests sharing a path prefix reuse the
//! fixtures they have in common instead of tearing the whole stack down.

use crate::errors::FixtureStackError;
use crate::fixture_stack::status::Status;
use crate::fixture_stack::value::SetupPayload;
use orchestrator_metadata::{BundleRole, EntitySummary};
use smol_str::SmolStr;
use std::collections::BTreeMap;

#[derive(Debug)]
struct FixtureNode {
    parent: Option<SmolStr>,
    status: Status,
    payload: Option<SetupPayload>,
}

/// What a test's own fixture dependency chain, root-first, resolves to.
///
/// `EntitySummary::fixture_parent` only names the immediate parent; the full
/// path is the chain of ancestors walked up to a fixture with no parent.
pub fn resolve_path(
    fixtures: &BTreeMap<SmolStr, EntitySummary>,
    start: Option<&SmolStr>,
) -> Result<Vec<SmolStr>, FixtureStackError> {
    let mut path = Vec::new();
    let mut current = start.cloned();
    let mut seen = std::collections::BTreeSet::new();
    while let Some(name) = current {
        if !seen.insert(name.clone()) {
            return Err(FixtureStackError::Cycle {
                fixture: name.to_string(),
            });
        }
        let node = fixtures
            .get(&name)
            .ok_or_else(|| FixtureStackError::UnknownParent {
                child: path.last().cloned().unwrap_or_else(|| name.clone()).to_string(),
                parent: name.to_string(),
            })?;
        path.push(name.clone());
        current = node.fixture_parent.clone();
    }
    path.reverse();
    Ok(path)
}

/// The three groups of calls needed to move the stack from one active path
/// to the next: fixtures torn down (deepest first), fixtures reset in place
/// (because a previous test dirtied them), and fixtures freshly set up
/// (shallowest first).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transition {
    /// Fixtures torn down, in teardown order (deepest/last-active first).
    pub tear_downs: Vec<SmolStr>,
    /// Fixtures reset in place because the previous test marked them dirty.
    pub resets: Vec<SmolStr>,
    /// Fixtures freshly set up, in setup order (shallowest/root-most first).
    pub set_ups: Vec<SmolStr>,
}

/// A single-process fixture stack.
#[derive(Debug, Default)]
pub struct FixtureStack {
    nodes: BTreeMap<SmolStr, FixtureNode>,
    active_path: Vec<SmolStr>,
}

impl FixtureStack {
    /// Builds a stack from the fixture entities in a bundle, validating that
    /// every `fixture_parent` reference resolves and that the forest has no
    /// cycles.
    pub fn build(fixtures: &BTreeMap<SmolStr, EntitySummary>) -> Result<Self, FixtureStackError> {
        let mut nodes = BTreeMap::new();
        for (name, entity) in fixtures {
            // Validate this fixture's own ancestor chain eagerly so cycles
            // and dangling parents are caught at construction, not mid-run.
            resolve_path(fixtures, Some(name))?;
            nodes.insert(
                name.clone(),
                FixtureNode {
                    parent: entity.fixture_parent.clone(),
                    status: Status::Red,
                    payload: None,
                },
            );
        }
        Ok(Self {
            nodes,
            active_path: Vec::new(),
        })
    }

    /// The currently active path, root-most fixture first.
    pub fn active_path(&self) -> &[SmolStr] {
        &self.active_path
    }

    /// The worst-case status across the active stack.
    pub fn worst_status(&self) -> Status {
        Status::worst_of(
            self.active_path
                .iter()
                .map(|name| self.nodes[name].status),
        )
    }

    /// The payload a fixture's `SetUp` produced, if it's currently active.
    pub fn payload(&self, fixture: &str) -> Result<&SetupPayload, FixtureStackError> {
        let node = self
            .nodes
            .get(fixture)
            .ok_or_else(|| FixtureStackError::ValueNotReady {
                fixture: fixture.to_string(),
                status: "unknown".to_string(),
            })?;
        node.payload
            .as_ref()
            .ok_or_else(|| FixtureStackError::ValueNotReady {
                fixture: fixture.to_string(),
                status: node.status.to_string(),
            })
    }

    /// Computes and applies the transition from the current active path to
    /// `target_path`. Callers are expected to actually perform the
    /// teardown/reset/setup calls the returned [`Transition`] describes
    /// (this only updates bookkeeping, it doesn't call user code).
    pub fn transition_to(&mut self, target_path: &[SmolStr]) -> Transition {
        let common_len = self
            .active_path
            .iter()
            .zip(target_path.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let tear_downs: Vec<SmolStr> = self.active_path[common_len..]
            .iter()
            .rev()
            .cloned()
            .collect();
        for name in &tear_downs {
            if let Some(node) = self.nodes.get_mut(name) {
                node.status = Status::Red;
                node.payload = None;
            }
        }

        // Reset common-prefix fixtures that the previous test dirtied,
        // walking from the one closest to the test (deepest) up toward the
        // root, stopping once a fixture is found that's already clean.
        let mut resets = Vec::new();
        for name in target_path[..common_len].iter().rev() {
            let node = self.nodes.get_mut(name).expect("validated at build time");
            if node.status == Status::Yellow {
                node.status = Status::Green;
                resets.push(name.clone());
            } else {
                break;
            }
        }
        resets.reverse();

        let set_ups: Vec<SmolStr> = target_path[common_len..].to_vec();
        for name in &set_ups {
            if let Some(node) = self.nodes.get_mut(name) {
                node.status = Status::Green;
            }
        }

        self.active_path = target_path.to_vec();
        Transition {
            tear_downs,
            resets,
            set_ups,
        }
    }

    /// Records the payload a fixture's `SetUp` produced.
    pub fn set_payload(&mut self, fixture: &str, payload: SetupPayload) {
        if let Some(node) = self.nodes.get_mut(fixture) {
            node.payload = Some(payload);
        }
    }

    /// A fixture's current status, if it's known to this stack.
    pub fn status_of(&self, fixture: &str) -> Option<Status> {
        self.nodes.get(fixture).map(|node| node.status)
    }

    /// Walks `name`'s own parent chain (as recorded at build time) up to its
    /// root, root-first. Unlike [`resolve_path`], this only needs `self`,
    /// since every node already carries its parent.
    pub fn path_to(&self, name: &str) -> Vec<SmolStr> {
        let mut path = Vec::new();
        let mut current = Some(SmolStr::from(name));
        while let Some(name) = current {
            current = self.nodes.get(&name).and_then(|node| node.parent.clone());
            path.push(name);
        }
        path.reverse();
        path
    }

    /// The first fixture in the common prefix between the active path and
    /// `target_path` that is currently `Red` — i.e. a fixture this test
    /// would reuse rather than freshly set up, but whose last `SetUp` (or an
    /// earlier descendant's) failed and was never cleared.
    pub fn first_red_in_common_prefix(&self, target_path: &[SmolStr]) -> Option<SmolStr> {
        let common_len = self
            .active_path
            .iter()
            .zip(target_path.iter())
            .take_while(|(a, b)| a == b)
            .count();
        self.active_path[..common_len]
            .iter()
            .find(|name| self.nodes[*name].status == Status::Red)
            .cloned()
    }

    /// Poisons a fixture and every fixture above it in the active path,
    /// following a `SetUp` failure.
    pub fn poison(&mut self, fixture: &str) {
        if let Some(node) = self.nodes.get_mut(fixture) {
            node.status = Status::Red;
        }
        if let Some(pos) = self.active_path.iter().position(|n| n == fixture) {
            for name in &self.active_path[..pos] {
                if let Some(node) = self.nodes.get_mut(name) {
                    node.status = node.status.worst(Status::Red);
                }
            }
        }
    }

    /// Marks every fixture on the active path dirty, after a test using it
    /// has completed: any of them might have been mutated through shared
    /// state, so the next test to reuse one needs to reset it first.
    pub fn mark_active_dirty(&mut self) {
        for name in self.active_path.clone() {
            if let Some(node) = self.nodes.get_mut(&name) {
                if node.status == Status::Green {
                    node.status = Status::Yellow;
                }
            }
        }
    }
}

/// A fixture name tagged with which bundle (local or remote) owns it.
pub type TaggedFixture = (SmolStr, BundleRole);

/// The other side of a combined stack from `role`'s point of view.
pub fn counterpart(role: BundleRole) -> BundleRole {
    match role {
        BundleRole::Local => BundleRole::Remote,
        BundleRole::Remote => BundleRole::Local,
    }
}

/// The fixture stack split across the local and remote bundles, made to
/// behave as one logical stack spanning the process boundary.
#[derive(Debug, Default)]
pub struct CombinedFixtureStack {
    local: FixtureStack,
    remote: FixtureStack,
    roles: BTreeMap<SmolStr, BundleRole>,
}

impl CombinedFixtureStack {
    /// Builds a combined stack from fixtures drawn from both bundles.
    pub fn build(
        local_fixtures: &BTreeMap<SmolStr, EntitySummary>,
        remote_fixtures: &BTreeMap<SmolStr, EntitySummary>,
    ) -> Result<Self, FixtureStackError> {
        let mut roles = BTreeMap::new();
        for name in local_fixtures.keys() {
            roles.insert(name.clone(), BundleRole::Local);
        }
        for name in remote_fixtures.keys() {
            roles.insert(name.clone(), BundleRole::Remote);
        }
        Ok(Self {
            local: FixtureStack::build(local_fixtures)?,
            remote: FixtureStack::build(remote_fixtures)?,
            roles,
        })
    }

    /// The worst status across both sides of the stack.
    pub fn worst_status(&self) -> Status {
        self.local.worst_status().worst(self.remote.worst_status())
    }

    /// Transitions both sides of the stack to the fixtures named in
    /// `target_path`, routing each fixture to its owning side while
    /// preserving the overall root-to-leaf order on each side.
    pub fn transition_to(
        &mut self,
        target_path: &[TaggedFixture],
    ) -> (Transition, Transition) {
        let local_path: Vec<SmolStr> = target_path
            .iter()
            .filter(|(_, role)| *role == BundleRole::Local)
            .map(|(name, _)| name.clone())
            .collect();
        let remote_path: Vec<SmolStr> = target_path
            .iter()
            .filter(|(_, role)| *role == BundleRole::Remote)
            .map(|(name, _)| name.clone())
            .collect();
        (
            self.local.transition_to(&local_path),
            self.remote.transition_to(&remote_path),
        )
    }

    /// The role a fixture belongs to, if known.
    pub fn role_of(&self, fixture: &str) -> Option<BundleRole> {
        self.roles.get(fixture).copied()
    }

    /// This side's own [`FixtureStack`].
    fn side(&self, role: BundleRole) -> &FixtureStack {
        match role {
            BundleRole::Local => &self.local,
            BundleRole::Remote => &self.remote,
        }
    }

    /// This side's own [`FixtureStack`], mutably.
    fn side_mut(&mut self, role: BundleRole) -> &mut FixtureStack {
        match role {
            BundleRole::Local => &mut self.local,
            BundleRole::Remote => &mut self.remote,
        }
    }

    /// The worst status of the fixtures `role`'s side currently has active.
    pub fn status_of_side(&self, role: BundleRole) -> Status {
        self.side(role).worst_status()
    }

    /// Poisons `fixture` (and its active-path ancestors) on whichever side
    /// owns it.
    pub fn poison(&mut self, fixture: &str) {
        if let Some(role) = self.role_of(fixture) {
            self.side_mut(role).poison(fixture);
        }
    }

    /// Transitions `role`'s side to the full ancestor chain ending at
    /// `fixture`, as requested by a `PreTest` stack operation from the
    /// counterpart side.
    pub fn transition_side_to(&mut self, role: BundleRole, fixture: &str) -> Transition {
        let path = self.side(role).path_to(fixture);
        self.side_mut(role).transition_to(&path)
    }

    /// Tears the given side's stack all the way down, as requested by a
    /// `Reset` stack operation. Returns the number of fixtures torn down.
    pub fn reset_side(&mut self, role: BundleRole) -> usize {
        self.side_mut(role).transition_to(&[]).tear_downs.len()
    }

    /// Marks every fixture on `role`'s active path dirty, as requested by a
    /// `SetDirty` stack operation from the counterpart side.
    pub fn mark_side_dirty(&mut self, role: BundleRole) {
        self.side_mut(role).mark_active_dirty();
    }

    /// The first fixture in `target_path`'s common prefix with the stack's
    /// active path (on whichever side owns it) that is currently `Red` — a
    /// fixture a previous test's `SetUp` failed to bring up and that was
    /// never torn down or reset clean.
    pub fn first_red_in_common_prefix(&self, target_path: &[TaggedFixture]) -> Option<SmolStr> {
        let local_path: Vec<SmolStr> = target_path
            .iter()
            .filter(|(_, role)| *role == BundleRole::Local)
            .map(|(name, _)| name.clone())
            .collect();
        let remote_path: Vec<SmolStr> = target_path
            .iter()
            .filter(|(_, role)| *role == BundleRole::Remote)
            .map(|(name, _)| name.clone())
            .collect();
        self.local
            .first_red_in_common_prefix(&local_path)
            .or_else(|| self.remote.first_red_in_common_prefix(&remote_path))
    }

    /// Reads a fixture's payload from whichever side it lives on. Returns
    /// `None` if the fixture belongs to the other process than `from`, since
    /// no cross-process value transfer is implemented (see
    /// `RemoteValueUnavailableError` for the error callers should raise in
    /// that situation).
    pub fn payload_visible_from(
        &self,
        fixture: &str,
        from: BundleRole,
    ) -> Result<&SetupPayload, FixtureStackError> {
        match self.role_of(fixture) {
            Some(role) if role == from => match from {
                BundleRole::Local => self.local.payload(fixture),
                BundleRole::Remote => self.remote.payload(fixture),
            },
            _ => Err(FixtureStackError::ValueNotReady {
                fixture: fixture.to_string(),
                status: "not visible from this side".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_metadata::EntityKind;

    fn fixture(name: &str, parent: Option<&str>) -> (SmolStr, EntitySummary) {
        let mut entity = EntitySummary::new(name, EntityKind::Fixture, "bundle");
        if let Some(parent) = parent {
            entity = entity.with_fixture_parent(parent);
        }
        (name.into(), entity)
    }

    fn forest() -> BTreeMap<SmolStr, EntitySummary> {
        [
            fixture("f1", None),
            fixture("f2", Some("f1")),
            fixture("f3", Some("f1")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn linear_chain_tears_down_and_sets_up_in_order() {
        let mut stack = FixtureStack::build(&forest()).unwrap();
        let t1 = stack.transition_to(&["f1".into()]);
        assert_eq!(t1.set_ups, vec![SmolStr::from("f1")]);
        stack.mark_active_dirty();

        let t2 = stack.transition_to(&["f1".into(), "f2".into()]);
        assert!(t2.tear_downs.is_empty());
        assert_eq!(t2.set_ups, vec![SmolStr::from("f2")]);
        // f1 stayed on the stack and was dirtied by the first test, so it's
        // reset rather than torn down.
        assert_eq!(t2.resets, vec![SmolStr::from("f1")]);
    }

    #[test]
    fn reset_minimization_matches_the_documented_counts() {
        let mut stack = FixtureStack::build(&forest()).unwrap();
        let paths: Vec<Vec<SmolStr>> = vec![
            vec![],
            vec!["f1".into()],
            vec!["f1".into()],
            vec!["f1".into(), "f2".into()],
            vec!["f1".into(), "f2".into()],
            vec!["f1".into(), "f3".into()],
            vec!["f1".into(), "f3".into()],
        ];

        let mut reset_counts: BTreeMap<SmolStr, usize> = BTreeMap::new();
        for path in &paths[1..] {
            let transition = stack.transition_to(path);
            for name in &transition.resets {
                *reset_counts.entry(name.clone()).or_default() += 1;
            }
            stack.mark_active_dirty();
        }

        assert_eq!(reset_counts.get(&SmolStr::from("f1")).copied(), Some(5));
        assert_eq!(reset_counts.get(&SmolStr::from("f2")).copied(), Some(1));
        assert_eq!(reset_counts.get(&SmolStr::from("f3")).copied(), Some(1));
    }

    #[test]
    fn unknown_parent_is_rejected_at_build_time() {
        let mut map = forest();
        map.insert("orphan".into(), fixture("orphan", Some("missing")));
        assert!(FixtureStack::build(&map).is_err());
    }

    #[test]
    fn poison_propagates_to_ancestors_on_the_active_path() {
        let mut stack = FixtureStack::build(&forest()).unwrap();
        stack.transition_to(&["f1".into(), "f2".into()]);
        stack.poison("f2");
        assert_eq!(stack.worst_status(), Status::Red);
    }

    #[test]
    fn path_to_walks_the_recorded_parent_chain() {
        let stack = FixtureStack::build(&forest()).unwrap();
        assert_eq!(
            stack.path_to("f2"),
            vec![SmolStr::from("f1"), SmolStr::from("f2")]
        );
    }

    #[test]
    fn first_red_in_common_prefix_finds_a_reused_poisoned_fixture() {
        let mut stack = FixtureStack::build(&forest()).unwrap();
        stack.transition_to(&["f1".into(), "f2".into()]);
        stack.poison("f1");
        assert_eq!(
            stack.first_red_in_common_prefix(&["f1".into(), "f3".into()]),
            Some(SmolStr::from("f1"))
        );
    }

    #[test]
    fn first_red_in_common_prefix_is_none_on_a_clean_stack() {
        let mut stack = FixtureStack::build(&forest()).unwrap();
        stack.transition_to(&["f1".into(), "f2".into()]);
        assert_eq!(
            stack.first_red_in_common_prefix(&["f1".into(), "f3".into()]),
            None
        );
    }

    fn combined_forest() -> (BTreeMap<SmolStr, EntitySummary>, BTreeMap<SmolStr, EntitySummary>) {
        let local = [fixture("local_root", None)].into_iter().collect();
        let remote = [fixture("remote_root", None)].into_iter().collect();
        (local, remote)
    }

    #[test]
    fn counterpart_swaps_local_and_remote() {
        assert_eq!(counterpart(BundleRole::Local), BundleRole::Remote);
        assert_eq!(counterpart(BundleRole::Remote), BundleRole::Local);
    }

    #[test]
    fn reset_side_tears_down_only_the_named_side() {
        let (local, remote) = combined_forest();
        let mut stack = CombinedFixtureStack::build(&local, &remote).unwrap();
        stack.transition_to(&[
            (SmolStr::from("local_root"), BundleRole::Local),
            (SmolStr::from("remote_root"), BundleRole::Remote),
        ]);
        let torn_down = stack.reset_side(BundleRole::Remote);
        assert_eq!(torn_down, 1);
        assert_eq!(stack.status_of_side(BundleRole::Remote), Status::Red);
        assert_eq!(stack.status_of_side(BundleRole::Local), Status::Green);
    }

    #[test]
    fn transition_side_to_resolves_the_requested_fixtures_own_chain() {
        let (local, remote) = combined_forest();
        let mut stack = CombinedFixtureStack::build(&local, &remote).unwrap();
        let transition = stack.transition_side_to(BundleRole::Remote, "remote_root");
        assert_eq!(transition.set_ups, vec![SmolStr::from("remote_root")]);
        assert_eq!(stack.status_of_side(BundleRole::Remote), Status::Green);
    }

    #[test]
    fn mark_side_dirty_only_affects_the_named_side() {
        let (local, remote) = combined_forest();
        let mut stack = CombinedFixtureStack::build(&local, &remote).unwrap();
        stack.transition_to(&[
            (SmolStr::from("local_root"), BundleRole::Local),
            (SmolStr::from("remote_root"), BundleRole::Remote),
        ]);
        stack.mark_side_dirty(BundleRole::Local);
        // Dirtying surfaces as a reset on the next transition through the
        // same fixture.
        let transition = stack.transition_side_to(BundleRole::Local, "local_root");
        assert_eq!(transition.resets, vec![SmolStr::from("local_root")]);
    }

    #[test]
    fn combined_poison_routes_to_the_owning_side() {
        let (local, remote) = combined_forest();
        let mut stack = CombinedFixtureStack::build(&local, &remote).unwrap();
        stack.transition_to(&[
            (SmolStr::from("local_root"), BundleRole::Local),
            (SmolStr::from("remote_root"), BundleRole::Remote),
        ]);
        stack.poison("remote_root");
        assert_eq!(stack.status_of_side(BundleRole::Remote), Status::Red);
        assert_eq!(stack.status_of_side(BundleRole::Local), Status::Green);
    }
}
