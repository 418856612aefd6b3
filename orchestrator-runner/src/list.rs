// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ListTests`/`ListFixtures`: match-first filtering over a bundle's entity
//! registry, plus the start-fixture resolution callers need before driving
//! the combined fixture stack (§4.1).

use crate::fixture_stack::resolve_path;
use orchestrator_filtering::{EntityPattern, MatchTarget};
use orchestrator_metadata::{BundleRole, EntityKind, EntitySummary};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// `EntitySummary`'s attributes aren't stored pre-flattened the way
/// [`MatchTarget::attribute_tags`] wants them, so they're computed here and
/// carried by [`TaggedEntity`] rather than implementing the (foreign) trait
/// directly on the (foreign) `EntitySummary`.
fn attribute_tags_owned(entity: &EntitySummary) -> Vec<String> {
    let mut tags = vec![
        entity.bundle_name.to_string(),
        match entity.kind {
            EntityKind::Test => "test".to_string(),
            EntityKind::Fixture => "fixture".to_string(),
        },
    ];
    if let Some(predicate) = &entity.software_deps {
        tags.push(predicate.to_string());
    }
    if let Some(predicate) = &entity.hardware_deps {
        tags.push(predicate.to_string());
    }
    tags
}

/// A [`MatchTarget`] wrapper that carries the flattened attribute tags
/// alongside the entity it was built from, so the boolean-expression
/// dialect has real data to evaluate against.
struct TaggedEntity<'a> {
    entity: &'a EntitySummary,
    tags: Vec<String>,
}

impl MatchTarget for TaggedEntity<'_> {
    fn entity_name(&self) -> &str {
        self.entity.name.as_str()
    }

    fn attribute_tags(&self) -> &[String] {
        &self.tags
    }
}

fn matches(pattern: &EntityPattern, entity: &EntitySummary) -> bool {
    let tagged = TaggedEntity {
        entity,
        tags: attribute_tags_owned(entity),
    };
    pattern.matches(&tagged)
}

/// `ListTests(patterns, features)`: match-first filtering over `registry`,
/// returning test entities in the stable (bundle name, entity name)
/// ascending order the data model promises. `features` is accepted for
/// symmetry with the documented signature; skip-check filtering happens
/// later, in the planner — `ListTests` itself only matches patterns.
pub fn list_tests(
    registry: &BTreeMap<SmolStr, EntitySummary>,
    patterns: &EntityPattern,
) -> Vec<EntitySummary> {
    let mut matched: Vec<&EntitySummary> = registry
        .values()
        .filter(|e| e.kind == EntityKind::Test && matches(patterns, e))
        .collect();
    matched.sort_by(|a, b| (&a.bundle_name, &a.name).cmp(&(&b.bundle_name, &b.name)));
    matched.into_iter().cloned().collect()
}

/// `ListFixtures()`: every fixture entity in `registry`, in (bundle name,
/// entity name) order.
pub fn list_fixtures(registry: &BTreeMap<SmolStr, EntitySummary>) -> Vec<EntitySummary> {
    let mut fixtures: Vec<&EntitySummary> = registry
        .values()
        .filter(|e| e.kind == EntityKind::Fixture)
        .collect();
    fixtures.sort_by(|a, b| (&a.bundle_name, &a.name).cmp(&(&b.bundle_name, &b.name)));
    fixtures.into_iter().cloned().collect()
}

/// Resolves the *start fixture name* for `fixture`: the name of the
/// topmost ancestor whose role differs from `fixture`'s own role, i.e. the
/// shallowest fixture the caller must drive remotely before the local
/// portion of the stack can be pushed. Returns `None` if the whole chain
/// shares one role (no cross-process split is needed).
pub fn start_fixture_name(
    registry: &BTreeMap<SmolStr, EntitySummary>,
    roles: &BTreeMap<SmolStr, BundleRole>,
    fixture: &SmolStr,
) -> Result<Option<SmolStr>, crate::errors::FixtureStackError> {
    let path = resolve_path(registry, Some(fixture))?;
    let Some(&own_role) = roles.get(fixture) else {
        return Ok(None);
    };
    let mut start = None;
    for ancestor in &path {
        if roles.get(ancestor) != Some(&own_role) {
            start = Some(ancestor.clone());
            break;
        }
    }
    Ok(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_metadata::EntityKind as Kind;

    fn registry() -> BTreeMap<SmolStr, EntitySummary> {
        [
            (
                SmolStr::from("pkg.TestAlpha"),
                EntitySummary::new("pkg.TestAlpha", Kind::Test, "local_bundle"),
            ),
            (
                SmolStr::from("pkg.TestBeta"),
                EntitySummary::new("pkg.TestBeta", Kind::Test, "local_bundle")
                    .with_software_deps("wifi"),
            ),
            (
                SmolStr::from("f1"),
                EntitySummary::new("f1", Kind::Fixture, "local_bundle"),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn list_tests_filters_by_glob_and_excludes_fixtures() {
        let registry = registry();
        let pattern = EntityPattern::parse(&["pkg.Test*"]).unwrap();
        let tests = list_tests(&registry, &pattern);
        assert_eq!(tests.len(), 2);
        assert!(tests.iter().all(|t| t.kind == Kind::Test));
    }

    #[test]
    fn list_tests_supports_boolean_expression_dialect() {
        let registry = registry();
        let pattern = EntityPattern::parse(&["(\"*wifi*\")"]).unwrap();
        let tests = list_tests(&registry, &pattern);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name.as_str(), "pkg.TestBeta");
    }

    #[test]
    fn list_fixtures_returns_only_fixtures_in_stable_order() {
        let registry = registry();
        let fixtures = list_fixtures(&registry);
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].name.as_str(), "f1");
    }

    #[test]
    fn start_fixture_name_finds_the_topmost_role_change() {
        let mut registry = BTreeMap::new();
        registry.insert(
            SmolStr::from("remote_root"),
            EntitySummary::new("remote_root", Kind::Fixture, "remote_bundle"),
        );
        registry.insert(
            SmolStr::from("local_child"),
            EntitySummary::new("local_child", Kind::Fixture, "local_bundle")
                .with_fixture_parent("remote_root"),
        );
        let mut roles = BTreeMap::new();
        roles.insert(SmolStr::from("remote_root"), BundleRole::Remote);
        roles.insert(SmolStr::from("local_child"), BundleRole::Local);

        let start = start_fixture_name(&registry, &roles, &SmolStr::from("local_child")).unwrap();
        assert_eq!(start, Some(SmolStr::from("remote_root")));
    }

    #[test]
    fn start_fixture_name_is_none_when_the_whole_chain_shares_a_role() {
        let mut registry = BTreeMap::new();
        registry.insert(
            SmolStr::from("f1"),
            EntitySummary::new("f1", Kind::Fixture, "local_bundle"),
        );
        let mut roles = BTreeMap::new();
        roles.insert(SmolStr::from("f1"), BundleRole::Local);

        let start = start_fixture_name(&registry, &roles, &SmolStr::from("f1")).unwrap();
        assert_eq!(start, None);
    }
}
