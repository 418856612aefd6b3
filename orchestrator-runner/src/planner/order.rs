// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orders fixture-path groups to minimize stack churn: each group picked is
//! the one sharing the longest common prefix with the path currently on top
//! of the stack, greedily, breaking ties by path order.

use smol_str::SmolStr;

/// A set of tests that all resolve to the same fixture path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestGroup {
    /// The common fixture path (root-first) shared by every test here.
    pub fixture_path: Vec<SmolStr>,
    /// Test names, in the order they'll run within this group.
    pub tests: Vec<SmolStr>,
}

/// Greedily orders `groups` so that consecutive groups share as much of
/// their fixture path as possible, minimizing the number of teardown/setup
/// calls the fixture stack performs overall.
///
/// The group with an empty fixture path (no-fixture tests), if present,
/// always runs first: it costs nothing to run before any fixture is set up,
/// and deferring it would only ever add churn.
///
/// Ties (two groups with equal common-prefix length against the current
/// top) are broken by fixture path order, so the result is deterministic
/// given the same input groups regardless of their original order.
pub fn order_groups(mut groups: Vec<TestGroup>) -> Vec<TestGroup> {
    groups.sort_by(|a, b| a.fixture_path.cmp(&b.fixture_path));

    let mut result = Vec::with_capacity(groups.len());
    if groups.is_empty() {
        return result;
    }

    if let Some(pos) = groups.iter().position(|g| g.fixture_path.is_empty()) {
        result.push(groups.remove(pos));
    }

    while !groups.is_empty() {
        let current_top: &[SmolStr] = result
            .last()
            .map(|g: &TestGroup| g.fixture_path.as_slice())
            .unwrap_or(&[]);

        let mut best_idx = 0;
        let mut best_common = common_prefix_len(current_top, &groups[0].fixture_path);
        for (idx, group) in groups.iter().enumerate().skip(1) {
            let common = common_prefix_len(current_top, &group.fixture_path);
            if common > best_common
                || (common == best_common && group.fixture_path < groups[best_idx].fixture_path)
            {
                best_common = common;
                best_idx = idx;
            }
        }
        result.push(groups.remove(best_idx));
    }

    result
}

fn common_prefix_len(a: &[SmolStr], b: &[SmolStr]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(path: &[&str], tests: &[&str]) -> TestGroup {
        TestGroup {
            fixture_path: path.iter().map(|s| SmolStr::new(*s)).collect(),
            tests: tests.iter().map(|s| SmolStr::new(*s)).collect(),
        }
    }

    #[test]
    fn no_fixture_group_runs_first() {
        let groups = vec![
            group(&["f1"], &["T1"]),
            group(&[], &["T0"]),
            group(&["f1", "f2"], &["T2"]),
        ];
        let ordered = order_groups(groups);
        assert_eq!(ordered[0].fixture_path, Vec::<SmolStr>::new());
    }

    #[test]
    fn shared_prefix_groups_are_adjacent() {
        let groups = vec![
            group(&["f1", "f3"], &["T5"]),
            group(&["f1"], &["T1"]),
            group(&["f1", "f2"], &["T3"]),
        ];
        let ordered = order_groups(groups);
        // Every group here shares the "f1" prefix, so the only real
        // question is which of f2/f3 comes second; lexicographic tie-break
        // picks f2 before f3.
        let paths: Vec<Vec<SmolStr>> = ordered.into_iter().map(|g| g.fixture_path).collect();
        assert_eq!(
            paths,
            vec![
                vec![SmolStr::new("f1")],
                vec![SmolStr::new("f1"), SmolStr::new("f2")],
                vec![SmolStr::new("f1"), SmolStr::new("f3")],
            ]
        );
    }

    #[test]
    fn disjoint_trees_still_produce_a_total_order() {
        let groups = vec![group(&["a"], &["T1"]), group(&["b"], &["T2"])];
        let ordered = order_groups(groups);
        assert_eq!(ordered.len(), 2);
    }
}
