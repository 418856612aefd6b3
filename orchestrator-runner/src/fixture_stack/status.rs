// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixture status lattice.

use std::fmt;

/// The health of a single fixture, or the worst-case health of a stack of
/// them.
///
/// Ordered `Red < Yellow < Green`: `Red` is the worst outcome, `Green` the
/// best. A stack's status is the minimum (worst) of its members' statuses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Status {
    /// SetUp failed, or a descendant's failure poisoned this fixture.
    Red,
    /// SetUp succeeded but the fixture has since been marked dirty and not
    /// yet reset.
    Yellow,
    /// SetUp succeeded and the fixture is ready for use.
    Green,
}

impl Status {
    /// Combines this status with another, returning the worse of the two.
    pub fn worst(self, other: Status) -> Status {
        self.min(other)
    }

    /// Folds an iterator of statuses into the single worst one, or `Green`
    /// for an empty stack (a stack with nothing on it is trivially healthy).
    pub fn worst_of(statuses: impl IntoIterator<Item = Status>) -> Status {
        statuses
            .into_iter()
            .fold(Status::Green, |acc, s| acc.worst(s))
    }

    /// True once this fixture needs a fresh `SetUp` before it can be used.
    pub fn needs_setup(self) -> bool {
        matches!(self, Status::Red)
    }

    /// True if this fixture is usable but requires a `Reset` first.
    pub fn needs_reset(self) -> bool {
        matches!(self, Status::Yellow)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Red => "red",
            Status::Yellow => "yellow",
            Status::Green => "green",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_picks_the_lowest() {
        assert_eq!(Status::Green.worst(Status::Yellow), Status::Yellow);
        assert_eq!(Status::Yellow.worst(Status::Red), Status::Red);
        assert_eq!(Status::Green.worst(Status::Green), Status::Green);
    }

    #[test]
    fn worst_of_empty_stack_is_green() {
        assert_eq!(Status::worst_of([]), Status::Green);
    }

    #[test]
    fn worst_of_mixed_stack_is_the_minimum() {
        assert_eq!(
            Status::worst_of([Status::Green, Status::Yellow, Status::Green]),
            Status::Yellow
        );
    }

    #[test]
    fn ordering_matches_the_lattice() {
        assert!(Status::Red < Status::Yellow);
        assert!(Status::Yellow < Status::Green);
    }
}
