// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event types a runner stream carries, after the preprocessor has
//! reconciled them into a consistent sequence.

use orchestrator_metadata::{EntityKind, StructuredError};
use smol_str::SmolStr;

/// One event in the reconciled stream the event processor hands to handlers.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// Precedes every other event; emitted exactly once per run.
    RunStart,
    /// Follows every other event; emitted exactly once per run, even on
    /// early failure.
    RunEnd,
    /// A log line not associated with any particular entity.
    RunLog {
        /// The log line's text.
        line: String,
    },
    /// A new entity has begun executing.
    EntityStart {
        /// The entity's name.
        name: SmolStr,
        /// Whether it's a test or a fixture.
        kind: EntityKind,
    },
    /// A log line produced by an entity while it runs.
    EntityLog {
        /// The entity's name.
        name: SmolStr,
        /// The log line's text.
        line: String,
    },
    /// The entity produced a structured error. Does not end the entity.
    EntityError {
        /// The entity's name.
        name: SmolStr,
        /// The error record.
        error: StructuredError,
    },
    /// The entity finished.
    EntityEnd {
        /// The entity's name.
        name: SmolStr,
        /// Whether it's a test or a fixture.
        kind: EntityKind,
        /// Non-empty if the entity was skipped rather than run.
        skip_reasons: Vec<String>,
        /// True if this `EntityEnd` was synthesized by the preprocessor
        /// rather than received from the runner (crash recovery).
        synthesized: bool,
    },
    /// The entity's remote output directory has finished copying to the
    /// host result directory.
    EntityCopyEnd {
        /// The entity's name.
        name: SmolStr,
    },
    /// A liveness signal with no semantic content; resets the per-message
    /// timeout but is not forwarded to handlers.
    Heartbeat,
}

/// Whether an entity has recorded at least one error so far, threaded
/// through PreTest/PostTest hooks on the fixture stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityCondition {
    /// No errors recorded yet.
    Ok,
    /// At least one error recorded.
    HasError,
}
