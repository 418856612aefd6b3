// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciles a raw event stream from a possibly misbehaving runner into a
//! sequence that satisfies the downstream invariants: every `EntityStart`
//! gets exactly one matching `EntityEnd`, nesting is preserved, and a runner
//! crash mid-test is turned into a synthesized error plus end rather than a
//! silently truncated stream.

use crate::errors::EventProcessorError;
use crate::event_processor::events::Event;
use orchestrator_metadata::{EntityKind, StructuredError};
use smol_str::SmolStr;

/// Reconciles one runner's raw event stream.
#[derive(Debug, Default)]
pub struct Preprocessor {
    /// Entities with an open `EntityStart` and no matching `EntityEnd` yet,
    /// in the order they were opened (innermost last).
    open: Vec<(SmolStr, EntityKind)>,
}

impl Preprocessor {
    /// Creates a fresh preprocessor for a new runner stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw event from the wire, returning zero or more events to
    /// forward to the handler chain. `Heartbeat` is consumed here: it resets
    /// the caller's per-message liveness timer but carries no content.
    pub fn process(&mut self, raw: Event) -> Result<Vec<Event>, EventProcessorError> {
        match raw {
            Event::Heartbeat => Ok(Vec::new()),
            Event::EntityStart { name, kind } => {
                if self.open.iter().any(|(open_name, _)| *open_name == name) {
                    return Err(EventProcessorError::DuplicateStart {
                        entity: name.to_string(),
                    });
                }
                self.open.push((name.clone(), kind));
                Ok(vec![Event::EntityStart { name, kind }])
            }
            Event::EntityLog { ref name, .. } | Event::EntityError { ref name, .. } => {
                if !self.open.iter().any(|(open_name, _)| open_name == name) {
                    return Err(EventProcessorError::UnopenedEntity {
                        entity: name.to_string(),
                    });
                }
                Ok(vec![raw])
            }
            Event::EntityEnd {
                ref name,
                kind,
                ref skip_reasons,
                ..
            } => {
                let position = self
                    .open
                    .iter()
                    .position(|(open_name, _)| open_name == name)
                    .ok_or_else(|| EventProcessorError::UnopenedEntity {
                        entity: name.to_string(),
                    })?;
                self.open.remove(position);
                Ok(vec![Event::EntityEnd {
                    name: name.clone(),
                    kind,
                    skip_reasons: skip_reasons.clone(),
                    synthesized: false,
                }])
            }
            other @ (Event::RunStart | Event::RunEnd | Event::RunLog { .. }) => Ok(vec![other]),
            other @ Event::EntityCopyEnd { .. } => Ok(vec![other]),
        }
    }

    /// Called once the raw stream has ended (cleanly or via a runner crash).
    /// For every entity still open, synthesizes a final `EntityError`
    /// followed by a synthetic `EntityEnd`, innermost (most recently opened)
    /// first, so the synthesized events still nest correctly.
    pub fn finish(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some((name, kind)) = self.open.pop() {
            events.push(Event::EntityError {
                name: name.clone(),
                error: StructuredError::reason(
                    "runner process ended unexpectedly (see runner log for a crash dump)",
                ),
            });
            events.push(Event::EntityEnd {
                name,
                kind,
                skip_reasons: Vec::new(),
                synthesized: true,
            });
        }
        events
    }

    /// True if any entity is currently open (used by callers to decide
    /// whether a stream ending now counts as a crash).
    pub fn has_open_entities(&self) -> bool {
        !self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_start_end_pair_passes_through() {
        let mut pre = Preprocessor::new();
        let started = pre
            .process(Event::EntityStart {
                name: "pkg.A".into(),
                kind: EntityKind::Test,
            })
            .unwrap();
        assert_eq!(started.len(), 1);
        let ended = pre
            .process(Event::EntityEnd {
                name: "pkg.A".into(),
                kind: EntityKind::Test,
                skip_reasons: vec![],
                synthesized: false,
            })
            .unwrap();
        assert_eq!(ended.len(), 1);
        assert!(!pre.has_open_entities());
    }

    #[test]
    fn duplicate_start_is_fatal() {
        let mut pre = Preprocessor::new();
        pre.process(Event::EntityStart {
            name: "pkg.A".into(),
            kind: EntityKind::Test,
        })
        .unwrap();
        let err = pre
            .process(Event::EntityStart {
                name: "pkg.A".into(),
                kind: EntityKind::Test,
            })
            .unwrap_err();
        assert!(matches!(err, EventProcessorError::DuplicateStart { .. }));
    }

    #[test]
    fn log_outside_open_pair_is_rejected() {
        let mut pre = Preprocessor::new();
        let err = pre
            .process(Event::EntityLog {
                name: "pkg.A".into(),
                line: "hi".into(),
            })
            .unwrap_err();
        assert!(matches!(err, EventProcessorError::UnopenedEntity { .. }));
    }

    #[test]
    fn crash_mid_test_synthesizes_error_and_end() {
        let mut pre = Preprocessor::new();
        pre.process(Event::EntityStart {
            name: "pkg.A".into(),
            kind: EntityKind::Test,
        })
        .unwrap();
        let synthesized = pre.finish();
        assert_eq!(synthesized.len(), 2);
        assert!(matches!(synthesized[0], Event::EntityError { .. }));
        match &synthesized[1] {
            Event::EntityEnd { synthesized, .. } => assert!(*synthesized),
            _ => panic!("expected EntityEnd"),
        }
    }

    #[test]
    fn multiple_crashed_entities_close_innermost_first() {
        let mut pre = Preprocessor::new();
        pre.process(Event::EntityStart {
            name: "f1".into(),
            kind: EntityKind::Fixture,
        })
        .unwrap();
        pre.process(Event::EntityStart {
            name: "pkg.A".into(),
            kind: EntityKind::Test,
        })
        .unwrap();
        let synthesized = pre.finish();
        let names: Vec<_> = synthesized
            .iter()
            .filter_map(|e| match e {
                Event::EntityEnd { name, .. } => Some(name.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["pkg.A".to_string(), "f1".to_string()]);
    }
}
