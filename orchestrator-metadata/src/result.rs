// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::EntityKind;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A single structured error attached to a [`ResultRecord`].
///
/// Mirrors the data model's "Result Record" paragraph: "a list of structured
/// errors (each: reason, optional file/line/stack)".
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct StructuredError {
    /// Human-readable reason for the error.
    pub reason: String,

    /// Source file the error was attributed to, if known.
    pub file: Option<Utf8PathBuf>,

    /// Line number within `file`, if known.
    pub line: Option<u32>,

    /// Captured stack trace or goroutine-style dump, if any.
    pub stack: Option<String>,
}

impl StructuredError {
    /// Builds a bare error with only a reason, the common case for
    /// synthesized errors (crash reconciliation, dependency failures).
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            file: None,
            line: None,
            stack: None,
        }
    }
}

/// A durable per-entity result, reconciled from the event stream by the
/// results handler (§4.2) and persisted to `streamed_results.jsonl`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "config-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct ResultRecord {
    /// Name of the entity this record is for.
    pub entity_name: SmolStr,

    /// Test or fixture.
    pub kind: EntityKind,

    /// RFC 3339 timestamp of entity start.
    pub start_time: String,

    /// RFC 3339 timestamp of entity end.
    pub end_time: String,

    /// Path to the per-entity output directory, relative to the result
    /// directory root.
    pub output_dir: Utf8PathBuf,

    /// Structured errors recorded against this entity. Empty means the
    /// entity completed without error.
    pub errors: Vec<StructuredError>,

    /// Reasons the entity was skipped, if it was. `None` means the entity
    /// ran to completion (successfully or not).
    pub skip_reasons: Option<Vec<String>>,
}

impl ResultRecord {
    /// Returns true if this record has no recorded errors and was not
    /// skipped.
    pub fn passed(&self) -> bool {
        self.skip_reasons.is_none() && self.errors.is_empty()
    }

    /// Returns true if this record was skipped rather than executed.
    pub fn skipped(&self) -> bool {
        self.skip_reasons.is_some()
    }

    /// Serializes this record as a single JSON line, suitable for appending
    /// to `streamed_results.jsonl`.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample(errors: Vec<StructuredError>, skip_reasons: Option<Vec<String>>) -> ResultRecord {
        ResultRecord {
            entity_name: SmolStr::new("pkg.TestFoo"),
            kind: EntityKind::Test,
            start_time: "2026-01-01T00:00:00Z".to_string(),
            end_time: "2026-01-01T00:00:01Z".to_string(),
            output_dir: Utf8PathBuf::from("pkg.TestFoo"),
            errors,
            skip_reasons,
        }
    }

    #[test_case(vec![], None, true; "clean pass")]
    #[test_case(vec![StructuredError::reason("boom")], None, false; "one error")]
    #[test_case(vec![], Some(vec!["missing SoftwareDeps: dep1".to_string()]), false; "skipped")]
    fn passed_matches_expectation(
        errors: Vec<StructuredError>,
        skip_reasons: Option<Vec<String>>,
        expected: bool,
    ) {
        assert_eq!(sample(errors, skip_reasons).passed(), expected);
    }

    #[test]
    fn json_line_has_no_trailing_newline() {
        let record = sample(vec![], None);
        let line = record.to_json_line().unwrap();
        assert!(!line.ends_with('\n'));
        let parsed: ResultRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }
}
