// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed, ordered chain of event handlers. Each is isolated: a failure
//! in one never prevents the others from seeing the event. The only way a
//! handler can stop the rest of the chain (and the run) is the fail-fast
//! handler emitting a fatal-error marker.

use crate::errors::EventProcessorError;
use crate::event_processor::events::Event;
use camino::{Utf8Path, Utf8PathBuf};
use orchestrator_metadata::{EntityKind, ResultRecord, StructuredError};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

/// A single stage in the handler chain.
///
/// `handle` is synchronous and expected to be fast; handlers that need to do
/// real I/O (copy-output) queue the work and return promptly, per §5's
/// suspension-point guidance.
pub trait Handler: Send {
    /// A short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Observes one event. Returning `Err` stops the rest of the chain for
    /// this event and propagates as a run-level failure; only the fail-fast
    /// handler is expected to do this.
    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError>;

    /// Drains any follow-up events this handler wants injected back into the
    /// chain, queued up since the last call. The processor calls this after
    /// every dispatched event and re-dispatches whatever comes back through
    /// the full chain. Most handlers never produce any; only
    /// [`CopyOutputHandler`] overrides this, to emit `EntityCopyEnd`.
    fn take_followups(&mut self) -> Vec<Event> {
        Vec::new()
    }
}

/// Routes `EntityLog` and `RunLog` into the structured logger so terminal
/// and file sinks see the same stream.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl Handler for LoggingHandler {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        match event {
            Event::RunLog { line } => tracing::info!(target: "orchestrator::run", "{line}"),
            Event::EntityLog { name, line } => {
                tracing::info!(target: "orchestrator::entity", entity = %name, "{line}")
            }
            Event::EntityError { name, error } => {
                tracing::warn!(target: "orchestrator::entity", entity = %name, "{}", error.reason)
            }
            _ => {}
        }
        Ok(())
    }
}

/// Accumulates entity-level timing spans for the end-of-run summary.
#[derive(Debug, Default)]
pub struct TimingHandler {
    starts: BTreeMap<SmolStr, std::time::Instant>,
    spans: BTreeMap<SmolStr, std::time::Duration>,
}

impl TimingHandler {
    /// Creates an empty timing handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulated per-entity durations, for `timing.json`.
    pub fn spans(&self) -> &BTreeMap<SmolStr, std::time::Duration> {
        &self.spans
    }
}

impl Handler for TimingHandler {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        match event {
            Event::EntityStart { name, .. } => {
                self.starts.insert(name.clone(), std::time::Instant::now());
            }
            Event::EntityEnd { name, .. } => {
                if let Some(start) = self.starts.remove(name) {
                    self.spans.insert(name.clone(), start.elapsed());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Builds the in-memory Result Record table as entities complete.
#[derive(Debug, Default)]
pub struct ResultsHandler {
    records: Mutex<Vec<ResultRecord>>,
    open: Mutex<BTreeMap<SmolStr, (EntityKind, Vec<StructuredError>)>>,
}

impl ResultsHandler {
    /// Creates an empty results table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the records collected so far. Guarded by a
    /// mutex: per §5, this is the only state shared across handler threads.
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().expect("results mutex poisoned").clone()
    }
}

impl Handler for ResultsHandler {
    fn name(&self) -> &'static str {
        "results"
    }

    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        match event {
            Event::EntityStart { name, kind } => {
                self.open
                    .lock()
                    .expect("results mutex poisoned")
                    .insert(name.clone(), (*kind, Vec::new()));
            }
            Event::EntityError { name, error } => {
                if let Some((_, errors)) = self
                    .open
                    .lock()
                    .expect("results mutex poisoned")
                    .get_mut(name)
                {
                    errors.push(error.clone());
                }
            }
            Event::EntityEnd {
                name,
                kind,
                skip_reasons,
                ..
            } => {
                let errors = self
                    .open
                    .lock()
                    .expect("results mutex poisoned")
                    .remove(name)
                    .map(|(_, errors)| errors)
                    .unwrap_or_default();
                let now = chrono::Local::now().to_rfc3339();
                let record = ResultRecord {
                    entity_name: name.clone(),
                    kind: *kind,
                    start_time: now.clone(),
                    end_time: now,
                    output_dir: Utf8PathBuf::from(name.as_str()),
                    errors,
                    skip_reasons: if skip_reasons.is_empty() {
                        None
                    } else {
                        Some(skip_reasons.clone())
                    },
                };
                self.records
                    .lock()
                    .expect("results mutex poisoned")
                    .push(record);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Appends each completed entity's result to `streamed_results.jsonl`,
/// atomically per line (one `write` call per append, each containing a
/// complete JSON line).
#[derive(Debug)]
pub struct StreamedResultsHandler {
    file: std::fs::File,
    pending_errors: BTreeMap<SmolStr, Vec<StructuredError>>,
}

impl StreamedResultsHandler {
    /// Opens (creating if necessary) `streamed_results.jsonl` under
    /// `result_dir` in append mode.
    pub fn open(result_dir: &Utf8Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(result_dir.join("streamed_results.jsonl"))?;
        Ok(Self {
            file,
            pending_errors: BTreeMap::new(),
        })
    }
}

impl Handler for StreamedResultsHandler {
    fn name(&self) -> &'static str {
        "streamed-results"
    }

    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        match event {
            Event::EntityError { name, error } => {
                self.pending_errors
                    .entry(name.clone())
                    .or_default()
                    .push(error.clone());
            }
            Event::EntityEnd {
                name,
                kind,
                skip_reasons,
                ..
            } => {
                let errors = self.pending_errors.remove(name).unwrap_or_default();
                let now = chrono::Local::now().to_rfc3339();
                let record = ResultRecord {
                    entity_name: name.clone(),
                    kind: *kind,
                    start_time: now.clone(),
                    end_time: now,
                    output_dir: Utf8PathBuf::from(name.as_str()),
                    errors,
                    skip_reasons: if skip_reasons.is_empty() {
                        None
                    } else {
                        Some(skip_reasons.clone())
                    },
                };
                if let Ok(mut line) = record.to_json_line() {
                    line.push('\n');
                    if let Err(error) = self.file.write_all(line.as_bytes()) {
                        warn!("failed to append to streamed_results.jsonl: {error}");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Trips the run into a fail-fast state once a configured number of tests
/// have recorded at least one error.
#[derive(Debug, Default)]
pub struct FailFastHandler {
    max_failures: Option<u32>,
    failures: u32,
    errored: std::collections::BTreeSet<SmolStr>,
}

impl FailFastHandler {
    /// `max_failures = None` disables fail-fast entirely.
    pub fn new(max_failures: Option<u32>) -> Self {
        Self {
            max_failures,
            failures: 0,
            errored: std::collections::BTreeSet::new(),
        }
    }

    /// The number of failed tests observed so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Handler for FailFastHandler {
    fn name(&self) -> &'static str {
        "fail-fast"
    }

    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        match event {
            Event::EntityError { name, .. } => {
                self.errored.insert(name.clone());
            }
            Event::EntityEnd { kind, name, .. } => {
                if *kind == EntityKind::Test && self.errored.remove(name) {
                    self.failures += 1;
                    if let Some(max) = self.max_failures {
                        if self.failures >= max {
                            return Err(EventProcessorError::Fatal(format!(
                                "stopping after {} test failures (max {max})",
                                self.failures
                            )));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Invokes a caller-provided `Pull(src, dst)` to copy each entity's remote
/// output directory to the host result directory, then emits
/// `EntityCopyEnd`. Always last in the chain since it can block `RunEnd`.
pub struct CopyOutputHandler {
    pull: Box<dyn FnMut(&str) -> std::io::Result<()> + Send>,
    pending: Vec<SmolStr>,
    completed: Vec<SmolStr>,
}

impl std::fmt::Debug for CopyOutputHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOutputHandler")
            .field("pending", &self.pending)
            .finish()
    }
}

impl CopyOutputHandler {
    /// `pull` copies one entity's remote output directory given its name;
    /// the destination path is the caller's concern (closed over).
    pub fn new(pull: impl FnMut(&str) -> std::io::Result<()> + Send + 'static) -> Self {
        Self {
            pull: Box::new(pull),
            pending: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// Entities whose copy has been queued but not yet completed.
    pub fn pending(&self) -> &[SmolStr] {
        &self.pending
    }
}

impl Handler for CopyOutputHandler {
    fn name(&self) -> &'static str {
        "copy-output"
    }

    fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        if let Event::EntityEnd { name, .. } = event {
            self.pending.push(name.clone());
            if let Err(error) = (self.pull)(name.as_str()) {
                warn!("failed to copy output for {name}: {error}");
            }
            self.pending.retain(|n| n != name);
            self.completed.push(name.clone());
        }
        Ok(())
    }

    fn take_followups(&mut self) -> Vec<Event> {
        self.completed
            .drain(..)
            .map(|name| Event::EntityCopyEnd { name })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_output_emits_entity_copy_end_after_each_entity_end() {
        let mut handler = CopyOutputHandler::new(|_name| Ok(()));
        handler
            .handle(&Event::EntityEnd {
                name: "pkg.T1".into(),
                kind: EntityKind::Test,
                skip_reasons: Vec::new(),
                synthesized: false,
            })
            .unwrap();
        let followups = handler.take_followups();
        assert_eq!(
            followups,
            vec![Event::EntityCopyEnd {
                name: "pkg.T1".into()
            }]
        );
        assert!(handler.take_followups().is_empty());
    }

    #[test]
    fn copy_output_still_emits_entity_copy_end_when_pull_fails() {
        let mut handler =
            CopyOutputHandler::new(|_name| Err(std::io::Error::other("pull failed")));
        handler
            .handle(&Event::EntityEnd {
                name: "pkg.T1".into(),
                kind: EntityKind::Test,
                skip_reasons: Vec::new(),
                synthesized: false,
            })
            .unwrap();
        assert_eq!(handler.take_followups().len(), 1);
    }
}
