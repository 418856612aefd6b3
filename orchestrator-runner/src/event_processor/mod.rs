// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciles a runner's raw event stream and fans it out to the fixed
//! handler chain: logging, timing, results, streamed-results, fail-fast,
//! copy-output, in that order.

mod events;
mod handlers;
mod preprocessor;

pub use events::{EntityCondition, Event};
pub use handlers::{
    CopyOutputHandler, FailFastHandler, Handler, LoggingHandler, ResultsHandler,
    StreamedResultsHandler, TimingHandler,
};
pub use preprocessor::Preprocessor;

use crate::errors::EventProcessorError;

/// Owns the preprocessor and the ordered handler chain for one runner
/// stream.
pub struct EventProcessor {
    preprocessor: Preprocessor,
    handlers: Vec<Box<dyn Handler>>,
}

impl EventProcessor {
    /// Builds a processor with the given handlers, which must already be in
    /// the required order (logging, timing, results, streamed-results,
    /// fail-fast, copy-output).
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self {
            preprocessor: Preprocessor::new(),
            handlers,
        }
    }

    /// Feeds one raw event through the preprocessor, then the full handler
    /// chain. Stops dispatching to later handlers as soon as one returns a
    /// fatal error, and propagates it to the caller; earlier handlers in the
    /// chain have already observed the event and are unaffected.
    pub fn process(&mut self, raw: Event) -> Result<(), EventProcessorError> {
        for event in self.preprocessor.process(raw)? {
            self.dispatch(&event)?;
        }
        Ok(())
    }

    /// Call when the raw stream has ended. Dispatches any synthesized
    /// crash-recovery events through the chain before the caller emits
    /// `RunEnd`.
    pub fn finish(mut self) -> Result<(), EventProcessorError> {
        let synthesized = self.preprocessor.finish();
        for event in synthesized {
            self.dispatch(&event)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &Event) -> Result<(), EventProcessorError> {
        for handler in &mut self.handlers {
            if let Err(error) = handler.handle(event) {
                tracing::warn!(handler = handler.name(), %error, "handler chain stopped");
                return Err(error);
            }
        }
        let followups: Vec<Event> = self
            .handlers
            .iter_mut()
            .flat_map(|handler| handler.take_followups())
            .collect();
        for followup in followups {
            self.dispatch(&followup)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_metadata::EntityKind;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct RecordingHandler(Arc<Mutex<Vec<Event>>>);

    impl Handler for RecordingHandler {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn handle(&mut self, event: &Event) -> Result<(), EventProcessorError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn copy_output_followups_reach_handlers_after_it_in_the_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut processor = EventProcessor::new(vec![
            Box::new(CopyOutputHandler::new(|_name| Ok(()))),
            Box::new(RecordingHandler(Arc::clone(&seen))),
        ]);

        processor.process(Event::RunStart).unwrap();
        processor
            .process(Event::EntityStart {
                name: "pkg.T1".into(),
                kind: EntityKind::Test,
            })
            .unwrap();
        processor
            .process(Event::EntityEnd {
                name: "pkg.T1".into(),
                kind: EntityKind::Test,
                skip_reasons: Vec::new(),
                synthesized: false,
            })
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&Event::EntityCopyEnd {
            name: "pkg.T1".into()
        }));
    }
}
