// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drains one runner's [`RunTestsHandle`], converting `RunnerToClient`
//! frames into [`Event`]s for the shared [`EventProcessor`] and answering
//! `StackOperation` requests against the shared [`CombinedFixtureStack`].
//!
//! Two of these run concurrently, one per side (local/remote), each
//! tagging requests against the stack with its own [`BundleRole`] so a
//! fixture query from the wrong side resolves to
//! [`FixtureStackError::ValueNotReady`] rather than silently reading the
//! other side's state.

use crate::errors::{EventProcessorError, RunnerClientError};
use crate::event_processor::{EventProcessor, Event};
use crate::fixture_stack::{counterpart, CombinedFixtureStack};
use crate::planner::RetryQueue;
use crate::runner_client::{ClientToRunner, RunTestsHandle, RunnerToClient, StackOperationKind};
use orchestrator_metadata::{BundleRole, EntityKind};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::Mutex;

fn to_event(message: RunnerToClient) -> Option<Event> {
    match message {
        RunnerToClient::RunStart => Some(Event::RunStart),
        RunnerToClient::RunEnd => Some(Event::RunEnd),
        RunnerToClient::RunLog { line } => Some(Event::RunLog { line }),
        RunnerToClient::EntityStart { name, kind } => Some(Event::EntityStart { name, kind }),
        RunnerToClient::EntityLog { name, line } => Some(Event::EntityLog { name, line }),
        RunnerToClient::EntityError { name, error } => Some(Event::EntityError { name, error }),
        RunnerToClient::EntityEnd {
            name,
            kind,
            skip_reasons,
        } => Some(Event::EntityEnd {
            name,
            kind,
            skip_reasons,
            synthesized: false,
        }),
        RunnerToClient::Heartbeat | RunnerToClient::StackOperation { .. } => None,
    }
}

/// Answers one `StackOperation` request against the combined stack, from
/// `role`'s point of view. Every operation except `Status`/`Errors` (which
/// read the whole combined stack) acts on the *counterpart* side: `role` is
/// the bundle asking the driver to drive the parent portion of the stack
/// that lives in the other process, since it has no direct way to reach it
/// itself (§4.3).
async fn handle_stack_operation(
    stack: &Mutex<CombinedFixtureStack>,
    role: BundleRole,
    request_id: u64,
    operation: StackOperationKind,
) -> ClientToRunner {
    let other = counterpart(role);
    let mut test_has_error = false;
    let mut fatal_error = None;
    let status = match operation {
        StackOperationKind::Status => {
            let stack = stack.lock().await;
            stack.worst_status().to_string()
        }
        StackOperationKind::SetDirty => {
            let mut stack = stack.lock().await;
            stack.mark_side_dirty(other);
            "ok".to_string()
        }
        StackOperationKind::Reset => {
            let mut stack = stack.lock().await;
            let torn_down = stack.reset_side(other);
            format!("reset {torn_down} fixture(s)")
        }
        StackOperationKind::PreTest { entity_name } => {
            let mut stack = stack.lock().await;
            stack.transition_side_to(other, &entity_name);
            "ok".to_string()
        }
        StackOperationKind::PostTest {
            entity_name,
            has_error,
        } => {
            test_has_error = has_error;
            if has_error {
                let mut stack = stack.lock().await;
                stack.poison(&entity_name);
            }
            "ok".to_string()
        }
        StackOperationKind::Errors => {
            let stack = stack.lock().await;
            if stack.worst_status() == crate::fixture_stack::Status::Red {
                fatal_error = Some("fixture stack is in Red status".to_string());
            }
            "ok".to_string()
        }
    };
    ClientToRunner::StackOperationResponse {
        request_id,
        status,
        test_has_error,
        fatal_error,
    }
}

/// Drains `handle` until the stream ends (cleanly, via `RunEnd`, or via a
/// runner crash), feeding events through `processor` and stack queries
/// against `stack`. Entities still open when the stream ends are requeued
/// for retry via `retry` rather than recorded as hard failures outright.
pub async fn pump_stream(
    mut handle: RunTestsHandle,
    role: BundleRole,
    stack: Arc<Mutex<CombinedFixtureStack>>,
    processor: Arc<Mutex<EventProcessor>>,
    retry: Arc<Mutex<RetryQueue>>,
) -> Result<(), RunnerClientError> {
    let mut in_flight: Vec<(SmolStr, EntityKind)> = Vec::new();

    while let Some(message) = handle.events.recv().await {
        match message {
            RunnerToClient::StackOperation {
                request_id,
                operation,
            } => {
                let response = handle_stack_operation(&stack, role, request_id, operation).await;
                handle.respond(response)?;
                continue;
            }
            RunnerToClient::EntityStart { ref name, kind } => in_flight.push((name.clone(), kind)),
            RunnerToClient::EntityEnd { ref name, .. } => in_flight.retain(|(n, _)| n != name),
            RunnerToClient::EntityError { ref name, .. } => {
                if in_flight
                    .iter()
                    .any(|(n, kind)| n == name && *kind == EntityKind::Fixture)
                {
                    stack.lock().await.poison(name);
                }
            }
            _ => {}
        }

        if let Some(event) = to_event(message) {
            let mut processor = processor.lock().await;
            if let Err(error) = processor.process(event) {
                match error {
                    EventProcessorError::Fatal(_) => return Ok(()),
                    other => tracing::warn!(%other, "event processor rejected event"),
                }
            }
        }
    }

    handle.join().await?;

    if !in_flight.is_empty() {
        let mut retry = retry.lock().await;
        let mut stack_guard = stack.lock().await;
        for (name, kind) in in_flight {
            match kind {
                EntityKind::Test => {
                    if !retry.requeue(name.clone()) {
                        tracing::warn!(%name, "exhausted retry budget after runner crash");
                    }
                }
                EntityKind::Fixture => stack_guard.poison(&name),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_metadata::EntitySummary;
    use std::collections::BTreeMap;

    fn two_sided_stack() -> CombinedFixtureStack {
        let mut remote = BTreeMap::new();
        remote.insert(
            SmolStr::from("remote_root"),
            EntitySummary::new("remote_root", EntityKind::Fixture, "remote_bundle"),
        );
        CombinedFixtureStack::build(&BTreeMap::new(), &remote).unwrap()
    }

    #[tokio::test]
    async fn pre_test_from_local_transitions_the_remote_side() {
        let stack = Mutex::new(two_sided_stack());
        let response = handle_stack_operation(
            &stack,
            BundleRole::Local,
            7,
            StackOperationKind::PreTest {
                entity_name: "remote_root".into(),
            },
        )
        .await;
        match response {
            ClientToRunner::StackOperationResponse { request_id, .. } => {
                assert_eq!(request_id, 7);
            }
            _ => panic!("expected a StackOperationResponse"),
        }
        assert_eq!(
            stack.lock().await.status_of_side(BundleRole::Remote),
            crate::fixture_stack::Status::Green
        );
    }

    #[tokio::test]
    async fn reset_from_local_tears_down_only_the_remote_side() {
        let stack = Mutex::new(two_sided_stack());
        stack
            .lock()
            .await
            .transition_side_to(BundleRole::Remote, "remote_root");

        let response =
            handle_stack_operation(&stack, BundleRole::Local, 1, StackOperationKind::Reset).await;
        match response {
            ClientToRunner::StackOperationResponse { status, .. } => {
                assert_eq!(status, "reset 1 fixture(s)");
            }
            _ => panic!("expected a StackOperationResponse"),
        }
        assert_eq!(
            stack.lock().await.status_of_side(BundleRole::Remote),
            crate::fixture_stack::Status::Red
        );
    }

    #[tokio::test]
    async fn post_test_with_error_poisons_the_counterpart_fixture() {
        let stack = Mutex::new(two_sided_stack());
        stack
            .lock()
            .await
            .transition_side_to(BundleRole::Remote, "remote_root");

        let response = handle_stack_operation(
            &stack,
            BundleRole::Local,
            2,
            StackOperationKind::PostTest {
                entity_name: "remote_root".into(),
                has_error: true,
            },
        )
        .await;
        match response {
            ClientToRunner::StackOperationResponse { test_has_error, .. } => {
                assert!(test_has_error);
            }
            _ => panic!("expected a StackOperationResponse"),
        }
        assert_eq!(
            stack.lock().await.status_of_side(BundleRole::Remote),
            crate::fixture_stack::Status::Red
        );
    }

    #[tokio::test]
    async fn set_dirty_from_remote_marks_the_local_side() {
        let mut local = BTreeMap::new();
        local.insert(
            SmolStr::from("local_root"),
            EntitySummary::new("local_root", EntityKind::Fixture, "local_bundle"),
        );
        let stack = Mutex::new(CombinedFixtureStack::build(&local, &BTreeMap::new()).unwrap());
        stack
            .lock()
            .await
            .transition_side_to(BundleRole::Local, "local_root");

        handle_stack_operation(&stack, BundleRole::Remote, 3, StackOperationKind::SetDirty).await;

        let transition = stack
            .lock()
            .await
            .transition_side_to(BundleRole::Local, "local_root");
        assert_eq!(transition.resets, vec![SmolStr::from("local_root")]);
    }

    #[tokio::test]
    async fn errors_reports_fatal_once_the_stack_is_red() {
        let stack = Mutex::new(two_sided_stack());
        stack.lock().await.poison("remote_root");

        let response =
            handle_stack_operation(&stack, BundleRole::Local, 4, StackOperationKind::Errors).await;
        match response {
            ClientToRunner::StackOperationResponse { fatal_error, .. } => {
                assert!(fatal_error.is_some());
            }
            _ => panic!("expected a StackOperationResponse"),
        }
    }
}
