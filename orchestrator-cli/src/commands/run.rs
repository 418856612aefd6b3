// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `orchestrator run`: validates the run configuration, dials the remote
//! bundle, plans the selected tests against the fixture stack, drives the
//! `RunTests` stream through the handler chain, and writes `timing.json`
//! before recreating the "latest" symlink (§4, §5, §9).
//!
//! Only the remote (host-subprocess) bundle has a working transport today;
//! [`crate::connection::LocalBundleFactory`] always fails to dial, so a run
//! that also names a `--local-target` fails fast with a clear dial error
//! rather than attempting to merge two runner streams that `Event` (which
//! carries no source tag) has no way to reconcile.

use crate::cli::RunArgs;
use crate::connection::RemoteBundleFactory;
use crate::errors::ExpectedError;
use crate::shared_handler::Shared;
use orchestrator_metadata::{BundleRole, EntityKind, EntitySummary, OrchestratorExitCode};
use orchestrator_runner::config::FeatureSet;
use orchestrator_runner::driver::{ConnectionFactory, Driver, DriverConfig, TargetConfig};
use orchestrator_runner::event_processor::{
    CopyOutputHandler, EventProcessor, FailFastHandler, Handler, LoggingHandler, ResultsHandler,
    StreamedResultsHandler, TimingHandler,
};
use orchestrator_runner::fixture_stack::CombinedFixtureStack;
use orchestrator_runner::list::list_tests;
use orchestrator_runner::partition::PartitionerBuilder;
use orchestrator_runner::planner::{Planner, RetryQueue};
use orchestrator_runner::runner_client::{run_tests, ClientToRunner, RunnerToClient};
use serde::Serialize;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What the remote bundle's `RunTestsInit` carries: the matched test names
/// and the feature set the skip-check already applied, so the bundle
/// replays the same selection rather than re-deriving it independently.
#[derive(Serialize)]
struct RunRequest {
    tests: Vec<SmolStr>,
    features: FeatureSet,
}

pub async fn run(args: RunArgs) -> Result<i32, ExpectedError> {
    let Some(remote_bundle) = &args.bundles.remote_bundle else {
        return Err(ExpectedError::dial_failed(
            "remote",
            "no --remote-bundle executable was given",
        ));
    };
    if let Some(local_target) = &args.bundles.local_target {
        crate::connection::LocalBundleFactory
            .dial(local_target)
            .await
            .map_err(|reason| ExpectedError::dial_failed(local_target.clone(), reason))?;
    }

    let result_dir_is_default = args.result_dir.is_none();
    let result_dir = args.result_dir.clone().unwrap_or_else(|| {
        args.bundles
            .workspace_root
            .join("orchestrator-results")
            .join(chrono::Local::now().format("%Y%m%dT%H%M%S").to_string())
    });

    let features = FeatureSet {
        software_available: args.software_available.iter().cloned().collect(),
        hardware_tags: args.hardware_tags.iter().cloned().collect(),
        ..FeatureSet::default()
    };

    let shard = match (args.shard_index, args.shard_total) {
        (Some(index), Some(total)) => Some(PartitionerBuilder::Hash {
            shard: index + 1,
            total_shards: total,
        }),
        _ => None,
    };

    let driver_config = DriverConfig {
        workspace_root: args.bundles.workspace_root.clone(),
        key_material: None,
        result_dir,
        result_dir_is_default,
        config_file: args.config_file.clone(),
        profile_name: args.profile.clone(),
        targets: vec![TargetConfig {
            name: "remote".to_string(),
            connection_spec: remote_bundle.to_string(),
        }],
        features,
        shard,
    };

    let driver = Driver::new(&driver_config)?;
    let mut cancellation = driver
        .install_cancellation()
        .map_err(|err| ExpectedError::dial_failed("signal-handler", err.to_string()))?;

    let connection = RemoteBundleFactory
        .dial(remote_bundle.as_str())
        .await
        .map_err(|reason| ExpectedError::dial_failed(remote_bundle.to_string(), reason))?;

    let entities_response = connection
        .request(ClientToRunner::ListEntitiesRequest { request_id: 0 })
        .await?;
    let RunnerToClient::ListEntitiesResponse { entities, .. } = entities_response else {
        return Err(ExpectedError::dial_failed(
            remote_bundle.to_string(),
            "expected ListEntitiesResponse from ListEntitiesRequest",
        ));
    };

    let registry: BTreeMap<SmolStr, EntitySummary> =
        entities.into_iter().map(|e| (e.name.clone(), e)).collect();
    let fixtures: BTreeMap<SmolStr, EntitySummary> = registry
        .iter()
        .filter(|(_, e)| e.kind == EntityKind::Fixture)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let patterns = if args.patterns.is_empty() {
        vec!["*".to_string()]
    } else {
        args.patterns.clone()
    };
    let pattern = orchestrator_filtering::EntityPattern::parse(&patterns)
        .map_err(orchestrator_runner::errors::DriverConfigError::from)?;
    let tests = list_tests(&registry, &pattern);

    if tests.is_empty() {
        driver.finish();
        return Ok(OrchestratorExitCode::NO_TESTS_RUN);
    }

    let planner = Planner::new(
        fixtures.clone(),
        driver_config.features.clone(),
        driver_config.shard.clone(),
    );
    let plan = planner.plan(&tests);

    let mut stack = CombinedFixtureStack::build(&BTreeMap::new(), &fixtures)
        .map_err(|e| ExpectedError::dial_failed(remote_bundle.to_string(), e.to_string()))?;
    // Bookkeeping only: the remote bundle drives its own transitions as it
    // executes each test; resolving the same ordering here keeps
    // `timing.json` and the retry queue in step with what the bundle
    // reports over the wire.
    let _ = orchestrator_runner::driver::resolve_plan(&plan, &mut stack);

    let request = RunRequest {
        tests: plan.runs().map(|(name, _)| name.clone()).collect(),
        features: driver_config.features.clone(),
    };
    let run_config_json = serde_json::to_string(&request)
        .map_err(|err| ExpectedError::RunConfigJsonError { err })?;

    let timeout = args
        .per_message_timeout
        .unwrap_or(driver.config.profile.per_message_timeout);
    let max_test_failures = args
        .max_test_failures
        .or(driver.config.profile.max_test_failures);

    let reader = connection.take_reader().await;
    let writer = connection.take_writer().await;
    let handle = run_tests(
        reader,
        writer,
        ClientToRunner::RunTestsInit {
            run_config_json,
            debug_port: None,
        },
        timeout,
    );

    let timing = Shared::new(TimingHandler::new());
    let timing_handle = timing.handle_ref();
    let results = Shared::new(ResultsHandler::new());
    let results_handle = results.handle_ref();
    let fail_fast = Shared::new(FailFastHandler::new(max_test_failures));
    let fail_fast_handle = fail_fast.handle_ref();
    let handlers: Vec<Box<dyn Handler>> = vec![
        Box::new(LoggingHandler),
        Box::new(timing),
        Box::new(results),
        Box::new(
            StreamedResultsHandler::open(driver.result_dir.root()).map_err(|err| {
                ExpectedError::ResultWriteError {
                    what: "streamed_results.jsonl",
                    err,
                }
            })?,
        ),
        Box::new(fail_fast),
        // The remote bundle already runs as a host subprocess sharing this
        // machine's filesystem, so there is nothing to copy in over the
        // wire; the pull closure is a no-op reserved for a future transport
        // whose output genuinely lives on another machine.
        Box::new(CopyOutputHandler::new(|_name| Ok(()))),
    ];
    let processor = Arc::new(Mutex::new(EventProcessor::new(handlers)));
    let retry = Arc::new(Mutex::new(RetryQueue::new()));
    let stack = Arc::new(Mutex::new(stack));

    let pump_task = tokio::spawn(orchestrator_runner::driver::pump_stream(
        handle,
        BundleRole::Remote,
        Arc::clone(&stack),
        Arc::clone(&processor),
        Arc::clone(&retry),
    ));

    let mut cancelled = tokio::select! {
        reason = cancellation.cancelled() => {
            tracing::warn!(?reason, "cancelling run: aborting the in-flight runner stream");
            pump_task.abort();
            let _ = connection.wait().await;
            true
        }
        outcome = pump_task => {
            outcome.map_err(|e| ExpectedError::dial_failed(remote_bundle.to_string(), e.to_string()))??;
            false
        }
    };

    // A crashed runner leaves its in-flight tests in the retry queue rather
    // than failing them outright (§4.4); drive one more pass over whatever
    // made it in before giving up on them for good.
    if !cancelled {
        let retried: Vec<SmolStr> = retry.lock().await.drain();
        if !retried.is_empty() {
            tracing::warn!(count = retried.len(), "retrying tests after runner crash");
            let retry_connection = RemoteBundleFactory
                .dial(remote_bundle.as_str())
                .await
                .map_err(|reason| ExpectedError::dial_failed(remote_bundle.to_string(), reason))?;

            let retry_request = RunRequest {
                tests: retried,
                features: driver_config.features.clone(),
            };
            let retry_config_json = serde_json::to_string(&retry_request)
                .map_err(|err| ExpectedError::RunConfigJsonError { err })?;

            let retry_reader = retry_connection.take_reader().await;
            let retry_writer = retry_connection.take_writer().await;
            let retry_handle = run_tests(
                retry_reader,
                retry_writer,
                ClientToRunner::RunTestsInit {
                    run_config_json: retry_config_json,
                    debug_port: None,
                },
                timeout,
            );

            let retry_task = tokio::spawn(orchestrator_runner::driver::pump_stream(
                retry_handle,
                BundleRole::Remote,
                Arc::clone(&stack),
                Arc::clone(&processor),
                Arc::clone(&retry),
            ));
            cancelled = tokio::select! {
                reason = cancellation.cancelled() => {
                    tracing::warn!(?reason, "cancelling run: aborting the retry pass");
                    retry_task.abort();
                    let _ = retry_connection.wait().await;
                    true
                }
                outcome = retry_task => {
                    outcome.map_err(|e| ExpectedError::dial_failed(remote_bundle.to_string(), e.to_string()))??;
                    false
                }
            };
        }
    }
    cancellation.abort();

    if let Ok(processor) = Arc::try_unwrap(processor) {
        let processor = processor.into_inner();
        processor.finish()?;
    }

    let timing_json = serde_json::to_string_pretty(
        &timing_handle
            .lock()
            .expect("timing mutex poisoned")
            .spans()
            .iter()
            .map(|(name, duration)| (name.to_string(), duration.as_millis()))
            .collect::<BTreeMap<String, u128>>(),
    )
    .map_err(|err| ExpectedError::RunConfigJsonError { err })?;
    driver
        .result_dir
        .write_timing_json(&timing_json)
        .map_err(|err| ExpectedError::ResultWriteError {
            what: "timing.json",
            err,
        })?;

    driver.finish();

    if cancelled {
        return Ok(OrchestratorExitCode::EXECUTION_FAILED);
    }

    let records = results_handle.lock().expect("results mutex poisoned").records();
    let any_test_failed = records
        .iter()
        .any(|r| r.kind == EntityKind::Test && !r.passed() && !r.skipped());
    let fail_fast_tripped = fail_fast_handle
        .lock()
        .expect("fail-fast mutex poisoned")
        .failures()
        > 0
        && max_test_failures.is_some();

    if args.fail_for_tests && any_test_failed {
        return Ok(OrchestratorExitCode::TESTS_FAILED);
    }
    if fail_fast_tripped {
        return Ok(OrchestratorExitCode::EXECUTION_FAILED);
    }
    Ok(OrchestratorExitCode::OK)
}
