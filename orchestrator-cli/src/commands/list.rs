// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `orchestrator list`: dials the configured bundle(s), asks each for its
//! entity registry, and prints the match-first-filtered result either as a
//! human-readable table or as the `list -json` document (§4.1, §6).

use crate::cli::ListArgs;
use crate::connection::RemoteBundleFactory;
use crate::errors::ExpectedError;
use orchestrator_metadata::{BundleSummary, EntityListSummary, EntitySummary};
use orchestrator_runner::driver::ConnectionFactory;
use orchestrator_runner::list::{list_fixtures, list_tests};
use orchestrator_runner::runner_client::ClientToRunner;
use smol_str::SmolStr;
use std::collections::BTreeMap;

pub async fn run(args: ListArgs) -> Result<i32, ExpectedError> {
    let Some(remote_bundle) = &args.bundles.remote_bundle else {
        return Err(ExpectedError::dial_failed(
            "remote",
            "no --remote-bundle executable was given",
        ));
    };
    if let Some(local_target) = &args.bundles.local_target {
        // Dialing a local target always fails today (see
        // `crate::connection::LocalBundleFactory`); surface that up front
        // rather than after the remote bundle has already been listed.
        crate::connection::LocalBundleFactory
            .dial(local_target)
            .await
            .map_err(|reason| ExpectedError::dial_failed(local_target.clone(), reason))?;
    }

    let connection = RemoteBundleFactory
        .dial(remote_bundle.as_str())
        .await
        .map_err(|reason| ExpectedError::dial_failed(remote_bundle.to_string(), reason))?;

    let response = connection
        .request(ClientToRunner::ListEntitiesRequest { request_id: 0 })
        .await?;
    let entities = match response {
        orchestrator_runner::runner_client::RunnerToClient::ListEntitiesResponse {
            entities,
            ..
        } => entities,
        other => {
            return Err(ExpectedError::dial_failed(
                remote_bundle.to_string(),
                format!("expected ListEntitiesResponse, got {other:?}"),
            ))
        }
    };

    let registry: BTreeMap<SmolStr, EntitySummary> = entities
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect();

    let patterns = if args.patterns.is_empty() {
        vec!["*".to_string()]
    } else {
        args.patterns.clone()
    };
    let pattern = orchestrator_filtering::EntityPattern::parse(&patterns)
        .map_err(orchestrator_runner::errors::DriverConfigError::from)?;

    let tests = list_tests(&registry, &pattern);
    let fixtures = list_fixtures(&registry);

    if args.json {
        let mut bundles: BTreeMap<SmolStr, BundleSummary> = BTreeMap::new();
        for entity in tests.iter().chain(fixtures.iter()) {
            let bundle = bundles
                .entry(entity.bundle_name.clone())
                .or_insert_with(|| BundleSummary {
                    name: entity.bundle_name.clone(),
                    role: orchestrator_metadata::BundleRole::Remote,
                    binary_path: remote_bundle.clone(),
                    entities: BTreeMap::new(),
                });
            bundle
                .entities
                .insert(entity.name.clone(), entity.clone());
        }
        let summary = EntityListSummary {
            test_count: tests.len(),
            entity_count: tests.len() + fixtures.len(),
            bundles,
        };
        let json = summary.to_json_pretty()?;
        println!("{json}");
    } else {
        for entity in &tests {
            println!("{} [{}]", entity.name, entity.bundle_name);
        }
        for entity in &fixtures {
            println!("{} [{}] (fixture)", entity.name, entity.bundle_name);
        }
    }

    if tests.is_empty() {
        return Ok(orchestrator_metadata::OrchestratorExitCode::NO_TESTS_RUN);
    }
    Ok(orchestrator_metadata::OrchestratorExitCode::OK)
}
