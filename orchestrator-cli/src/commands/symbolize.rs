// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `orchestrator symbolize`: a thin pass-through to an external symbolizer
//! binary. Crash-dump symbolization is an external collaborator this core
//! does not implement (spec §1's out-of-scope list); this command only
//! locates the configured binary and forwards the crash dump to it.

use crate::cli::SymbolizeArgs;
use crate::errors::ExpectedError;
use camino::Utf8PathBuf;
use tokio::process::Command;

/// Env var fallback for `--symbolizer`, checked when the flag is absent.
const SYMBOLIZER_ENV_VAR: &str = "ORCHESTRATOR_SYMBOLIZER";

pub async fn run(args: SymbolizeArgs) -> Result<i32, ExpectedError> {
    let symbolizer = args
        .symbolizer
        .clone()
        .or_else(|| std::env::var(SYMBOLIZER_ENV_VAR).ok().map(Utf8PathBuf::from))
        .ok_or_else(|| ExpectedError::SymbolizerMissing {
            path: Utf8PathBuf::from("<unset>"),
        })?;

    let status = Command::new(symbolizer.as_str())
        .arg(args.crash_dump.as_str())
        .status()
        .await
        .map_err(|err| ExpectedError::SymbolizerExecFailed { err })?;

    if !status.success() {
        return Err(ExpectedError::SymbolizerExecFailed {
            err: std::io::Error::other(format!(
                "symbolizer `{symbolizer}` exited with {status}"
            )),
        });
    }

    Ok(orchestrator_metadata::OrchestratorExitCode::OK)
}
