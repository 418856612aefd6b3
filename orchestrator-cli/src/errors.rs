// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the `orchestrator` binary itself, as opposed to errors
//! a bundle under test reports. Mirrors the library's error texture: a flat
//! enum, one variant per failure mode, with the exit code and stderr
//! rendering kept next to each other so they can't drift apart.

use camino::Utf8PathBuf;
use orchestrator_metadata::OrchestratorExitCode;
use orchestrator_runner::errors::{DriverConfigError, EventProcessorError, RunnerClientError};
use owo_colors::{OwoColorize, Stream};
use std::error::Error;
use thiserror::Error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// An error the CLI knows how to report cleanly, as opposed to a panic.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("invalid run configuration")]
    DriverConfig {
        #[from]
        err: DriverConfigError,
    },
    #[error("failed to dial target `{target}`")]
    DialFailed { target: String, reason: String },
    #[error("runner client error")]
    RunnerClient {
        #[from]
        err: RunnerClientError,
    },
    #[error("event processor error")]
    EventProcessor {
        #[from]
        err: EventProcessorError,
    },
    #[error("failed to write list output")]
    ListWriteError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to serialize entity list as JSON")]
    ListJsonError {
        #[from]
        err: serde_json::Error,
    },
    #[error("failed to write {what}")]
    ResultWriteError {
        what: &'static str,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to serialize run configuration as JSON")]
    RunConfigJsonError {
        #[source]
        err: serde_json::Error,
    },
    #[error("symbolizer binary `{path}` not configured or not found")]
    SymbolizerMissing { path: Utf8PathBuf },
    #[error("symbolizer exited with a failure")]
    SymbolizerExecFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("run completed with test failures")]
    TestsFailed,
}

impl ExpectedError {
    pub(crate) fn dial_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DialFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// The process exit code for this error, per the documented invocation
    /// surface: usage errors get a distinct code from execution failures.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::DriverConfig { .. } => OrchestratorExitCode::USAGE_ERROR,
            Self::DialFailed { .. }
            | Self::RunnerClient { .. }
            | Self::EventProcessor { .. }
            | Self::ListWriteError { .. }
            | Self::ListJsonError { .. }
            | Self::ResultWriteError { .. }
            | Self::RunConfigJsonError { .. }
            | Self::SymbolizerMissing { .. }
            | Self::SymbolizerExecFailed { .. } => OrchestratorExitCode::EXECUTION_FAILED,
            Self::TestsFailed => OrchestratorExitCode::TESTS_FAILED,
        }
    }

    /// Prints this error, and its source chain, to stderr.
    pub fn display_to_stderr(&self) {
        tracing::error!("{}", self.bold_message());
        let mut source = Error::source(self);
        while let Some(err) = source {
            tracing::error!("  caused by: {err}");
            source = err.source();
        }
    }

    fn bold_message(&self) -> String {
        self.to_string()
            .if_supports_color(Stream::Stderr, |s| s.bold())
            .to_string()
    }
}
