// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for orchestrator CLI failures.
///
/// Per the invocation surface: 0 means all entities executed (regardless of
/// pass/fail, unless `-failfortests` was set), 1 means an execution-level
/// failure, and usage errors use a distinct nonzero code. Unexpected panics
/// or unclassified errors fall back to [`Self::EXECUTION_FAILED`].
pub enum OrchestratorExitCode {}

impl OrchestratorExitCode {
    /// No errors occurred and the run exited normally.
    pub const OK: i32 = 0;

    /// An execution-level failure: a broken transport, a protocol error,
    /// or a fatal control error raised by a handler (e.g. fail-fast).
    pub const EXECUTION_FAILED: i32 = 1;

    /// Invalid command-line arguments, an invalid run configuration, or any
    /// other configuration error surfaced synchronously at Driver startup.
    pub const USAGE_ERROR: i32 = 2;

    /// One or more tests failed and `-failfortests` was set.
    pub const TESTS_FAILED: i32 = 100;

    /// No tests were selected to run (all filtered out), but no other
    /// errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;
}
