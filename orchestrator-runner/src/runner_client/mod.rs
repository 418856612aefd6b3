// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The duplex streaming client that drives one runner subprocess through
//! `RunTests`, plus the wire schema it speaks.

mod client;
mod protocol;

pub use client::{run_tests, RunTestsHandle, CANCELLATION_GRACE};
pub use protocol::{
    ClientToRunner, Codec, RunnerToClient, StackOperationKind, WireFixtureValue,
};
