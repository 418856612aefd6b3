// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixture stack: a state machine tracking composed setup/teardown
//! contexts, spanning the boundary between the local and remote bundles.

mod stack;
mod status;
mod value;

pub use stack::{
    counterpart, resolve_path, CombinedFixtureStack, FixtureStack, TaggedFixture, Transition,
};
pub use status::Status;
pub use value::{FixtureValue, SetupPayload};
