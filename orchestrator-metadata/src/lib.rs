// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured, serializable types shared between the orchestrator core and
//! its consumers: entity lists (`list -json`), result records
//! (`streamed_results.jsonl`), and documented process exit codes.
//!
//! This crate holds data only — parsing of dependency predicates and
//! pattern matching live in `orchestrator-filtering`; the state machines that
//! produce and consume these types live in `orchestrator-runner`.

mod entity;
mod errors;
mod exit_codes;
mod result;

pub use entity::*;
pub use errors::*;
pub use exit_codes::*;
pub use result::*;
