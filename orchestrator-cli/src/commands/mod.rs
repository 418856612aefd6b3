// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One module per subcommand. Each `run` function returns the process exit
//! code on success and an [`crate::errors::ExpectedError`] on any failure
//! the CLI knows how to report cleanly.

pub mod list;
pub mod run;
pub mod symbolize;
