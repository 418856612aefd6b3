// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod cli;
mod commands;
mod connection;
mod errors;
mod shared_handler;

use clap::Parser;
use cli::{Cli, Command};
use std::process::ExitCode;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    color_eyre::install().expect("failed to install color-eyre panic hook");
    let _ = enable_ansi_support::enable_ansi_support();

    let cli = Cli::parse();
    cli.color.init();

    let result = match cli.command {
        Command::List(args) => commands::list::run(args).await,
        Command::Run(args) => commands::run::run(args).await,
        Command::Symbolize(args) => commands::symbolize::run(args).await,
    };

    match result {
        Ok(code) => exit_code(code),
        Err(error) => {
            error.display_to_stderr();
            exit_code(error.process_exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
