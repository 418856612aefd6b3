// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection factories the binary wires into
//! [`orchestrator_runner::driver::ConnectionCache`].
//!
//! The remote bundle is launched as a direct subprocess and speaks the same
//! length-prefixed JSON framing described in `orchestrator_runner::runner_client`
//! over its stdin/stdout. The local (device-under-test) bundle is reached over
//! an SSH-backed transport; that transport is an external collaborator this
//! crate does not implement, so dialing a local target currently fails with a
//! clear, actionable error rather than silently no-opping.

use orchestrator_runner::driver::ConnectionFactory;
use orchestrator_runner::runner_client::{ClientToRunner, Codec, RunnerToClient};
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// A live connection to a runner subprocess: its child handle plus the
/// split halves of its stdio pipe, ready to be handed to
/// [`orchestrator_runner::runner_client::run_tests`].
pub struct SubprocessConnection {
    child: tokio::sync::Mutex<Child>,
    reader: tokio::sync::Mutex<Option<ChildStdout>>,
    writer: tokio::sync::Mutex<Option<ChildStdin>>,
}

impl SubprocessConnection {
    /// Takes the reader half, leaving `None` behind. Panics if called twice.
    pub async fn take_reader(&self) -> ChildStdout {
        self.reader
            .lock()
            .await
            .take()
            .expect("subprocess reader already taken")
    }

    /// Takes the writer half, leaving `None` behind. Panics if called twice.
    pub async fn take_writer(&self) -> ChildStdin {
        self.writer
            .lock()
            .await
            .take()
            .expect("subprocess writer already taken")
    }

    /// Sends a one-off request/response pair directly over the connection,
    /// for calls like `ListEntities` that don't go through the `RunTests`
    /// duplex stream.
    pub async fn request(
        &self,
        message: ClientToRunner,
    ) -> Result<RunnerToClient, orchestrator_runner::errors::RunnerClientError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard
            .as_mut()
            .expect("subprocess writer already taken");
        Codec::write_frame(writer, &message).await?;

        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard
            .as_mut()
            .expect("subprocess reader already taken");
        loop {
            match Codec::read_frame::<RunnerToClient, _>(reader).await? {
                Some(RunnerToClient::Heartbeat) => continue,
                Some(response) => return Ok(response),
                None => {
                    return Err(orchestrator_runner::errors::RunnerClientError::StreamClosed(
                        "request/response",
                    ));
                }
            }
        }
    }

    /// Waits for the subprocess to exit, once all stream activity is done.
    pub async fn wait(&self) -> std::io::Result<std::process::ExitStatus> {
        self.child.lock().await.wait().await
    }
}

/// Dials the remote bundle as a direct subprocess. `spec` is the path to the
/// bundle executable.
pub struct RemoteBundleFactory;

impl ConnectionFactory for RemoteBundleFactory {
    type Connection = SubprocessConnection;

    async fn dial(&self, spec: &str) -> Result<Self::Connection, String> {
        let mut child = Command::new(spec)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| format!("failed to spawn remote bundle `{spec}`: {error}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "remote bundle subprocess has no stdin pipe".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "remote bundle subprocess has no stdout pipe".to_string())?;

        Ok(SubprocessConnection {
            child: tokio::sync::Mutex::new(child),
            reader: tokio::sync::Mutex::new(Some(stdout)),
            writer: tokio::sync::Mutex::new(Some(stdin)),
        })
    }
}

/// Dials a local (device-under-test) target over SSH. Not implemented: the
/// SSH-backed transport is an external collaborator, out of scope for this
/// core. Kept as a distinct factory (rather than folding the error into
/// `RemoteBundleFactory`) so a real implementation can be dropped in later
/// without touching call sites.
pub struct LocalBundleFactory;

impl ConnectionFactory for LocalBundleFactory {
    type Connection = SubprocessConnection;

    async fn dial(&self, spec: &str) -> Result<Self::Connection, String> {
        Err(format!(
            "cannot dial local target `{spec}`: SSH-backed device connections are not \
             implemented by this binary; provide an already-reachable remote (subprocess) \
             bundle instead, or integrate a transport before using local targets"
        ))
    }
}

