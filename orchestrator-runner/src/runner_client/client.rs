// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives the `RunTests` duplex stream to one runner subprocess.
//!
//! `RunTests` is modeled as two cooperating tasks, a reader and a writer,
//! each selecting on a shared cancellation signal alongside their own I/O so
//! that cancelling a run doesn't require either task to poll a separate
//! "am I cancelled" checkpoint: the context is just another branch of the
//! same `select!`.

use crate::errors::RunnerClientError;
use crate::runner_client::protocol::{ClientToRunner, Codec, RunnerToClient};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long the client waits for the subprocess to exit after closing the
/// send direction, before giving up on a clean shutdown.
pub const CANCELLATION_GRACE: Duration = Duration::from_secs(10);

/// A live `RunTests` stream: events arrive on `events`, stack-operation
/// responses go out via [`RunTestsHandle::respond`].
pub struct RunTestsHandle {
    /// Reconciled-by-nobody-yet raw events from the runner; feed these
    /// through an `EventProcessor`.
    pub events: mpsc::UnboundedReceiver<RunnerToClient>,
    responses_tx: mpsc::UnboundedSender<ClientToRunner>,
    cancel_tx: watch::Sender<bool>,
    reader_task: JoinHandle<Result<(), RunnerClientError>>,
    writer_task: JoinHandle<Result<(), RunnerClientError>>,
}

impl RunTestsHandle {
    /// Sends a `StackOperationResponse` (or any other client-to-runner
    /// message) to the runner.
    pub fn respond(&self, message: ClientToRunner) -> Result<(), RunnerClientError> {
        self.responses_tx.send(message).map_err(|_| {
            RunnerClientError::StreamClosed("stack operation response")
        })
    }

    /// Signals cancellation: the writer closes the send direction and the
    /// reader stops waiting for further messages. Await [`Self::join`]
    /// afterward to wait (up to the grace period) for both tasks to finish.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Waits for both the reader and writer tasks to finish, up to
    /// [`CANCELLATION_GRACE`]. Returns the first error either reports.
    ///
    /// Drops the response sender before waiting, so the writer task's
    /// outbound channel closes even if the caller never called
    /// [`Self::cancel`] explicitly (the reader having seen `RunEnd` or an
    /// EOF is itself a reason to stop writing).
    pub async fn join(self) -> Result<(), RunnerClientError> {
        let RunTestsHandle {
            responses_tx,
            reader_task,
            writer_task,
            ..
        } = self;
        drop(responses_tx);

        let joined = tokio::time::timeout(CANCELLATION_GRACE, async {
            let (reader_result, writer_result) = tokio::join!(reader_task, writer_task);
            reader_result
                .map_err(|e| RunnerClientError::Transport(e.to_string()))?
                .and(writer_result.map_err(|e| RunnerClientError::Transport(e.to_string()))?)
        })
        .await;
        match joined {
            Ok(result) => result,
            Err(_) => Err(RunnerClientError::Timeout(CANCELLATION_GRACE)),
        }
    }
}

/// Begins a `RunTests` call: sends the `RunTestsInit` message, then spawns
/// the reader and writer tasks. `heartbeat_timeout` bounds how long the
/// reader waits between messages of any kind before declaring the stream
/// dead.
pub fn run_tests<R, W>(
    mut reader: R,
    mut writer: W,
    init: ClientToRunner,
    heartbeat_timeout: Duration,
) -> RunTestsHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<RunnerToClient>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientToRunner>();
    let (cancel_tx, mut cancel_for_reader) = watch::channel(false);
    let mut cancel_for_writer = cancel_for_reader.clone();

    let _ = outbound_tx.send(init);

    let reader_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = cancel_for_reader.changed() => {
                    if changed.is_err() || *cancel_for_reader.borrow() {
                        break;
                    }
                }
                outcome = tokio::time::timeout(
                    heartbeat_timeout,
                    Codec::read_frame::<RunnerToClient, _>(&mut reader),
                ) => {
                    match outcome {
                        Ok(Ok(Some(RunnerToClient::Heartbeat))) => continue,
                        Ok(Ok(Some(message))) => {
                            if inbound_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Ok(Ok(None)) => break,
                        Ok(Err(error)) => return Err(error),
                        Err(_) => return Err(RunnerClientError::Timeout(heartbeat_timeout)),
                    }
                }
            }
        }
        Ok(())
    });

    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = cancel_for_writer.changed() => {
                    if changed.is_err() || *cancel_for_writer.borrow() {
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
                maybe_message = outbound_rx.recv() => {
                    match maybe_message {
                        Some(message) => Codec::write_frame(&mut writer, &message).await?,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    });

    RunTestsHandle {
        events: inbound_rx,
        responses_tx: outbound_tx,
        cancel_tx,
        reader_task,
        writer_task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner_client::protocol::RunnerToClient;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reader_forwards_messages_and_stops_on_run_end() {
        let (client_side, mut runner_side) = duplex(4096);
        let (reader, writer) = tokio::io::split(client_side);

        let mut handle = run_tests(
            reader,
            writer,
            ClientToRunner::RunTestsInit {
                run_config_json: "{}".to_string(),
                debug_port: None,
            },
            Duration::from_secs(5),
        );

        // Drain the init message the writer task just sent.
        let _init: ClientToRunner = Codec::read_frame(&mut runner_side).await.unwrap().unwrap();

        Codec::write_frame(&mut runner_side, &RunnerToClient::RunStart)
            .await
            .unwrap();
        Codec::write_frame(&mut runner_side, &RunnerToClient::RunEnd)
            .await
            .unwrap();
        drop(runner_side);

        let first = handle.events.recv().await.unwrap();
        assert!(matches!(first, RunnerToClient::RunStart));
        let second = handle.events.recv().await.unwrap();
        assert!(matches!(second, RunnerToClient::RunEnd));
        assert!(handle.events.recv().await.is_none());

        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_shuts_down_the_write_half_promptly() {
        let (client_side, _runner_side) = duplex(4096);
        let (reader, writer) = tokio::io::split(client_side);

        let handle = run_tests(
            reader,
            writer,
            ClientToRunner::RunTestsInit {
                run_config_json: "{}".to_string(),
                debug_port: None,
            },
            Duration::from_secs(30),
        );
        handle.cancel();
        handle.join().await.unwrap();
    }
}
