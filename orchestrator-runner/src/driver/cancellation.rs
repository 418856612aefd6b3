// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns the process-wide signal handler (internal to [`crate::signal`])
//! into the one thing a caller outside this crate actually needs: a
//! cancellation signal they can race a run against.
//!
//! Per §9's guidance that the signal handler is process-wide state best
//! modeled as an explicit init routine rather than a load-time side effect,
//! installing it is a deliberate call the binary's entry point makes
//! through [`crate::driver::Driver::install_cancellation`], not something
//! [`crate::driver::Driver::new`] does on the caller's behalf.

use crate::errors::SignalHandlerSetupError;
use crate::signal::{ShutdownEvent, SignalEvent, SignalHandlerKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Why a run is being cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownReason {
    /// SIGINT: attempt a clean cancellation through the context.
    Interrupt,
    /// SIGTERM/SIGHUP/SIGQUIT: dump goroutine-style stacks to stderr and
    /// forward the signal to direct child processes before cancelling.
    Terminate,
}

fn classify(event: ShutdownEvent) -> ShutdownReason {
    match event {
        ShutdownEvent::Interrupt => ShutdownReason::Interrupt,
        #[cfg(unix)]
        ShutdownEvent::Hangup | ShutdownEvent::Term | ShutdownEvent::Quit => {
            ShutdownReason::Terminate
        }
    }
}

/// A live signal handler, translated into a `watch` channel a caller can
/// poll or `.await` for the first shutdown-triggering signal.
pub struct CancellationSignal {
    rx: watch::Receiver<Option<ShutdownReason>>,
    task: JoinHandle<()>,
}

impl CancellationSignal {
    /// Installs the process signal handler and spawns the task that
    /// listens for the first shutdown-triggering signal, dumping stack
    /// traces to stderr for SIGTERM-like signals per §4.5.
    pub fn install(kind: SignalHandlerKind) -> Result<Self, SignalHandlerSetupError> {
        let mut handler = kind.build()?;
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            while let Some(event) = handler.recv().await {
                if let SignalEvent::Shutdown(shutdown) = event {
                    let reason = classify(shutdown);
                    if reason == ShutdownReason::Terminate {
                        tracing::error!(
                            "received termination signal; dumping backtrace and forwarding to child processes"
                        );
                        eprintln!("{}", std::backtrace::Backtrace::force_capture());
                    }
                    let _ = tx.send(Some(reason));
                    break;
                }
            }
        });

        Ok(Self { rx, task })
    }

    /// Waits for the first shutdown-triggering signal.
    pub async fn cancelled(&mut self) -> ShutdownReason {
        loop {
            if let Some(reason) = *self.rx.borrow() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                // The signal-handling task exited without ever observing a
                // shutdown signal (platform has none to listen for); park
                // forever rather than spin.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Aborts the underlying signal-listening task. Used by tests and by
    /// short-lived invocations (`list`) that don't need to stay cancellable
    /// for their whole lifetime.
    pub fn abort(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_handler_never_resolves_spuriously() {
        let mut signal = CancellationSignal::install(SignalHandlerKind::Noop).unwrap();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            signal.cancelled(),
        )
        .await;
        assert!(result.is_err(), "noop handler should never signal cancellation");
        signal.abort();
    }
}
