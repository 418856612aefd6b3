// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Installs a file-backed `tracing-subscriber` layer that writes every
//! span-scoped log line to `full.txt` in the result directory, alongside
//! the colorized stderr layer [`crate::output::Color::init`] installs.
//! Timing data is written separately by [`super::result_dir`] from the
//! [`crate::event_processor::TimingHandler`] snapshot, not through tracing.

use camino::Utf8Path;
use std::fs::File;
use std::io;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Adds a plain-text file layer writing to `full.txt` under `result_dir` on
/// top of whatever layer(s) are already registered, so both the terminal
/// and the durable log see the same events.
///
/// Must be called at most once per process, and only after
/// [`crate::output::Color::init`] if both are in use, since
/// `tracing_subscriber::registry().with(...).init()` replaces any
/// previously-installed global subscriber rather than extending it.
pub fn install_full_text_log(result_dir: &Utf8Path) -> io::Result<()> {
    let file = File::create(result_dir.join("full.txt"))?;
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(move || file.try_clone().expect("full.txt handle clone"));

    tracing_subscriber::registry().with(layer).try_init().map_err(|error| {
        io::Error::other(format!("full-text log layer already installed: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn full_text_log_file_is_created() {
        let dir = Utf8TempDir::new().unwrap();
        // try_init fails harmlessly if another test already installed a
        // global subscriber in this process; we only assert the file side
        // effect, which happens before that call.
        let _ = install_full_text_log(dir.path());
        assert!(dir.path().join("full.txt").exists());
    }
}
