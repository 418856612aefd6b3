// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caches one live connection per configured target, keyed by connection-spec
//! string, so repeated `list`/`run` invocations within a single process reuse
//! the same SSH-backed pipe (or direct subprocess, for the host/remote
//! bundle) instead of redialing.
//!
//! The actual transport (SSH session, subprocess spawn) is an external
//! collaborator — this module only owns the cache's initialize-once
//! semantics, via a per-entry mutex so two concurrent callers asking for the
//! same target don't race to dial it twice.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Dials a connection for one target. Implemented outside this crate: the
/// real implementation opens an SSH session to a DUT or spawns the host
/// runner subprocess directly.
pub trait ConnectionFactory: Send + Sync {
    /// The connection type this factory produces.
    type Connection: Send + Sync;

    /// Dials `spec`, returning an error description on failure.
    fn dial(&self, spec: &str) -> impl Future<Output = Result<Self::Connection, String>> + Send;
}

/// Per-entry-mutex cache of live connections, keyed by connection-spec
/// string. Reused across `list`/`run` passes within one Driver invocation;
/// every entry is dropped (closing its connection) when the cache is
/// dropped.
pub struct ConnectionCache<C> {
    entries: Mutex<BTreeMap<String, Arc<Mutex<Option<Arc<C>>>>>>,
}

impl<C> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<C: Send + Sync> ConnectionCache<C> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached connection for `spec`, dialing one through
    /// `factory` if this is the first request for that spec. Concurrent
    /// callers for the same spec block on the same dial rather than racing.
    pub async fn get_or_dial<F>(
        &self,
        spec: &str,
        factory: &F,
    ) -> Result<Arc<C>, String>
    where
        F: ConnectionFactory<Connection = C>,
    {
        let slot = {
            let mut entries = self.entries.lock().await;
            Arc::clone(
                entries
                    .entry(spec.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        let mut guard = slot.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(Arc::clone(connection));
        }
        let connection = Arc::new(factory.dial(spec).await?);
        *guard = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Drops every cached connection, as the Driver does on shutdown.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        dials: AtomicUsize,
    }

    impl ConnectionFactory for CountingFactory {
        type Connection = usize;

        async fn dial(&self, _spec: &str) -> Result<usize, String> {
            Ok(self.dials.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn repeated_requests_for_the_same_spec_dial_once() {
        let cache = ConnectionCache::new();
        let factory = CountingFactory {
            dials: AtomicUsize::new(0),
        };
        let first = cache.get_or_dial("dut-1", &factory).await.unwrap();
        let second = cache.get_or_dial("dut-1", &factory).await.unwrap();
        assert_eq!(*first, *second);
        assert_eq!(factory.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_specs_dial_independently() {
        let cache = ConnectionCache::new();
        let factory = CountingFactory {
            dials: AtomicUsize::new(0),
        };
        cache.get_or_dial("dut-1", &factory).await.unwrap();
        cache.get_or_dial("dut-2", &factory).await.unwrap();
        assert_eq!(factory.dials.load(Ordering::SeqCst), 2);
    }
}
