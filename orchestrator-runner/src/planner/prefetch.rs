// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolves external data file dependencies ahead of (or immediately
//! before) the test that needs them.
//!
//! A declared data file is resolved one of three ways, checked in order:
//! a `<file>.external-error` sibling short-circuits straight to a
//! [`crate::errors::DependencyError::DataFileMissing`] with the recorded
//! reason; a `<file>.external-link` sibling holds a URL to fetch; otherwise
//! the file is expected to already be present in the data root.

use crate::config::DownloadMode;
use crate::errors::DependencyError;
use camino::{Utf8Path, Utf8PathBuf};
use smol_str::SmolStr;
use std::sync::Arc;

/// One entity's declared dependency on an external data file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExternalFile {
    /// The entity that declared the dependency.
    pub entity: SmolStr,
    /// Path to the file, relative to the data root.
    pub relative_path: Utf8PathBuf,
}

/// Fetches the contents of an `.external-link` URL to a destination path.
/// Implemented outside this module since the transport (HTTP, object
/// storage, etc.) is a deployment concern, not a planning one.
pub trait Fetcher: Send + Sync {
    /// Downloads `link` to `dest`, overwriting any existing file.
    fn fetch(&self, link: &str, dest: &Utf8Path) -> Result<(), String>;
}

/// Resolves [`ExternalFile`]s against a data root, either all at once
/// ([`DownloadMode::Batch`]) or one at a time just before use
/// ([`DownloadMode::Lazy`]).
pub struct DataFilePrefetcher {
    data_root: Utf8PathBuf,
    mode: DownloadMode,
    fetcher: Arc<dyn Fetcher>,
}

impl DataFilePrefetcher {
    /// Creates a prefetcher rooted at `data_root`.
    pub fn new(data_root: Utf8PathBuf, mode: DownloadMode, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            data_root,
            mode,
            fetcher,
        }
    }

    /// The configured download mode.
    pub fn mode(&self) -> DownloadMode {
        self.mode
    }

    /// Resolves every file in `files` up front, in parallel, blocking until
    /// all have either resolved or failed. Intended for
    /// [`DownloadMode::Batch`]; callers in [`DownloadMode::Lazy`] mode
    /// should call [`Self::resolve_one`] per-test instead.
    pub async fn resolve_all(
        &self,
        files: &[ExternalFile],
    ) -> Vec<(ExternalFile, Result<Utf8PathBuf, DependencyError>)> {
        let mut set = tokio::task::JoinSet::new();
        for file in files {
            let data_root = self.data_root.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let file = file.clone();
            set.spawn_blocking(move || {
                let result = resolve_one(&data_root, &fetcher, &file.relative_path);
                (file, result)
            });
        }
        let mut results = Vec::with_capacity(files.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(join_error) => {
                    tracing::warn!("data file prefetch task panicked: {join_error}");
                }
            }
        }
        results
    }

    /// Resolves a single file, for [`DownloadMode::Lazy`] just-in-time use.
    pub fn resolve_one(&self, relative_path: &Utf8Path) -> Result<Utf8PathBuf, DependencyError> {
        resolve_one(&self.data_root, &self.fetcher, relative_path)
    }
}

fn resolve_one(
    data_root: &Utf8Path,
    fetcher: &dyn Fetcher,
    relative_path: &Utf8Path,
) -> Result<Utf8PathBuf, DependencyError> {
    let dest = data_root.join(relative_path);
    let error_sibling = sibling(&dest, ".external-error");
    if error_sibling.exists() {
        let reason = std::fs::read_to_string(&error_sibling)
            .unwrap_or_else(|e| format!("unreadable .external-error sibling: {e}"));
        return Err(DependencyError::DataFileMissing {
            file: relative_path.to_string(),
            reason: reason.trim().to_string(),
        });
    }

    let link_sibling = sibling(&dest, ".external-link");
    if link_sibling.exists() {
        let link = std::fs::read_to_string(&link_sibling).map_err(|e| {
            DependencyError::DataFileMissing {
                file: relative_path.to_string(),
                reason: format!("unreadable .external-link sibling: {e}"),
            }
        })?;
        fetcher
            .fetch(link.trim(), &dest)
            .map_err(|reason| DependencyError::DataFileMissing {
                file: relative_path.to_string(),
                reason,
            })?;
        return Ok(dest);
    }

    if dest.exists() {
        Ok(dest)
    } else {
        Err(DependencyError::DataFileMissing {
            file: relative_path.to_string(),
            reason: "no local file, .external-link, or .external-error sibling found".to_string(),
        })
    }
}

fn sibling(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let mut name = path
        .file_name()
        .map(str::to_string)
        .unwrap_or_default();
    name.push_str(suffix);
    match path.parent() {
        Some(parent) => parent.join(name),
        None => Utf8PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    struct NeverCalled;
    impl Fetcher for NeverCalled {
        fn fetch(&self, _link: &str, _dest: &Utf8Path) -> Result<(), String> {
            panic!("fetch should not have been called")
        }
    }

    struct RecordingFetcher;
    impl Fetcher for RecordingFetcher {
        fn fetch(&self, link: &str, dest: &Utf8Path) -> Result<(), String> {
            std::fs::write(dest, format!("fetched from {link}")).map_err(|e| e.to_string())
        }
    }

    #[test]
    fn already_present_file_resolves_without_fetching() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"hello").unwrap();
        let result = resolve_one(dir.path(), &NeverCalled, Utf8Path::new("data.bin"));
        assert_eq!(result.unwrap(), dir.path().join("data.bin"));
    }

    #[test]
    fn external_error_sibling_short_circuits() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.bin.external-error"), "quota exceeded").unwrap();
        let result = resolve_one(dir.path(), &NeverCalled, Utf8Path::new("data.bin"));
        match result {
            Err(DependencyError::DataFileMissing { reason, .. }) => {
                assert_eq!(reason, "quota exceeded");
            }
            other => panic!("expected DataFileMissing, got {other:?}"),
        }
    }

    #[test]
    fn external_link_sibling_is_fetched() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("data.bin.external-link"),
            "https://example.invalid/data.bin",
        )
        .unwrap();
        let dest = resolve_one(dir.path(), &RecordingFetcher, Utf8Path::new("data.bin")).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest).unwrap(),
            "fetched from https://example.invalid/data.bin"
        );
    }

    #[test]
    fn missing_file_with_no_sibling_is_an_error() {
        let dir = Utf8TempDir::new().unwrap();
        let result = resolve_one(dir.path(), &NeverCalled, Utf8Path::new("data.bin"));
        assert!(matches!(
            result,
            Err(DependencyError::DataFileMissing { .. })
        ));
    }

    #[tokio::test]
    async fn batch_resolve_all_resolves_every_file_concurrently() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"a").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"b").unwrap();
        let prefetcher = DataFilePrefetcher::new(
            dir.path().to_path_buf(),
            DownloadMode::Batch,
            Arc::new(NeverCalled),
        );
        let files = vec![
            ExternalFile {
                entity: "T1".into(),
                relative_path: Utf8PathBuf::from("a.bin"),
            },
            ExternalFile {
                entity: "T2".into(),
                relative_path: Utf8PathBuf::from("b.bin"),
            },
        ];
        let results = prefetcher.resolve_all(&files).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
