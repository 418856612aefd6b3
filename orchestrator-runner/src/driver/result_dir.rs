// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lays out one run's result directory: a per-entity subdirectory (with a
//! disambiguating suffix on name collision), `streamed_results.jsonl`,
//! `full.txt`, `timing.json`, and a "latest" symlink recreated in the
//! parent directory unless the caller asked for a non-default location.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::io;

/// Owns the directory layout for one invocation's results.
pub struct ResultDirLayout {
    root: Utf8PathBuf,
    is_default_location: bool,
    entity_dirs: BTreeMap<String, Utf8PathBuf>,
}

impl ResultDirLayout {
    /// Creates the result directory (and its parent) if needed.
    /// `is_default_location` controls whether the "latest" symlink is
    /// recreated; a caller-specified nondefault directory leaves it alone.
    pub fn create(root: Utf8PathBuf, is_default_location: bool) -> io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            is_default_location,
            entity_dirs: BTreeMap::new(),
        })
    }

    /// The result directory root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Reserves (and creates) a subdirectory for `entity_name`, appending
    /// `-2`, `-3`, ... on collision with a name already reserved this run.
    pub fn entity_dir(&mut self, entity_name: &str) -> io::Result<Utf8PathBuf> {
        let mut candidate = entity_name.to_string();
        let mut suffix = 1u32;
        while self.entity_dirs.contains_key(&candidate) {
            suffix += 1;
            candidate = format!("{entity_name}-{suffix}");
        }
        let dir = self.root.join(&candidate);
        std::fs::create_dir_all(&dir)?;
        self.entity_dirs.insert(candidate, dir.clone());
        Ok(dir)
    }

    /// Recreates the "latest" symlink in the result root's parent directory
    /// pointing at this run, unless a nondefault directory was requested.
    #[cfg(unix)]
    pub fn update_latest_symlink(&self) -> io::Result<()> {
        if !self.is_default_location {
            return Ok(());
        }
        let Some(parent) = self.root.parent() else {
            return Ok(());
        };
        let link = parent.join("latest");
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&self.root, &link)
    }

    /// Recreates the "latest" symlink in the result root's parent directory
    /// pointing at this run, unless a nondefault directory was requested.
    #[cfg(windows)]
    pub fn update_latest_symlink(&self) -> io::Result<()> {
        if !self.is_default_location {
            return Ok(());
        }
        let Some(parent) = self.root.parent() else {
            return Ok(());
        };
        let link = parent.join("latest");
        let _ = std::fs::remove_dir(&link);
        std::os::windows::fs::symlink_dir(&self.root, &link)
    }

    /// Atomically writes `contents` to `timing.json` (write-then-rename, so
    /// a reader never observes a partially written file).
    pub fn write_timing_json(&self, contents: &str) -> io::Result<()> {
        atomicwrites::AtomicFile::new(
            self.root.join("timing.json"),
            atomicwrites::OverwriteBehavior::AllowOverwrite,
        )
        .write(|f| std::io::Write::write_all(f, contents.as_bytes()))
        .map_err(|error| match error {
            atomicwrites::Error::Internal(e) => e,
            atomicwrites::Error::User(e) => e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn colliding_entity_names_get_disambiguating_suffixes() {
        let dir = Utf8TempDir::new().unwrap();
        let mut layout =
            ResultDirLayout::create(dir.path().join("run"), false).unwrap();
        let first = layout.entity_dir("pkg.TestFoo").unwrap();
        let second = layout.entity_dir("pkg.TestFoo").unwrap();
        assert_ne!(first, second);
        assert!(first.ends_with("pkg.TestFoo"));
        assert!(second.ends_with("pkg.TestFoo-2"));
    }

    #[test]
    fn timing_json_is_written_atomically() {
        let dir = Utf8TempDir::new().unwrap();
        let layout = ResultDirLayout::create(dir.path().join("run"), false).unwrap();
        layout.write_timing_json("{}").unwrap();
        let contents = std::fs::read_to_string(dir.path().join("run/timing.json")).unwrap();
        assert_eq!(contents, "{}");
    }

    #[cfg(unix)]
    #[test]
    fn latest_symlink_is_recreated_for_default_locations() {
        let dir = Utf8TempDir::new().unwrap();
        let layout = ResultDirLayout::create(dir.path().join("run-1"), true).unwrap();
        layout.update_latest_symlink().unwrap();
        let link = dir.path().join("latest");
        assert!(link.is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn nondefault_location_leaves_latest_untouched() {
        let dir = Utf8TempDir::new().unwrap();
        let layout = ResultDirLayout::create(dir.path().join("run-1"), false).unwrap();
        layout.update_latest_symlink().unwrap();
        assert!(!dir.path().join("latest").exists());
    }
}
