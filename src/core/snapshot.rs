//! Immutable project snapshots.
//!
//! A [`ProjectSnapshot`] maps project-relative paths to their source text at
//! one point of a pipeline run. Snapshots are cheap to clone: file contents
//! are shared behind `Arc<str>`, and a commit only replaces the touched files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SmellwrightError};

/// New content for one file produced by a refactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Project-relative path of the rewritten file
    pub path: PathBuf,
    /// Complete new contents
    pub new_source: String,
}

/// The set of `(path -> source)` pairs at a point in the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSnapshot {
    files: BTreeMap<PathBuf, Arc<str>>,
    generation: u64,
}

impl ProjectSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(path, source)` pairs
    pub fn from_files<I, P, S>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: Into<PathBuf>,
        S: Into<Arc<str>>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, source)| (path.into(), source.into()))
                .collect(),
            generation: 0,
        }
    }

    /// Number of commits that led to this snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Source text of a file
    pub fn get(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(AsRef::as_ref)
    }

    /// Shared handle to a file's text
    pub fn get_shared(&self, path: &Path) -> Option<Arc<str>> {
        self.files.get(path).cloned()
    }

    /// True when the snapshot holds `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Paths in deterministic (sorted) order
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    /// Iterate `(path, source)` pairs in path order
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.files.iter().map(|(path, source)| (path, source.as_ref()))
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no files are held
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Produce the successor snapshot with `edits` applied. All edited files
    /// must already exist; either every edit is applied or none is.
    pub fn apply(&self, edits: &[FileEdit]) -> Result<Self> {
        if let Some(missing) = edits.iter().find(|edit| !self.files.contains_key(&edit.path)) {
            return Err(SmellwrightError::validation(format!(
                "Edit targets a file outside the snapshot: {}",
                missing.path.display()
            )));
        }

        let mut files = self.files.clone();
        for edit in edits {
            files.insert(edit.path.clone(), Arc::from(edit.new_source.as_str()));
        }
        Ok(Self {
            files,
            generation: self.generation + 1,
        })
    }

    /// Paths whose content differs from `other`
    pub fn diff_paths(&self, other: &ProjectSnapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(path, source)| other.files.get(*path) != Some(*source))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            other
                .files
                .keys()
                .filter(|path| !self.files.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed.dedup();
        changed
    }

    /// Content fingerprint; equal snapshots share a fingerprint regardless of
    /// how they were produced.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (path, source) in &self.files {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            hasher.update(source.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }
}
