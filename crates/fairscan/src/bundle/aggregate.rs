//! Grouping of matches into the final per-bundle report.

use super::manifest::ManifestReader;
use super::walker::Match;
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An encrypted file reported under a main executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptedFile<T> {
    /// Path relative to the scan root
    pub path: String,
    pub info: T,
}

/// Main executable (relative to the scan root) -> other encrypted files of
/// the same bundle, in walk order.
pub type Report<T> = BTreeMap<String, Vec<EncryptedFile<T>>>;

/// Per-scope buckets of matches.
///
/// A scope gets a bucket on its first match, so scopes without matches
/// never reach the report.
pub struct ScopeBuckets<T> {
    root: PathBuf,
    buckets: BTreeMap<PathBuf, Vec<(PathBuf, T)>>,
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl<T> ScopeBuckets<T> {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            buckets: BTreeMap::new(),
        }
    }

    /// Append a match to its scope's bucket.
    pub fn push(&mut self, m: Match<T>) {
        let relative = relative_to(&self.root, &m.path);
        self.buckets.entry(m.scope).or_default().push((relative, m.info));
    }

    /// Number of scopes with at least one match
    pub fn scope_count(&self) -> usize {
        self.buckets.len()
    }

    /// Resolve every scope's main executable and build the report.
    ///
    /// Each scope's own main executable is dropped from its list. A scope
    /// whose manifest cannot be read fails the whole report.
    pub fn finish<M: ManifestReader + ?Sized>(self, manifest_reader: &M) -> Result<Report<T>> {
        let mut report = Report::new();

        for (scope, files) in self.buckets {
            let main_executable =
                relative_to(&self.root, &scope).join(manifest_reader.main_executable(&scope)?);
            let total = files.len();

            let filtered: Vec<_> = files
                .into_iter()
                .filter(|(path, _)| *path != main_executable)
                .map(|(path, info)| EncryptedFile {
                    path: path_key(&path),
                    info,
                })
                .collect();

            debug!(
                scope = %scope.display(),
                main_executable = %main_executable.display(),
                matched = total,
                reported = filtered.len(),
                "scope resolved"
            );

            report
                .entry(path_key(&main_executable))
                .or_default()
                .extend(filtered);
        }

        Ok(report)
    }
}
