//! Scope-aware bundle traversal.
//!
//! [`ScopedWalker`] walks a bundle depth-first and tags every regular file
//! with the bundle (scope) that owns it. Plugin bundles under a `PlugIns`
//! directory open a new scope; everything else inherits the scope of the
//! directory it lives in.
//!
//! ```text
//! App.app/                         scope App.app
//! ├── App                          -> App.app
//! ├── Frameworks/Foo.framework/Foo -> App.app
//! └── PlugIns/
//!     ├── Share.appex/             scope App.app/PlugIns/Share.appex
//!     │   └── Share                -> Share.appex
//!     └── README                   inert
//! ```
//!
//! The walker itself never opens files. [`inspect_candidate`] runs a
//! [`BinaryInspector`] over a candidate and turns it into a [`Match`].

use crate::macho::BinaryInspector;
use crate::scanner::ScanOptions;
use crate::{Error, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Directory name that marks a plugin boundary
pub const PLUGINS_DIR: &str = "PlugIns";

/// A regular file reached by the walk, tagged with its owning scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Root directory of the owning bundle
    pub scope: PathBuf,
    /// Full path of the file
    pub path: PathBuf,
}

/// A candidate that inspected as an executable with encryption metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match<T> {
    pub scope: PathBuf,
    pub path: PathBuf,
    pub info: T,
}

/// One pending traversal: the remaining entries below a scope root.
struct Frame {
    scope: PathBuf,
    entries: walkdir::IntoIter,
}

/// Depth-first, scope-aware iterator over the candidate files of a bundle.
///
/// Directory entries are visited sorted by file name. The first
/// enumeration error ends the iteration.
pub struct ScopedWalker {
    plugin_suffixes: Vec<String>,
    follow_links: bool,
    stack: Vec<Frame>,
}

impl ScopedWalker {
    /// Start a walk at `root`, which must be a directory.
    pub fn new(root: impl AsRef<Path>, options: &ScanOptions) -> Result<Self> {
        let root = root.as_ref();
        let metadata = fs::metadata(root).map_err(|e| Error::io(root, e))?;
        if !metadata.is_dir() {
            return Err(Error::NotADirectory(root.to_path_buf()));
        }

        let mut walker = Self {
            plugin_suffixes: options.plugin_suffixes.clone(),
            follow_links: options.follow_links,
            stack: Vec::new(),
        };
        walker.push_scope(root.to_path_buf());
        Ok(walker)
    }

    fn push_scope(&mut self, scope: PathBuf) {
        let entries = WalkDir::new(&scope)
            .min_depth(1)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter();
        self.stack.push(Frame { scope, entries });
    }

    /// Plugin bundles directly inside a `PlugIns` directory, in name order.
    ///
    /// An unreadable `PlugIns` directory contributes nothing. Entries
    /// without a plugin suffix, and suffixed entries that are not
    /// directories, are ignored.
    fn plugin_bundles(&self, plugins_dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(plugins_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %plugins_dir.display(), error = %e, "skipping unreadable PlugIns");
                return Ok(Vec::new());
            }
        };

        let mut bundles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(plugins_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !self.plugin_suffixes.iter().any(|s| name.ends_with(s.as_str())) {
                continue;
            }

            let path = entry.path();
            let is_dir = if self.follow_links {
                fs::metadata(&path).map_err(|e| Error::io(&path, e))?.is_dir()
            } else {
                entry.file_type().map_err(|e| Error::io(&path, e))?.is_dir()
            };
            if is_dir {
                bundles.push(path);
            }
        }

        bundles.sort();
        Ok(bundles)
    }
}

/// `PlugIns` directly under the scope root, or under its `Contents`
/// directory for macOS-style bundles.
fn is_plugin_boundary(entry: &DirEntry) -> bool {
    if entry.file_name() != PLUGINS_DIR {
        return false;
    }
    match entry.depth() {
        1 => true,
        2 => entry.path().parent().and_then(Path::file_name) == Some(OsStr::new("Contents")),
        _ => false,
    }
}

impl Iterator for ScopedWalker {
    type Item = Result<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let entry = match frame.entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    self.stack.clear();
                    return Some(Err(Error::Walk(e)));
                }
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_file() {
                return Some(Ok(Candidate {
                    scope: frame.scope.clone(),
                    path: entry.into_path(),
                }));
            }

            if file_type.is_dir() && is_plugin_boundary(&entry) {
                frame.entries.skip_current_dir();

                let bundles = match self.plugin_bundles(entry.path()) {
                    Ok(bundles) => bundles,
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                };
                // Reverse so the first bundle is walked first.
                for bundle in bundles.into_iter().rev() {
                    debug!(scope = %bundle.display(), "entering plugin scope");
                    self.push_scope(bundle);
                }
            }
        }
    }
}

/// Inspect one candidate.
///
/// Files the inspector rejects are not matches. That is the normal case
/// for resources, plists and images, so it is only traced.
pub fn inspect_candidate<I: BinaryInspector>(
    inspector: &I,
    candidate: Candidate,
) -> Option<Match<I::Info>> {
    match inspector.inspect(&candidate.path) {
        Ok(inspection) => {
            let info = inspection.into_match();
            if info.is_none() {
                trace!(path = %candidate.path.display(), "no encryption metadata");
            }
            info.map(|info| Match {
                scope: candidate.scope,
                path: candidate.path,
                info,
            })
        }
        Err(e) => {
            trace!(path = %candidate.path.display(), error = %e, "not a binary");
            None
        }
    }
}
