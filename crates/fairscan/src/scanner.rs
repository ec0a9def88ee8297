//! BundleScanner builder API
//!
//! Provides a builder pattern interface for scanning app bundles for
//! encrypted Mach-O binaries.

use crate::bundle::{
    inspect_candidate, Candidate, InfoPlistReader, ManifestReader, Match, Report, ScopeBuckets,
    ScopedWalker,
};
use crate::macho::{BinaryInspector, EncryptionInfo, MachOInspector};
use crate::{Error, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Plugin bundle suffix used when none is configured
pub const DEFAULT_PLUGIN_SUFFIX: &str = ".appex";

/// Traversal and inspection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Name suffixes that make an entry of `PlugIns` a plugin bundle.
    ///
    /// Applies to `PlugIns` under a bundle root or its `Contents`. Matching
    /// bundles are separate scopes and need their own `Info.plist`.
    pub plugin_suffixes: Vec<String>,
    /// Type entries through their symlink target. Links are skipped otherwise.
    pub follow_links: bool,
    /// Inspect candidate files on the rayon pool
    pub parallel: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            plugin_suffixes: vec![DEFAULT_PLUGIN_SUFFIX.to_string()],
            follow_links: true,
            parallel: false,
        }
    }
}

impl ScanOptions {
    /// Validate the options.
    ///
    /// Returns an error if there is no plugin suffix or one of them is empty.
    pub fn validate(&self) -> Result<()> {
        if self.plugin_suffixes.is_empty() {
            return Err(Error::Config("At least one plugin suffix is required".into()));
        }
        if self.plugin_suffixes.iter().any(|s| s.is_empty()) {
            return Err(Error::Config("Plugin suffix must not be empty".into()));
        }
        Ok(())
    }
}

/// Encrypted-binary scanner with builder pattern API.
///
/// The binary inspector and manifest reader default to Mach-O parsing and
/// `Info.plist` lookup; both can be replaced.
///
/// # Example
///
/// ```no_run
/// use fairscan::BundleScanner;
///
/// let report = BundleScanner::new("Payload/App.app")
///     .parallel(true)
///     .scan()?;
///
/// for (main_executable, files) in &report {
///     println!("{main_executable}: {} encrypted dependents", files.len());
/// }
/// # Ok::<(), fairscan::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct BundleScanner<I = MachOInspector, M = InfoPlistReader> {
    root: PathBuf,
    options: ScanOptions,
    inspector: I,
    manifest_reader: M,
}

impl BundleScanner {
    /// Create a scanner for the bundle directory at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            options: ScanOptions::default(),
            inspector: MachOInspector,
            manifest_reader: InfoPlistReader,
        }
    }
}

impl<I: BinaryInspector, M: ManifestReader> BundleScanner<I, M> {
    /// Replace all options at once.
    pub fn options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the plugin bundle suffixes (default `.appex`).
    pub fn plugin_suffixes<S: Into<String>>(mut self, suffixes: impl IntoIterator<Item = S>) -> Self {
        self.options.plugin_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Follow symlinks while walking (default `true`).
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.options.follow_links = follow;
        self
    }

    /// Inspect files in parallel (default `false`).
    ///
    /// Report order is the same as for a serial scan.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.options.parallel = parallel;
        self
    }

    /// Use a different binary inspector.
    pub fn inspector<J: BinaryInspector>(self, inspector: J) -> BundleScanner<J, M> {
        BundleScanner {
            root: self.root,
            options: self.options,
            inspector,
            manifest_reader: self.manifest_reader,
        }
    }

    /// Use a different manifest reader.
    pub fn manifest_reader<N: ManifestReader>(self, manifest_reader: N) -> BundleScanner<I, N> {
        BundleScanner {
            root: self.root,
            options: self.options,
            inspector: self.inspector,
            manifest_reader,
        }
    }

    /// Bundle directory being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a scope-aware walk of the bundle.
    pub fn walk(&self) -> Result<ScopedWalker> {
        self.options.validate()?;
        ScopedWalker::new(&self.root, &self.options)
    }

    /// Lazily walk and inspect, yielding matches in walk order.
    ///
    /// Always serial; [`BundleScanner::parallel`] only affects [`BundleScanner::scan`].
    pub fn matches(&self) -> Result<impl Iterator<Item = Result<Match<I::Info>>> + '_> {
        let walker = self.walk()?;
        Ok(walker.filter_map(move |candidate| match candidate {
            Ok(candidate) => inspect_candidate(&self.inspector, candidate).map(Ok),
            Err(e) => Some(Err(e)),
        }))
    }

    /// Scan the bundle and build the report.
    ///
    /// # Errors
    ///
    /// Fails on invalid options, on any directory enumeration error, and
    /// when a bundle with encrypted files has no readable main executable
    /// in its manifest. No partial report is returned.
    pub fn scan(&self) -> Result<Report<I::Info>> {
        debug!(root = %self.root.display(), parallel = self.options.parallel, "scanning bundle");

        let mut buckets = ScopeBuckets::new(&self.root);

        if self.options.parallel {
            let candidates: Vec<Candidate> = self.walk()?.collect::<Result<_>>()?;
            let candidate_count = candidates.len();

            // Indexed collect keeps walk order.
            let matches: Vec<Option<Match<I::Info>>> = candidates
                .into_par_iter()
                .map(|candidate| inspect_candidate(&self.inspector, candidate))
                .collect();

            debug!(candidates = candidate_count, "inspection finished");
            for m in matches.into_iter().flatten() {
                buckets.push(m);
            }
        } else {
            for m in self.matches()? {
                buckets.push(m?);
            }
        }

        debug!(scopes = buckets.scope_count(), "resolving main executables");
        buckets.finish(&self.manifest_reader)
    }
}

/// Scan a bundle directory with default options.
pub fn find_encrypted_binaries(root: impl AsRef<Path>) -> Result<Report<EncryptionInfo>> {
    BundleScanner::new(root).scan()
}
