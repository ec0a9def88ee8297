//! Error types for fairscan operations.
//!
//! Scans distinguish two kinds of failure. A file that is not a Mach-O
//! image, or carries no encryption record, is expected noise: the
//! inspector reports it as [`Error::MachO`] and the walker drops the file.
//! Everything else is structural and aborts the scan.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::path::PathBuf;
use thiserror::Error;

/// Error type for fairscan operations.
///
/// # Examples
///
/// ```no_run
/// use fairscan::{BundleScanner, Error};
///
/// match BundleScanner::new("Payload/App.app").scan() {
///     Ok(report) => println!("{} scopes with encrypted files", report.len()),
///     Err(Error::Manifest { path, reason }) => eprintln!("{}: {reason}", path.display()),
///     Err(e) => eprintln!("scan failed: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation on a specific path failed.
    ///
    /// Raised for metadata lookups, directory reads and file reads that the
    /// scan depends on.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory enumeration failed.
    ///
    /// Covers unreadable directories, entries whose type cannot be
    /// determined and symlink loops. The inner error carries the path.
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The scan root is not a directory.
    #[error("Not a bundle directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Invalid or unsupported Mach-O binary.
    ///
    /// Only produced by binary inspection. Scans treat it as "no match".
    #[error("Invalid Mach-O: {0}")]
    MachO(String),

    /// Bundle manifest could not be decoded.
    #[error("Plist error in {}: {source}", path.display())]
    Plist {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    /// Bundle manifest is missing or does not name a main executable.
    #[error("Invalid bundle manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    /// ZIP archive operation failed.
    ///
    /// Occurs while validating or extracting an IPA. See [`crate::ipa`].
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Archive is not a usable IPA.
    ///
    /// Not a ZIP file, or no `.app` bundle under `Payload/`.
    #[error("Invalid IPA: {0}")]
    InvalidIpa(String),

    /// Invalid scanner configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an [`std::io::Error`] with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
