//! IPA handling module.
//!
//! Provides scanning of IPA archives by extracting them to a temporary
//! directory and scanning the contained `.app` bundle.

pub mod extract;

pub use extract::{extract_ipa, validate_ipa};

use crate::bundle::Report;
use crate::macho::EncryptionInfo;
use crate::scanner::{BundleScanner, ScanOptions};
use crate::{Error, Result};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// Scan an IPA file.
///
/// The archive is extracted to a temporary directory that is removed
/// when this function returns. Report paths are relative to the `.app`
/// bundle inside `Payload/`.
///
/// # Errors
///
/// Returns an error if the archive is not a valid IPA, cannot be
/// extracted, or the bundle scan fails.
pub fn scan_ipa(ipa_path: impl AsRef<Path>, options: ScanOptions) -> Result<Report<EncryptionInfo>> {
    let ipa_path = ipa_path.as_ref();

    validate_ipa(ipa_path)?;

    let temp_dir = TempDir::new().map_err(|e| Error::io(std::env::temp_dir(), e))?;
    let app_bundle = extract_ipa(ipa_path, temp_dir.path())?;
    debug!(bundle = %app_bundle.display(), "extracted app bundle");

    BundleScanner::new(&app_bundle).options(options).scan()
}
