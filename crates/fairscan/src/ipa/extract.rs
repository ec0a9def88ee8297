//! IPA extraction.
//!
//! Unpacks an IPA archive and locates the `.app` bundle under `Payload/`.

use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Directory inside an IPA that holds the app bundle
const PAYLOAD_DIR: &str = "Payload";

#[cfg(unix)]
fn is_symlink_mode(mode: Option<u32>) -> bool {
    mode.map(|mode| (mode & 0o170000) == 0o120000).unwrap_or(false)
}

/// Refuse an entry if an already extracted part of its path is a symlink.
///
/// Writing through such a link would land wherever the archive pointed it.
fn ensure_no_symlink_in_path(dest_dir: &Path, name: &Path) -> Result<()> {
    let mut current = dest_dir.to_path_buf();
    for component in name.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(Error::InvalidIpa(format!(
                    "Entry {} passes through a symlink",
                    name.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(Error::io(&current, e)),
        }
    }
    Ok(())
}

/// A symlink at `name` pointing to `target` stays inside the extraction root.
#[cfg_attr(not(unix), allow(dead_code))]
fn is_enclosed_link(name: &Path, target: &Path) -> bool {
    let parent = name.parent().unwrap_or(Path::new(""));
    let mut depth = 0usize;
    for component in parent.components().chain(target.components()) {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Extract an IPA file to a destination directory.
///
/// Entries whose names would land outside `dest_dir` are skipped. Unix
/// permissions and symlinks are restored on Unix. Symlinks pointing
/// outside `dest_dir`, and entries stored below an extracted symlink, make
/// the archive invalid.
///
/// # Returns
///
/// The path of the extracted `.app` bundle inside `Payload/`.
///
/// # Errors
///
/// Returns an error if:
/// - The IPA file cannot be opened or read
/// - The IPA is not a valid ZIP archive
/// - An entry would be written outside `dest_dir` through a symlink
/// - No .app bundle is found in Payload/
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let ipa_path = ipa_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    let file = File::open(ipa_path).map_err(|e| Error::io(ipa_path, e))?;
    // SAFETY: the archive is opened read-only and not modified while mapped.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(ipa_path, e))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;

    fs::create_dir_all(dest_dir).map_err(|e| Error::io(dest_dir, e))?;
    debug!(ipa = %ipa_path.display(), entries = archive.len(), "extracting");

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        let name = match entry.enclosed_name() {
            Some(name) => name,
            None => {
                debug!(name = entry.name(), "skipping entry outside destination");
                continue;
            }
        };
        ensure_no_symlink_in_path(dest_dir, &name)?;
        let outpath = dest_dir.join(&name);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| Error::io(&outpath, e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        #[cfg(unix)]
        if is_symlink_mode(entry.unix_mode()) {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| Error::io(&outpath, e))?;
            if !is_enclosed_link(&name, Path::new(&target)) {
                return Err(Error::InvalidIpa(format!(
                    "Symlink {} points outside the archive: {target}",
                    name.display()
                )));
            }
            std::os::unix::fs::symlink(&target, &outpath).map_err(|e| Error::io(&outpath, e))?;
            continue;
        }

        let mut outfile = File::create(&outpath).map_err(|e| Error::io(&outpath, e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| Error::io(&outpath, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| Error::io(&outpath, e))?;
        }
    }

    find_app_bundle(dest_dir)
}

/// Find the .app bundle inside a Payload/ directory.
fn find_app_bundle(dest_dir: &Path) -> Result<PathBuf> {
    let payload_dir = dest_dir.join(PAYLOAD_DIR);

    if !payload_dir.is_dir() {
        return Err(Error::InvalidIpa("No Payload directory found in IPA".into()));
    }

    let mut apps = Vec::new();
    for entry in fs::read_dir(&payload_dir).map_err(|e| Error::io(&payload_dir, e))? {
        let path = entry.map_err(|e| Error::io(&payload_dir, e))?.path();
        if path.is_dir() && path.extension().is_some_and(|ext| ext == "app") {
            apps.push(path);
        }
    }

    apps.sort();
    apps.into_iter()
        .next()
        .ok_or_else(|| Error::InvalidIpa("No .app bundle found in Payload/".into()))
}

/// Validate that a path is a valid IPA file.
///
/// Checks that the file exists and has a ZIP signature.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();

    let mut file = File::open(ipa_path).map_err(|e| Error::io(ipa_path, e))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|e| Error::io(ipa_path, e))?;

    // PK\x03\x04, PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if &magic[0..2] != b"PK" {
        return Err(Error::InvalidIpa("Not a valid ZIP/IPA file".into()));
    }

    Ok(())
}
