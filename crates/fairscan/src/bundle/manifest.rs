//! Bundle manifest (Info.plist) lookup.

use crate::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolves the main executable of a bundle scope.
pub trait ManifestReader: Sync {
    /// Main executable of the bundle rooted at `scope`, relative to `scope`.
    fn main_executable(&self, scope: &Path) -> Result<PathBuf>;
}

/// Extract `CFBundleExecutable` from Info.plist bytes (XML or binary).
pub fn parse_main_executable(data: &[u8], manifest_path: &Path) -> Result<String> {
    let plist: plist::Value = plist::from_bytes(data).map_err(|source| Error::Plist {
        path: manifest_path.to_path_buf(),
        source,
    })?;

    let dict = plist.as_dictionary().ok_or_else(|| Error::Manifest {
        path: manifest_path.to_path_buf(),
        reason: "Info.plist is not a dictionary".into(),
    })?;

    dict.get("CFBundleExecutable")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Manifest {
            path: manifest_path.to_path_buf(),
            reason: "missing CFBundleExecutable".into(),
        })
}

/// Turn a `CFBundleExecutable` value into a clean bundle-relative path.
///
/// `.` components are dropped. Absolute names and names using `..` are
/// rejected since they do not name a file inside the bundle.
pub fn bundle_relative(name: &str, manifest_path: &Path) -> Result<PathBuf> {
    let invalid = |reason: &str| Error::Manifest {
        path: manifest_path.to_path_buf(),
        reason: format!("CFBundleExecutable {name:?} {reason}"),
    };

    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("leaves the bundle")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("is absolute")),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(invalid("is empty"));
    }
    Ok(path)
}

/// Reads `Info.plist` from either bundle layout.
///
/// | Layout | Manifest | Executable |
/// |--------|----------|------------|
/// | shallow (iOS) | `Info.plist` | `<name>` |
/// | deep (macOS) | `Contents/Info.plist` | `Contents/MacOS/<name>` |
///
/// The shallow layout wins when both manifests exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoPlistReader;

impl ManifestReader for InfoPlistReader {
    fn main_executable(&self, scope: &Path) -> Result<PathBuf> {
        let shallow = scope.join("Info.plist");
        if shallow.is_file() {
            let data = fs::read(&shallow).map_err(|e| Error::io(&shallow, e))?;
            let name = parse_main_executable(&data, &shallow)?;
            return bundle_relative(&name, &shallow);
        }

        let deep = scope.join("Contents").join("Info.plist");
        if deep.is_file() {
            let data = fs::read(&deep).map_err(|e| Error::io(&deep, e))?;
            let name = parse_main_executable(&data, &deep)?;
            return Ok(Path::new("Contents")
                .join("MacOS")
                .join(bundle_relative(&name, &deep)?));
        }

        Err(Error::Manifest {
            path: shallow,
            reason: "bundle has no Info.plist".into(),
        })
    }
}
