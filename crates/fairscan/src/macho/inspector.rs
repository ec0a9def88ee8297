//! Per-file binary inspection.
//!
//! The walker hands every candidate file to a [`BinaryInspector`]. An
//! `Err` from [`BinaryInspector::inspect`] means "not a recognized binary"
//! and is mapped to "no match" by the caller.

use super::parser::{EncryptionInfo, MachOFile};
use crate::Result;
use std::path::Path;

/// Outcome of inspecting one file that parsed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection<T> {
    /// The file is an executable format the scanner cares about
    pub is_executable: bool,
    /// Encryption metadata carried by the file
    pub encryption: Option<T>,
}

impl<T> Inspection<T> {
    /// Valid executable with encryption metadata
    pub fn into_match(self) -> Option<T> {
        if self.is_executable {
            self.encryption
        } else {
            None
        }
    }
}

/// Decides whether a file is an executable carrying encryption metadata.
///
/// Implementations must be `Sync` so inspection can run on the rayon pool.
pub trait BinaryInspector: Sync {
    /// Encryption metadata reported for matching files
    type Info: Send;

    fn inspect(&self, path: &Path) -> Result<Inspection<Self::Info>>;
}

/// Inspector backed by [`MachOFile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MachOInspector;

impl BinaryInspector for MachOInspector {
    type Info = EncryptionInfo;

    fn inspect(&self, path: &Path) -> Result<Inspection<EncryptionInfo>> {
        let macho = MachOFile::open(path)?;
        Ok(Inspection {
            is_executable: macho.is_executable(),
            encryption: macho.encryption_info(),
        })
    }
}
