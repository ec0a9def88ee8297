//! Mach-O file parsing using goblin

use crate::{Error, Result};
use goblin::mach::fat::FAT_MAGIC;
use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_DYLIB, MH_EXECUTE, MH_MAGIC, MH_MAGIC_64};
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Big-endian magic of a universal binary with 64-bit slice offsets.
const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Encryption record of one architecture slice.
///
/// Copied from `LC_ENCRYPTION_INFO` / `LC_ENCRYPTION_INFO_64`. The byte
/// range `cryptoff..cryptoff + cryptsize` is relative to the slice start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncryptionInfo {
    /// File offset of the encrypted range
    pub cryptoff: u32,
    /// Size of the encrypted range
    pub cryptsize: u32,
    /// Encryption system, 0 means not encrypted
    pub cryptid: u32,
    /// CPU type of the slice carrying the record
    pub cpu_type: u32,
    /// Record came from the 64-bit load command
    pub is_64: bool,
}

impl EncryptionInfo {
    /// The range is actually encrypted (as opposed to a decrypted dump
    /// that kept the load command).
    pub fn is_encrypted(&self) -> bool {
        self.cryptid != 0
    }
}

/// Represents a parsed Mach-O file
pub struct MachOFile {
    /// Is FAT binary
    is_fat: bool,
    /// Architecture slices
    slices: Vec<ArchSlice>,
}

/// A single architecture slice
pub struct ArchSlice {
    /// Offset in file
    pub offset: usize,
    /// Size of slice
    pub size: usize,
    /// CPU type
    pub cpu_type: u32,
    /// Is 64-bit
    pub is_64: bool,
    /// Mach-O file type (MH_EXECUTE, MH_DYLIB, ...)
    pub filetype: u32,
    /// Encryption record, if the slice has one
    pub encryption: Option<EncryptionInfo>,
}

impl ArchSlice {
    /// Main executable or dynamic library.
    pub fn is_executable(&self) -> bool {
        self.filetype == MH_EXECUTE || self.filetype == MH_DYLIB
    }
}

/// Check the leading magic of a file without reading the rest of it.
pub fn has_macho_magic(magic: [u8; 4]) -> bool {
    matches!(
        u32::from_be_bytes(magic),
        MH_MAGIC | MH_CIGAM | MH_MAGIC_64 | MH_CIGAM_64 | FAT_MAGIC | FAT_MAGIC_64
    )
}

impl MachOFile {
    /// Open and parse a Mach-O file.
    ///
    /// Files that do not start with a Mach-O or FAT magic are rejected
    /// after reading four bytes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| Error::io(path, e))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| Error::MachO("File too short".into()))?;
        if !has_macho_magic(magic) {
            return Err(Error::MachO("Not a Mach-O image".into()));
        }

        let mut data = magic.to_vec();
        file.read_to_end(&mut data).map_err(|e| Error::io(path, e))?;
        Self::parse(&data)
    }

    /// Parse Mach-O from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mach = Mach::parse(data)
            .map_err(|e| Error::MachO(format!("Failed to parse: {}", e)))?;

        let (is_fat, slices) = match mach {
            Mach::Binary(macho) => {
                let slice = Self::parse_single(&macho, 0, data.len());
                (false, vec![slice])
            }
            Mach::Fat(fat) => {
                let mut slices = Vec::new();
                for (i, arch) in fat.iter_arches().enumerate() {
                    let arch = arch.map_err(|e| Error::MachO(format!("Fat arch {}: {}", i, e)))?;
                    let offset = arch.offset as usize;
                    let size = arch.size as usize;
                    let slice_data = offset
                        .checked_add(size)
                        .and_then(|end| data.get(offset..end))
                        .ok_or_else(|| Error::MachO(format!("Slice {} out of bounds", i)))?;

                    let macho = MachO::parse(slice_data, 0)
                        .map_err(|e| Error::MachO(format!("Slice {}: {}", i, e)))?;

                    slices.push(Self::parse_single(&macho, offset, size));
                }
                (true, slices)
            }
        };

        Ok(Self { is_fat, slices })
    }

    fn parse_single(macho: &MachO, offset: usize, size: usize) -> ArchSlice {
        let is_64 = macho.header.magic == MH_MAGIC_64 || macho.header.magic == MH_CIGAM_64;
        let cpu_type = macho.header.cputype as u32;

        let encryption = macho.load_commands.iter().find_map(|lc| match lc.command {
            CommandVariant::EncryptionInfo32(ref cmd) => Some(EncryptionInfo {
                cryptoff: cmd.cryptoff,
                cryptsize: cmd.cryptsize,
                cryptid: cmd.cryptid,
                cpu_type,
                is_64: false,
            }),
            CommandVariant::EncryptionInfo64(ref cmd) => Some(EncryptionInfo {
                cryptoff: cmd.cryptoff,
                cryptsize: cmd.cryptsize,
                cryptid: cmd.cryptid,
                cpu_type,
                is_64: true,
            }),
            _ => None,
        });

        ArchSlice {
            offset,
            size,
            cpu_type,
            is_64,
            filetype: macho.header.filetype,
            encryption,
        }
    }

    /// Is FAT binary
    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    /// Get architecture slices
    pub fn slices(&self) -> &[ArchSlice] {
        &self.slices
    }

    /// At least one slice is an executable or dylib
    pub fn is_executable(&self) -> bool {
        self.slices.iter().any(ArchSlice::is_executable)
    }

    /// Encryption record of the first executable slice that carries one
    pub fn encryption_info(&self) -> Option<EncryptionInfo> {
        self.slices
            .iter()
            .filter(|s| s.is_executable())
            .find_map(|s| s.encryption)
    }
}
