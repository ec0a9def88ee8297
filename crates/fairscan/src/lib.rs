pub mod bundle;
pub mod error;
pub mod ipa;
pub mod macho;
pub mod scanner;

pub use bundle::{EncryptedFile, InfoPlistReader, ManifestReader, Match, Report, ScopedWalker};
pub use error::Error;
pub use ipa::{extract_ipa, scan_ipa, validate_ipa};
pub use macho::{BinaryInspector, EncryptionInfo, Inspection, MachOFile, MachOInspector};
pub use scanner::{find_encrypted_binaries, BundleScanner, ScanOptions};

pub type Result<T> = std::result::Result<T, Error>;
