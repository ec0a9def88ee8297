pub mod inspector;
pub mod parser;

pub use inspector::{BinaryInspector, Inspection, MachOInspector};
pub use parser::{EncryptionInfo, MachOFile};
