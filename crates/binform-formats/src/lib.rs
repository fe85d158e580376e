//! # binform-formats
//!
//! Binary format parsers for binform. This crate provides parsers for:
//! - Mach-O - macOS/iOS binaries, with an editable segment/section model
//! - PE (Portable Executable) - Windows binaries
//!
//! PE parsing is tolerant of malformed input: only the header chain is
//! mandatory, every later step degrades to a logged warning.

pub mod error;
pub mod macho;
pub mod pe;
pub mod stream;
pub mod traits;

pub use error::ParseError;
pub use macho::MachO;
pub use pe::Pe;
pub use stream::ByteStream;
pub use traits::{BinaryFormat, Section};

/// Largest payload the parsers will copy into memory for a single
/// structure (TLS data template, DOS stub, certificate blob).
pub const MAX_DATA_SIZE: usize = 100 * 1024 * 1024;

/// Detected binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryType {
    MachO,
    Pe,
    Unknown,
}

/// Detect the binary format from magic bytes.
pub fn detect_format(data: &[u8]) -> BinaryType {
    if data.len() < 4 {
        return BinaryType::Unknown;
    }

    // Check PE/DOS magic ("MZ")
    if data[0..2] == [0x4D, 0x5A] {
        // Verify it's actually a PE by checking for PE signature
        if data.len() >= 64 {
            let pe_offset = u32::from_le_bytes([data[60], data[61], data[62], data[63]]) as usize;
            if pe_offset + 4 <= data.len() {
                let pe_sig = u32::from_le_bytes([
                    data[pe_offset],
                    data[pe_offset + 1],
                    data[pe_offset + 2],
                    data[pe_offset + 3],
                ]);
                if pe_sig == 0x00004550 {
                    // "PE\0\0"
                    return BinaryType::Pe;
                }
            }
        }
    }

    // Check Mach-O magic (both endianness)
    let magic = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
    match magic {
        0xFEEDFACE | 0xCEFAEDFE |  // 32-bit
        0xFEEDFACF | 0xCFFAEDFE    // 64-bit
        => return BinaryType::MachO,
        _ => {}
    }

    BinaryType::Unknown
}
