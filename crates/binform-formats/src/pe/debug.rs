//! PE debug directory parsing.

use super::section::SectionHeader;
use crate::{ByteStream, ParseError};

/// Size of one debug directory record.
pub const DEBUG_ENTRY_SIZE: usize = 28;

// Debug types
pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const IMAGE_DEBUG_TYPE_POGO: u32 = 13;
pub const IMAGE_DEBUG_TYPE_REPRO: u32 = 16;

/// A debug directory record.
#[derive(Debug, Clone)]
pub struct DebugEntry {
    /// Reserved, must be 0.
    pub characteristics: u32,
    /// Time stamp.
    pub time_date_stamp: u32,
    /// Major version.
    pub major_version: u16,
    /// Minor version.
    pub minor_version: u16,
    /// Format of the debug data (`IMAGE_DEBUG_TYPE_*`).
    pub debug_type: u32,
    /// Size of the debug data.
    pub size_of_data: u32,
    /// RVA of the debug data when mapped.
    pub address_of_raw_data: u32,
    /// File offset of the debug data.
    pub pointer_to_raw_data: u32,
}

impl DebugEntry {
    /// Parse a debug directory record from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < DEBUG_ENTRY_SIZE {
            return Err(ParseError::too_short(DEBUG_ENTRY_SIZE, data.len()));
        }

        Ok(Self {
            characteristics: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            time_date_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            major_version: u16::from_le_bytes([data[8], data[9]]),
            minor_version: u16::from_le_bytes([data[10], data[11]]),
            debug_type: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            size_of_data: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            address_of_raw_data: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            pointer_to_raw_data: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Returns true if this entry carries CodeView (PDB) information.
    pub fn is_codeview(&self) -> bool {
        self.debug_type == IMAGE_DEBUG_TYPE_CODEVIEW
    }
}

/// Parse the debug directory: `size / 28` fixed records.
pub fn parse_debug(
    data: &[u8],
    debug_rva: u32,
    debug_size: u32,
    sections: &[SectionHeader],
) -> Vec<DebugEntry> {
    let mut entries = Vec::new();
    let stream = ByteStream::new(data);

    let Some(base_offset) = super::rva_to_offset(debug_rva, sections) else {
        return entries;
    };

    let count = debug_size as usize / DEBUG_ENTRY_SIZE;
    for i in 0..count {
        let Ok(record) = stream.peek_data(base_offset + i * DEBUG_ENTRY_SIZE, DEBUG_ENTRY_SIZE)
        else {
            break;
        };
        match DebugEntry::parse(record) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
    }

    entries
}
