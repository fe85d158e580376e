//! PE export table parsing.

use std::collections::HashMap;

use super::section::SectionHeader;
use crate::{ByteStream, ParseError};

/// Export directory size
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

/// Export directory table
#[derive(Debug, Clone)]
pub struct ExportDirectory {
    /// Export flags (reserved, must be 0)
    pub characteristics: u32,
    /// Time/date stamp
    pub time_date_stamp: u32,
    /// Major version
    pub major_version: u16,
    /// Minor version
    pub minor_version: u16,
    /// RVA of DLL name
    pub name_rva: u32,
    /// Ordinal base
    pub base: u32,
    /// Number of functions
    pub number_of_functions: u32,
    /// Number of names
    pub number_of_names: u32,
    /// RVA of Export Address Table
    pub address_of_functions: u32,
    /// RVA of Export Name Pointer Table
    pub address_of_names: u32,
    /// RVA of Ordinal Table
    pub address_of_name_ordinals: u32,
}

impl ExportDirectory {
    /// Parse export directory from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < EXPORT_DIRECTORY_SIZE {
            return Err(ParseError::too_short(EXPORT_DIRECTORY_SIZE, data.len()));
        }

        Ok(Self {
            characteristics: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            time_date_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            major_version: u16::from_le_bytes([data[8], data[9]]),
            minor_version: u16::from_le_bytes([data[10], data[11]]),
            name_rva: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            base: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            number_of_functions: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            number_of_names: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
            address_of_functions: u32::from_le_bytes([data[28], data[29], data[30], data[31]]),
            address_of_names: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            address_of_name_ordinals: u32::from_le_bytes([data[36], data[37], data[38], data[39]]),
        })
    }
}

/// A parsed export entry
#[derive(Debug, Clone)]
pub struct Export {
    /// Export name (may be empty for ordinal-only exports)
    pub name: String,
    /// Ordinal number
    pub ordinal: u32,
    /// RVA of the exported function
    pub rva: u32,
    /// Forwarder string (if this is a forwarded export)
    pub forwarder: Option<String>,
}

/// Parse all exports from the export directory.
pub fn parse_exports(
    data: &[u8],
    export_dir_rva: u32,
    export_dir_size: u32,
    sections: &[SectionHeader],
) -> Vec<Export> {
    let mut exports = Vec::new();
    let stream = ByteStream::new(data);

    let Some(export_offset) = super::rva_to_offset(export_dir_rva, sections) else {
        return exports;
    };
    let Ok(dir_data) = stream.peek_data(export_offset, EXPORT_DIRECTORY_SIZE) else {
        return exports;
    };
    let Ok(export_dir) = ExportDirectory::parse(dir_data) else {
        return exports;
    };

    let Some(addr_offset) = super::rva_to_offset(export_dir.address_of_functions, sections) else {
        return exports;
    };

    // Build a map of ordinal index -> name from the parallel name tables.
    let names_offset = super::rva_to_offset(export_dir.address_of_names, sections);
    let ordinals_offset = super::rva_to_offset(export_dir.address_of_name_ordinals, sections);
    let mut index_to_name: HashMap<u16, String> = HashMap::new();

    if let (Some(names_off), Some(ords_off)) = (names_offset, ordinals_offset) {
        for i in 0..export_dir.number_of_names as usize {
            let (Ok(name_rva), Ok(index)) = (
                stream.peek_u32(names_off + i * 4),
                stream.peek_u16(ords_off + i * 2),
            ) else {
                break;
            };
            if let Some(name_off) = super::rva_to_offset(name_rva, sections) {
                if let Ok(name) = stream.peek_cstring_at(name_off) {
                    index_to_name.insert(index, name);
                }
            }
        }
    }

    // A function RVA pointing back inside the export directory is a
    // forwarder string, not code.
    let export_range = export_dir_rva..export_dir_rva.saturating_add(export_dir_size);

    for i in 0..export_dir.number_of_functions as usize {
        let Ok(func_rva) = stream.peek_u32(addr_offset + i * 4) else {
            break;
        };
        if func_rva == 0 {
            continue;
        }

        let ordinal = export_dir.base.wrapping_add(i as u32);
        let name = index_to_name.get(&(i as u16)).cloned().unwrap_or_default();

        let forwarder = if export_range.contains(&func_rva) {
            super::rva_to_offset(func_rva, sections)
                .and_then(|off| stream.peek_cstring_at(off).ok())
        } else {
            None
        };

        exports.push(Export {
            name,
            ordinal,
            rva: func_rva,
            forwarder,
        });
    }

    exports
}
