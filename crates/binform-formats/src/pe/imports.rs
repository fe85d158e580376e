//! PE import table parsing.

use binform_core::Bitness;
use log::{info, warn};

use super::section::SectionHeader;
use crate::{ByteStream, ParseError};

/// Import directory entry size
pub const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// Shortest DLL name accepted ("a.so"-sized; anything shorter is noise).
const MIN_DLL_NAME_LEN: usize = 4;

/// Import directory entry
#[derive(Debug, Clone)]
pub struct ImportDescriptor {
    /// RVA of Import Lookup Table (or Import Name Table)
    pub import_lookup_table_rva: u32,
    /// Time/date stamp
    pub time_date_stamp: u32,
    /// Forwarder chain
    pub forwarder_chain: u32,
    /// RVA of DLL name
    pub name_rva: u32,
    /// RVA of Import Address Table
    pub import_address_table_rva: u32,
}

impl ImportDescriptor {
    /// Parse an import descriptor from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < IMPORT_DESCRIPTOR_SIZE {
            return Err(ParseError::too_short(IMPORT_DESCRIPTOR_SIZE, data.len()));
        }

        Ok(Self {
            import_lookup_table_rva: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            time_date_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            forwarder_chain: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            name_rva: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            import_address_table_rva: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
        })
    }
}

/// Imports from a single DLL.
#[derive(Debug, Clone)]
pub struct Import {
    /// DLL name
    pub dll_name: String,
    /// The descriptor this import was built from.
    pub descriptor: ImportDescriptor,
    /// Imported functions.
    pub entries: Vec<ImportEntry>,
}

/// A single imported function.
#[derive(Debug, Clone)]
pub struct ImportEntry {
    /// Function name (empty if imported by ordinal)
    pub name: String,
    /// Ordinal number (if imported by ordinal)
    pub ordinal: Option<u16>,
    /// Hint value
    pub hint: u16,
    /// Raw IAT slot value.
    pub iat_value: u64,
    /// Lookup-table value; falls back to the IAT slot when the ILT is
    /// absent or corrupted.
    pub data: u64,
    /// RVA of the IAT slot holding this import.
    pub rva: u32,
}

impl ImportEntry {
    /// Returns true if this entry imports by ordinal.
    pub fn is_ordinal(&self) -> bool {
        self.ordinal.is_some()
    }
}

/// Parse all imports from the import directory.
pub fn parse_imports(
    data: &[u8],
    import_dir_rva: u32,
    sections: &[SectionHeader],
    bitness: Bitness,
) -> Vec<Import> {
    let mut imports = Vec::new();
    let stream = ByteStream::new(data);

    let Some(import_offset) = super::rva_to_offset(import_dir_rva, sections) else {
        return imports;
    };

    let mut desc_offset = import_offset;
    loop {
        let Ok(desc_data) = stream.peek_data(desc_offset, IMPORT_DESCRIPTOR_SIZE) else {
            break;
        };
        let Ok(desc) = ImportDescriptor::parse(desc_data) else {
            break;
        };
        desc_offset += IMPORT_DESCRIPTOR_SIZE;

        // A zero name RVA terminates the descriptor list.
        if desc.name_rva == 0 {
            break;
        }

        let dll_name = match super::rva_to_offset(desc.name_rva, sections) {
            Some(name_offset) => stream.peek_cstring_at(name_offset).unwrap_or_default(),
            None => String::new(),
        };

        if dll_name.is_empty() {
            continue;
        }
        if !is_valid_dll_name(&dll_name) {
            warn!("discarding import descriptor with invalid DLL name {dll_name:?}");
            continue;
        }

        let entries = parse_entries(&stream, &desc, sections, bitness);
        imports.push(Import {
            dll_name,
            descriptor: desc,
            entries,
        });
    }

    imports
}

/// Walk the lookup and address tables of one descriptor in lockstep.
fn parse_entries(
    stream: &ByteStream<'_>,
    desc: &ImportDescriptor,
    sections: &[SectionHeader],
    bitness: Bitness,
) -> Vec<ImportEntry> {
    let mut entries = Vec::new();
    let ptr_size = bitness.pointer_size();
    let ordinal_flag = match bitness {
        Bitness::Bits32 => 1u64 << 31,
        Bitness::Bits64 => 1u64 << 63,
    };

    let ilt_offset = super::rva_to_offset(desc.import_lookup_table_rva, sections);
    let iat_offset = super::rva_to_offset(desc.import_address_table_rva, sections);
    // The lookup table is the source of truth; a missing one degrades to
    // the address table alone.
    let (Some(lookup_base), Some(address_base)) = (ilt_offset.or(iat_offset), iat_offset) else {
        return entries;
    };

    for idx in 0.. {
        let lookup = stream.peek_ptr(lookup_base + idx * ptr_size, bitness);
        let address = stream.peek_ptr(address_base + idx * ptr_size, bitness);
        let (Ok(lookup), Ok(address)) = (lookup, address) else {
            break;
        };
        if lookup == 0 && address == 0 {
            break;
        }

        let entry_data = if lookup != 0 { lookup } else { address };
        let rva = desc
            .import_address_table_rva
            .wrapping_add((idx * ptr_size) as u32);

        if entry_data & ordinal_flag != 0 {
            entries.push(ImportEntry {
                name: String::new(),
                ordinal: Some((entry_data & 0xFFFF) as u16),
                hint: 0,
                iat_value: address,
                data: entry_data,
                rva,
            });
            continue;
        }

        // Import by name: the entry points at a hint/name record.
        let hint_name_rva = entry_data as u32;
        let (hint, name) = match super::rva_to_offset(hint_name_rva, sections) {
            Some(hn_offset) => {
                let hint = stream.peek_u16(hn_offset).unwrap_or(0);
                let name = stream.peek_cstring_at(hn_offset + 2).unwrap_or_default();
                (hint, name)
            }
            None => (0, String::new()),
        };

        if name.is_empty() {
            continue;
        }
        if !is_printable(&name) {
            info!("discarding import entry with unprintable name at rva {hint_name_rva:#x}");
            continue;
        }

        entries.push(ImportEntry {
            name,
            ordinal: None,
            hint,
            iat_value: address,
            data: entry_data,
            rva,
        });
    }

    entries
}

/// A usable DLL name is printable and at least four characters long.
fn is_valid_dll_name(name: &str) -> bool {
    name.len() >= MIN_DLL_NAME_LEN && is_printable(name)
}

fn is_printable(name: &str) -> bool {
    name.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dll_name_validation() {
        assert!(is_valid_dll_name("kernel32.dll"));
        assert!(is_valid_dll_name("a.so"));
        assert!(!is_valid_dll_name("ab"));
        assert!(!is_valid_dll_name("bad\x01name.dll"));
    }

    #[test]
    fn test_descriptor_parse() {
        let mut data = vec![0u8; IMPORT_DESCRIPTOR_SIZE];
        data[0..4].copy_from_slice(&0x2000u32.to_le_bytes());
        data[12..16].copy_from_slice(&0x2100u32.to_le_bytes());
        data[16..20].copy_from_slice(&0x2200u32.to_le_bytes());

        let desc = ImportDescriptor::parse(&data).unwrap();
        assert_eq!(desc.import_lookup_table_rva, 0x2000);
        assert_eq!(desc.name_rva, 0x2100);
        assert_eq!(desc.import_address_table_rva, 0x2200);
    }
}
