//! COFF symbol table parsing.

use binform_core::{Symbol, SymbolBinding, SymbolKind};

use crate::{ByteStream, ParseError};

/// Size of one COFF symbol record.
pub const COFF_SYMBOL_SIZE: usize = 18;

// Storage classes
pub const IMAGE_SYM_CLASS_EXTERNAL: u8 = 2;
pub const IMAGE_SYM_CLASS_STATIC: u8 = 3;
pub const IMAGE_SYM_CLASS_FILE: u8 = 103;

// Complex type: function
const IMAGE_SYM_DTYPE_FUNCTION: u16 = 2;

/// Parse the COFF symbol table.
///
/// A declared symbol count whose table would run past the end of the
/// file is treated as corrupted input.
pub fn parse_symbols(
    data: &[u8],
    table_offset: u32,
    symbol_count: u32,
) -> Result<Vec<Symbol>, ParseError> {
    let stream = ByteStream::new(data);
    let table_offset = table_offset as usize;
    let table_size = symbol_count as usize * COFF_SYMBOL_SIZE;

    let table_end = table_offset
        .checked_add(table_size)
        .ok_or(ParseError::Overflow {
            context: "COFF symbol table",
        })?;
    if table_end > data.len() {
        return Err(ParseError::invalid_structure(
            "COFF symbol table",
            table_offset as u64,
            format!("{symbol_count} symbols run past the end of the file"),
        ));
    }

    // The string table starts right after the symbol table; its first
    // dword is its own length.
    let strtab_offset = table_end;

    let mut symbols = Vec::new();
    let mut index = 0usize;
    while index < symbol_count as usize {
        let offset = table_offset + index * COFF_SYMBOL_SIZE;
        let record = stream.peek_data(offset, COFF_SYMBOL_SIZE)?;

        let name = symbol_name(&stream, record, strtab_offset);
        let value = u32::from_le_bytes([record[8], record[9], record[10], record[11]]);
        let section_number = i16::from_le_bytes([record[12], record[13]]);
        let sym_type = u16::from_le_bytes([record[14], record[15]]);
        let storage_class = record[16];
        let aux_count = record[17] as usize;

        let kind = if storage_class == IMAGE_SYM_CLASS_FILE {
            SymbolKind::File
        } else if (sym_type >> 4) == IMAGE_SYM_DTYPE_FUNCTION {
            SymbolKind::Function
        } else if section_number > 0 {
            SymbolKind::Object
        } else {
            SymbolKind::None
        };
        let binding = match storage_class {
            IMAGE_SYM_CLASS_EXTERNAL => SymbolBinding::Global,
            IMAGE_SYM_CLASS_STATIC => SymbolBinding::Local,
            other => SymbolBinding::Other(other),
        };

        symbols.push(Symbol {
            name,
            address: value as u64,
            size: 0,
            kind,
            binding,
            section_index: (section_number > 0).then(|| section_number as u32 - 1),
        });

        // Auxiliary records follow the symbol they describe.
        index += 1 + aux_count;
    }

    Ok(symbols)
}

/// Short names live inline; long names are offsets into the string table.
fn symbol_name(stream: &ByteStream<'_>, record: &[u8], strtab_offset: usize) -> String {
    let name_bytes = &record[0..8];
    if name_bytes[0..4] == [0, 0, 0, 0] {
        let offset = u32::from_le_bytes([name_bytes[4], name_bytes[5], name_bytes[6], name_bytes[7]]);
        return stream
            .peek_cstring_at(strtab_offset + offset as usize)
            .unwrap_or_default();
    }
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(8);
    String::from_utf8_lossy(&name_bytes[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_symbol_count_is_corrupted() {
        let data = vec![0u8; 64];
        let result = parse_symbols(&data, 0, 1000);
        assert!(matches!(result, Err(ParseError::InvalidStructure { .. })));
    }

    #[test]
    fn test_parse_inline_name_symbol() {
        let mut data = vec![0u8; COFF_SYMBOL_SIZE + 4];
        data[0..5].copy_from_slice(b"_main");
        data[8..12].copy_from_slice(&0x1000u32.to_le_bytes()); // value
        data[12..14].copy_from_slice(&1i16.to_le_bytes()); // section 1
        data[14..16].copy_from_slice(&0x20u16.to_le_bytes()); // function
        data[16] = IMAGE_SYM_CLASS_EXTERNAL;

        let symbols = parse_symbols(&data, 0, 1).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "_main");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert!(symbols[0].is_global());
        assert_eq!(symbols[0].section_index, Some(0));
    }
}
