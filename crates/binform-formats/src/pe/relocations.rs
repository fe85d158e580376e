//! PE base relocation parsing.

use log::warn;

use super::section::SectionHeader;
use crate::ByteStream;

/// Size of a relocation block header.
pub const RELOCATION_BLOCK_HEADER_SIZE: usize = 8;

// Relocation entry types
pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
pub const IMAGE_REL_BASED_HIGHLOW: u8 = 3;
pub const IMAGE_REL_BASED_DIR64: u8 = 10;

/// One base-relocation block, covering a 4 KiB page.
#[derive(Debug, Clone)]
pub struct RelocationBlock {
    /// RVA of the page this block relocates.
    pub page_rva: u32,
    /// Declared block size, header included.
    pub block_size: u32,
    /// Entries in this block.
    pub entries: Vec<RelocationEntry>,
}

/// A single relocation: 4 bits of type, 12 bits of page offset.
#[derive(Debug, Clone, Copy)]
pub struct RelocationEntry {
    /// Relocation type.
    pub kind: u8,
    /// Offset within the block's page.
    pub offset: u16,
}

impl RelocationEntry {
    fn from_raw(raw: u16) -> Self {
        Self {
            kind: (raw >> 12) as u8,
            offset: raw & 0x0FFF,
        }
    }
}

/// Walk the base relocation directory.
pub fn parse_relocations(
    data: &[u8],
    reloc_rva: u32,
    reloc_size: u32,
    sections: &[SectionHeader],
) -> Vec<RelocationBlock> {
    let mut blocks = Vec::new();
    let stream = ByteStream::new(data);

    let Some(base_offset) = super::rva_to_offset(reloc_rva, sections) else {
        return blocks;
    };

    let mut consumed = 0usize;
    while consumed + RELOCATION_BLOCK_HEADER_SIZE <= reloc_size as usize {
        let offset = base_offset + consumed;
        let (Ok(page_rva), Ok(block_size)) =
            (stream.peek_u32(offset), stream.peek_u32(offset + 4))
        else {
            break;
        };

        if (block_size as usize) < RELOCATION_BLOCK_HEADER_SIZE || block_size % 2 != 0 {
            warn!(
                "malformed relocation block at rva {:#x}, stopping",
                reloc_rva as u64 + consumed as u64
            );
            break;
        }

        let entry_count = (block_size as usize - RELOCATION_BLOCK_HEADER_SIZE) / 2;
        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let Ok(raw) = stream.peek_u16(offset + RELOCATION_BLOCK_HEADER_SIZE + i * 2) else {
                break;
            };
            entries.push(RelocationEntry::from_raw(raw));
        }

        blocks.push(RelocationBlock {
            page_rva,
            block_size,
            entries,
        });
        consumed += block_size as usize;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_unpacking() {
        let entry = RelocationEntry::from_raw(0xA123);
        assert_eq!(entry.kind, IMAGE_REL_BASED_DIR64);
        assert_eq!(entry.offset, 0x123);

        let absolute = RelocationEntry::from_raw(0x0000);
        assert_eq!(absolute.kind, IMAGE_REL_BASED_ABSOLUTE);
    }
}
