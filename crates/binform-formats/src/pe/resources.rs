//! PE resource directory parsing.
//!
//! Resources form a small tree (conventionally type / name / language).
//! The walk is depth-capped so cyclic directory offsets in hostile input
//! terminate.

use log::warn;

use super::section::SectionHeader;
use crate::{ByteStream, ParseError};

/// Size of a resource directory header.
pub const RESOURCE_DIRECTORY_SIZE: usize = 16;
/// Size of a resource directory entry.
pub const RESOURCE_ENTRY_SIZE: usize = 8;
/// Deepest directory nesting the walk will follow.
pub const MAX_RESOURCE_DEPTH: usize = 8;

/// Identifier of a resource entry: a UTF-16 name or a numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    Name(String),
    Id(u32),
}

/// A node in the resource tree.
#[derive(Debug, Clone)]
pub enum ResourceNode {
    /// A nested directory.
    Directory {
        id: ResourceId,
        directory: ResourceDirectory,
    },
    /// A data leaf.
    Data {
        id: ResourceId,
        /// RVA of the resource payload.
        rva: u32,
        /// Payload size.
        size: u32,
        /// Code page of the payload.
        code_page: u32,
    },
}

/// A resource directory with its child nodes.
#[derive(Debug, Clone)]
pub struct ResourceDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub number_of_named_entries: u16,
    pub number_of_id_entries: u16,
    /// Children, named entries first (table order).
    pub entries: Vec<ResourceNode>,
}

/// Parse the resource tree rooted at `resource_rva`.
pub fn parse_resources(
    data: &[u8],
    resource_rva: u32,
    sections: &[SectionHeader],
) -> Result<ResourceDirectory, ParseError> {
    let base_offset = super::rva_to_offset(resource_rva, sections)
        .ok_or(ParseError::NotFound("section containing resource directory"))?;
    let stream = ByteStream::new(data);
    parse_directory(&stream, base_offset, 0, 0)
}

fn parse_directory(
    stream: &ByteStream<'_>,
    base_offset: usize,
    relative: usize,
    depth: usize,
) -> Result<ResourceDirectory, ParseError> {
    let offset = base_offset + relative;
    let header = stream.peek_data(offset, RESOURCE_DIRECTORY_SIZE)?;

    let number_of_named_entries = u16::from_le_bytes([header[12], header[13]]);
    let number_of_id_entries = u16::from_le_bytes([header[14], header[15]]);
    let total = number_of_named_entries as usize + number_of_id_entries as usize;

    let mut directory = ResourceDirectory {
        characteristics: u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
        time_date_stamp: u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
        major_version: u16::from_le_bytes([header[8], header[9]]),
        minor_version: u16::from_le_bytes([header[10], header[11]]),
        number_of_named_entries,
        number_of_id_entries,
        entries: Vec::with_capacity(total.min(64)),
    };

    for i in 0..total {
        let entry_offset = offset + RESOURCE_DIRECTORY_SIZE + i * RESOURCE_ENTRY_SIZE;
        let (Ok(name_field), Ok(offset_field)) = (
            stream.peek_u32(entry_offset),
            stream.peek_u32(entry_offset + 4),
        ) else {
            break;
        };

        let id = if name_field & 0x8000_0000 != 0 {
            let name_offset = base_offset + (name_field & 0x7FFF_FFFF) as usize;
            ResourceId::Name(read_resource_name(stream, name_offset))
        } else {
            ResourceId::Id(name_field)
        };

        if offset_field & 0x8000_0000 != 0 {
            // Subdirectory
            if depth + 1 >= MAX_RESOURCE_DEPTH {
                warn!("resource tree deeper than {MAX_RESOURCE_DEPTH} levels, pruning");
                continue;
            }
            let sub_relative = (offset_field & 0x7FFF_FFFF) as usize;
            match parse_directory(stream, base_offset, sub_relative, depth + 1) {
                Ok(sub) => directory.entries.push(ResourceNode::Directory {
                    id,
                    directory: sub,
                }),
                Err(err) => {
                    warn!("unreadable resource subdirectory: {err}");
                }
            }
        } else {
            // Data entry: { data RVA, size, code page, reserved }
            let data_offset = base_offset + offset_field as usize;
            let (Ok(rva), Ok(size), Ok(code_page)) = (
                stream.peek_u32(data_offset),
                stream.peek_u32(data_offset + 4),
                stream.peek_u32(data_offset + 8),
            ) else {
                continue;
            };
            directory.entries.push(ResourceNode::Data {
                id,
                rva,
                size,
                code_page,
            });
        }
    }

    Ok(directory)
}

/// Resource names are length-prefixed UTF-16 strings.
fn read_resource_name(stream: &ByteStream<'_>, offset: usize) -> String {
    let Ok(len) = stream.peek_u16(offset) else {
        return String::new();
    };
    let mut units = Vec::with_capacity(len as usize);
    for i in 0..len as usize {
        match stream.peek_u16(offset + 2 + i * 2) {
            Ok(unit) => units.push(unit),
            Err(_) => break,
        }
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_directory_with_data_entry() {
        // A root directory with one id entry pointing at a data record.
        let mut image = vec![0u8; 64];
        image[14..16].copy_from_slice(&1u16.to_le_bytes()); // one id entry
        image[16..20].copy_from_slice(&6u32.to_le_bytes()); // id 6 (RT_STRING)
        image[20..24].copy_from_slice(&32u32.to_le_bytes()); // data record at +32
        image[32..36].copy_from_slice(&0x3000u32.to_le_bytes()); // payload rva
        image[36..40].copy_from_slice(&0x40u32.to_le_bytes()); // payload size

        let stream = ByteStream::new(&image);
        let directory = parse_directory(&stream, 0, 0, 0).unwrap();
        assert_eq!(directory.entries.len(), 1);
        match &directory.entries[0] {
            ResourceNode::Data { id, rva, size, .. } => {
                assert_eq!(*id, ResourceId::Id(6));
                assert_eq!(*rva, 0x3000);
                assert_eq!(*size, 0x40);
            }
            other => panic!("expected data node, got {other:?}"),
        }
    }

    #[test]
    fn test_self_referencing_directory_terminates() {
        // A directory whose single entry points back at itself.
        let mut image = vec![0u8; 32];
        image[14..16].copy_from_slice(&1u16.to_le_bytes());
        image[16..20].copy_from_slice(&1u32.to_le_bytes());
        image[20..24].copy_from_slice(&0x8000_0000u32.to_le_bytes()); // subdirectory at +0

        let stream = ByteStream::new(&image);
        // Must return rather than recurse forever.
        let directory = parse_directory(&stream, 0, 0, 0).unwrap();
        assert!(directory.entries.len() <= 1);
    }
}
