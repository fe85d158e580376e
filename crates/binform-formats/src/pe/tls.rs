//! PE TLS directory parsing.

use binform_core::Bitness;
use log::debug;

use super::section::SectionHeader;
use crate::{ByteStream, ParseError, MAX_DATA_SIZE};

/// Size of the on-disk TLS directory.
pub const TLS_DIRECTORY_32_SIZE: usize = 24;
pub const TLS_DIRECTORY_64_SIZE: usize = 40;

/// Upper bound on the TLS callback walk. Malformed lists without a zero
/// terminator stop here.
pub const MAX_TLS_CALLBACKS: usize = 4096;

/// Raw TLS directory record.
#[derive(Debug, Clone)]
pub struct TlsDirectory {
    /// VA of the start of the zero-initialization template.
    pub start_address_of_raw_data: u64,
    /// VA of the end of the template.
    pub end_address_of_raw_data: u64,
    /// VA of the TLS index slot.
    pub address_of_index: u64,
    /// VA of the NULL-terminated callback pointer array.
    pub address_of_callbacks: u64,
    /// Bytes to zero-fill past the template.
    pub size_of_zero_fill: u32,
    /// Alignment characteristics.
    pub characteristics: u32,
}

impl TlsDirectory {
    /// Parse a TLS directory record of the given width.
    pub fn parse(data: &[u8], bitness: Bitness) -> Result<Self, ParseError> {
        match bitness {
            Bitness::Bits32 => Self::parse_32(data),
            Bitness::Bits64 => Self::parse_64(data),
        }
    }

    fn parse_32(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < TLS_DIRECTORY_32_SIZE {
            return Err(ParseError::too_short(TLS_DIRECTORY_32_SIZE, data.len()));
        }
        let read_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };
        Ok(Self {
            start_address_of_raw_data: read_u32(0) as u64,
            end_address_of_raw_data: read_u32(4) as u64,
            address_of_index: read_u32(8) as u64,
            address_of_callbacks: read_u32(12) as u64,
            size_of_zero_fill: read_u32(16),
            characteristics: read_u32(20),
        })
    }

    fn parse_64(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < TLS_DIRECTORY_64_SIZE {
            return Err(ParseError::too_short(TLS_DIRECTORY_64_SIZE, data.len()));
        }
        let read_u64 = |offset: usize| -> u64 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        };
        Ok(Self {
            start_address_of_raw_data: read_u64(0),
            end_address_of_raw_data: read_u64(8),
            address_of_index: read_u64(16),
            address_of_callbacks: read_u64(24),
            size_of_zero_fill: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            characteristics: u32::from_le_bytes([data[36], data[37], data[38], data[39]]),
        })
    }
}

/// Parsed TLS information: the raw directory, the data template copied
/// out of the file, and the callback RVAs.
#[derive(Debug, Clone)]
pub struct Tls {
    /// The raw directory record.
    pub directory: TlsDirectory,
    /// Template bytes for new threads (empty if absent or oversized).
    pub data_template: Vec<u8>,
    /// Callback addresses, in array order.
    pub callbacks: Vec<u64>,
}

/// Parse the TLS directory at `tls_rva`.
pub fn parse_tls(
    data: &[u8],
    tls_rva: u32,
    sections: &[SectionHeader],
    bitness: Bitness,
    image_base: u64,
) -> Result<Tls, ParseError> {
    let stream = ByteStream::new(data);
    let offset = super::rva_to_offset(tls_rva, sections)
        .ok_or(ParseError::NotFound("section containing TLS directory"))?;

    let record_size = match bitness {
        Bitness::Bits32 => TLS_DIRECTORY_32_SIZE,
        Bitness::Bits64 => TLS_DIRECTORY_64_SIZE,
    };
    let directory = TlsDirectory::parse(stream.peek_data(offset, record_size)?, bitness)?;

    let data_template = read_template(&stream, &directory, sections, image_base);
    let callbacks = read_callbacks(&stream, &directory, sections, bitness, image_base);

    Ok(Tls {
        directory,
        data_template,
        callbacks,
    })
}

/// Copy the zero-initialization template, bounded by [`MAX_DATA_SIZE`].
fn read_template(
    stream: &ByteStream<'_>,
    directory: &TlsDirectory,
    sections: &[SectionHeader],
    image_base: u64,
) -> Vec<u8> {
    if directory.start_address_of_raw_data < image_base
        || directory.end_address_of_raw_data <= directory.start_address_of_raw_data
    {
        return Vec::new();
    }

    let size = (directory.end_address_of_raw_data - directory.start_address_of_raw_data) as usize;
    if size > MAX_DATA_SIZE {
        debug!("TLS data template of {size} bytes exceeds the in-memory cap, skipping");
        return Vec::new();
    }

    let start_rva = (directory.start_address_of_raw_data - image_base) as u32;
    let Some(start_offset) = super::rva_to_offset(start_rva, sections) else {
        return Vec::new();
    };

    stream
        .peek_data(start_offset, size)
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default()
}

/// Walk the callback pointer array, bounded by [`MAX_TLS_CALLBACKS`].
fn read_callbacks(
    stream: &ByteStream<'_>,
    directory: &TlsDirectory,
    sections: &[SectionHeader],
    bitness: Bitness,
    image_base: u64,
) -> Vec<u64> {
    let mut callbacks = Vec::new();
    if directory.address_of_callbacks <= image_base {
        return callbacks;
    }

    let callbacks_rva = (directory.address_of_callbacks - image_base) as u32;
    let Some(base_offset) = super::rva_to_offset(callbacks_rva, sections) else {
        return callbacks;
    };

    let ptr_size = bitness.pointer_size();
    for idx in 0..MAX_TLS_CALLBACKS {
        let Ok(value) = stream.peek_ptr(base_offset + idx * ptr_size, bitness) else {
            break;
        };
        if value == 0 {
            break;
        }
        callbacks.push(value);
    }

    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tls_directory_64() {
        let mut data = vec![0u8; TLS_DIRECTORY_64_SIZE];
        data[0..8].copy_from_slice(&0x140002000u64.to_le_bytes());
        data[8..16].copy_from_slice(&0x140002010u64.to_le_bytes());
        data[24..32].copy_from_slice(&0x140002020u64.to_le_bytes());

        let dir = TlsDirectory::parse(&data, Bitness::Bits64).unwrap();
        assert_eq!(dir.start_address_of_raw_data, 0x140002000);
        assert_eq!(dir.end_address_of_raw_data, 0x140002010);
        assert_eq!(dir.address_of_callbacks, 0x140002020);
    }

    #[test]
    fn test_parse_tls_directory_too_short() {
        let data = vec![0u8; 8];
        assert!(TlsDirectory::parse(&data, Bitness::Bits32).is_err());
        assert!(TlsDirectory::parse(&data, Bitness::Bits64).is_err());
    }
}
