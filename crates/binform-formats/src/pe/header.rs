//! PE header parsing.

use crate::ParseError;

/// DOS header magic number ("MZ")
pub const DOS_MAGIC: u16 = 0x5A4D;

/// PE signature ("PE\0\0")
pub const PE_SIGNATURE: u32 = 0x00004550;

/// Machine types
pub const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
pub const IMAGE_FILE_MACHINE_ARM64: u16 = 0xAA64;
pub const IMAGE_FILE_MACHINE_ARM: u16 = 0x01c0;

/// PE32 magic
pub const PE32_MAGIC: u16 = 0x10b;
/// PE32+ (64-bit) magic
pub const PE32PLUS_MAGIC: u16 = 0x20b;

/// Characteristics flags
pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
pub const IMAGE_FILE_DLL: u16 = 0x2000;

/// Number of data directory slots in the optional header.
///
/// Canonical PE value. The directory table is always materialized with
/// this many slots; `number_of_rva_and_sizes` only bounds how many are
/// decoded from disk.
pub const NUM_DATA_DIRECTORIES: usize = 16;

/// Size of the fixed part of the optional header (before directories).
pub const OPTIONAL_HEADER_32_SIZE: usize = 96;
pub const OPTIONAL_HEADER_64_SIZE: usize = 112;

/// DOS Header (64 bytes)
#[derive(Debug, Clone)]
pub struct DosHeader {
    /// Magic number (MZ)
    pub e_magic: u16,
    /// Offset to PE header
    pub e_lfanew: u32,
}

impl DosHeader {
    /// Parse DOS header from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 64 {
            return Err(ParseError::too_short(64, data.len()));
        }

        let e_magic = u16::from_le_bytes([data[0], data[1]]);
        if e_magic != DOS_MAGIC {
            return Err(ParseError::invalid_magic("MZ", &data[0..2]));
        }

        let e_lfanew = u32::from_le_bytes([data[60], data[61], data[62], data[63]]);

        Ok(Self { e_magic, e_lfanew })
    }
}

/// COFF File Header (20 bytes)
#[derive(Debug, Clone)]
pub struct CoffHeader {
    /// Machine type
    pub machine: u16,
    /// Number of sections
    pub number_of_sections: u16,
    /// Time stamp
    pub time_date_stamp: u32,
    /// Pointer to symbol table
    pub pointer_to_symbol_table: u32,
    /// Number of symbols
    pub number_of_symbols: u32,
    /// Size of optional header
    pub size_of_optional_header: u16,
    /// Characteristics
    pub characteristics: u16,
}

impl CoffHeader {
    /// Parse COFF header from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 20 {
            return Err(ParseError::too_short(20, data.len()));
        }

        Ok(Self {
            machine: u16::from_le_bytes([data[0], data[1]]),
            number_of_sections: u16::from_le_bytes([data[2], data[3]]),
            time_date_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            pointer_to_symbol_table: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            number_of_symbols: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            size_of_optional_header: u16::from_le_bytes([data[16], data[17]]),
            characteristics: u16::from_le_bytes([data[18], data[19]]),
        })
    }

    /// Returns true if this is an executable.
    pub fn is_executable(&self) -> bool {
        self.characteristics & IMAGE_FILE_EXECUTABLE_IMAGE != 0
    }

    /// Returns true if this is a DLL.
    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }
}

/// Directory kinds, assigned by slot index in the optional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirectoryKind {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TlsTable,
    LoadConfigTable,
    BoundImport,
    ImportAddressTable,
    DelayImportDescriptor,
    ClrRuntimeHeader,
    Reserved,
}

impl DataDirectoryKind {
    /// Maps a slot index to its directory kind.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::ExportTable,
            1 => Self::ImportTable,
            2 => Self::ResourceTable,
            3 => Self::ExceptionTable,
            4 => Self::CertificateTable,
            5 => Self::BaseRelocationTable,
            6 => Self::Debug,
            7 => Self::Architecture,
            8 => Self::GlobalPtr,
            9 => Self::TlsTable,
            10 => Self::LoadConfigTable,
            11 => Self::BoundImport,
            12 => Self::ImportAddressTable,
            13 => Self::DelayImportDescriptor,
            14 => Self::ClrRuntimeHeader,
            _ => Self::Reserved,
        }
    }
}

/// A data directory slot.
///
/// The kind comes from the slot's position in the table, never from the
/// on-disk bytes. `section_index` is a weak link into the binary's
/// section table (the section containing `rva`), when one exists.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    /// Virtual address (RVA), or a raw file offset for the certificate
    /// table.
    pub rva: u32,
    /// Size in bytes.
    pub size: u32,
    /// Directory kind, by slot index.
    pub kind: DataDirectoryKind,
    /// Index of the section containing `rva`, when resolvable.
    pub section_index: Option<usize>,
}

impl DataDirectory {
    /// Parse the raw `{ rva, size }` pair of slot `index`.
    pub fn parse(data: &[u8], index: usize) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::too_short(8, data.len()));
        }
        Ok(Self {
            rva: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            kind: DataDirectoryKind::from_index(index),
            section_index: None,
        })
    }

    /// Returns true if the directory slot is populated.
    pub fn is_present(&self) -> bool {
        self.rva != 0
    }
}

/// Optional Header, fixed part only.
///
/// The data directory array that follows on disk is decoded by the parse
/// driver, not here.
#[derive(Debug, Clone)]
pub struct OptionalHeader {
    /// Magic (PE32 or PE32+)
    pub magic: u16,
    /// Major linker version
    pub major_linker_version: u8,
    /// Minor linker version
    pub minor_linker_version: u8,
    /// Size of code section
    pub size_of_code: u32,
    /// Size of initialized data
    pub size_of_initialized_data: u32,
    /// Size of uninitialized data
    pub size_of_uninitialized_data: u32,
    /// Entry point RVA
    pub address_of_entry_point: u32,
    /// Base of code
    pub base_of_code: u32,
    /// Base of data (PE32 only, 0 for PE32+)
    pub base_of_data: u32,
    /// Image base address
    pub image_base: u64,
    /// Section alignment
    pub section_alignment: u32,
    /// File alignment
    pub file_alignment: u32,
    /// Major OS version
    pub major_operating_system_version: u16,
    /// Minor OS version
    pub minor_operating_system_version: u16,
    /// Major image version
    pub major_image_version: u16,
    /// Minor image version
    pub minor_image_version: u16,
    /// Major subsystem version
    pub major_subsystem_version: u16,
    /// Minor subsystem version
    pub minor_subsystem_version: u16,
    /// Size of image
    pub size_of_image: u32,
    /// Size of headers
    pub size_of_headers: u32,
    /// Checksum
    pub checksum: u32,
    /// Subsystem
    pub subsystem: u16,
    /// DLL characteristics
    pub dll_characteristics: u16,
    /// Size of stack reserve
    pub size_of_stack_reserve: u64,
    /// Size of stack commit
    pub size_of_stack_commit: u64,
    /// Size of heap reserve
    pub size_of_heap_reserve: u64,
    /// Size of heap commit
    pub size_of_heap_commit: u64,
    /// Number of data directories declared on disk
    pub number_of_rva_and_sizes: u32,
}

impl OptionalHeader {
    /// Parse PE32 optional header.
    pub fn parse_pe32(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < OPTIONAL_HEADER_32_SIZE {
            return Err(ParseError::too_short(OPTIONAL_HEADER_32_SIZE, data.len()));
        }

        let magic = u16::from_le_bytes([data[0], data[1]]);
        if magic != PE32_MAGIC {
            return Err(ParseError::invalid_magic("PE32 (0x10b)", &data[0..2]));
        }

        Ok(Self {
            magic,
            major_linker_version: data[2],
            minor_linker_version: data[3],
            size_of_code: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            size_of_initialized_data: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            size_of_uninitialized_data: u32::from_le_bytes([
                data[12], data[13], data[14], data[15],
            ]),
            address_of_entry_point: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            base_of_code: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            base_of_data: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
            image_base: u32::from_le_bytes([data[28], data[29], data[30], data[31]]) as u64,
            section_alignment: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            file_alignment: u32::from_le_bytes([data[36], data[37], data[38], data[39]]),
            major_operating_system_version: u16::from_le_bytes([data[40], data[41]]),
            minor_operating_system_version: u16::from_le_bytes([data[42], data[43]]),
            major_image_version: u16::from_le_bytes([data[44], data[45]]),
            minor_image_version: u16::from_le_bytes([data[46], data[47]]),
            major_subsystem_version: u16::from_le_bytes([data[48], data[49]]),
            minor_subsystem_version: u16::from_le_bytes([data[50], data[51]]),
            size_of_image: u32::from_le_bytes([data[56], data[57], data[58], data[59]]),
            size_of_headers: u32::from_le_bytes([data[60], data[61], data[62], data[63]]),
            checksum: u32::from_le_bytes([data[64], data[65], data[66], data[67]]),
            subsystem: u16::from_le_bytes([data[68], data[69]]),
            dll_characteristics: u16::from_le_bytes([data[70], data[71]]),
            size_of_stack_reserve: u32::from_le_bytes([data[72], data[73], data[74], data[75]])
                as u64,
            size_of_stack_commit: u32::from_le_bytes([data[76], data[77], data[78], data[79]])
                as u64,
            size_of_heap_reserve: u32::from_le_bytes([data[80], data[81], data[82], data[83]])
                as u64,
            size_of_heap_commit: u32::from_le_bytes([data[84], data[85], data[86], data[87]])
                as u64,
            number_of_rva_and_sizes: u32::from_le_bytes([data[92], data[93], data[94], data[95]]),
        })
    }

    /// Parse PE32+ (64-bit) optional header.
    pub fn parse_pe32plus(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < OPTIONAL_HEADER_64_SIZE {
            return Err(ParseError::too_short(OPTIONAL_HEADER_64_SIZE, data.len()));
        }

        let magic = u16::from_le_bytes([data[0], data[1]]);
        if magic != PE32PLUS_MAGIC {
            return Err(ParseError::invalid_magic("PE32+ (0x20b)", &data[0..2]));
        }

        let read_u64 = |offset: usize| -> u64 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        };

        Ok(Self {
            magic,
            major_linker_version: data[2],
            minor_linker_version: data[3],
            size_of_code: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            size_of_initialized_data: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            size_of_uninitialized_data: u32::from_le_bytes([
                data[12], data[13], data[14], data[15],
            ]),
            address_of_entry_point: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            base_of_code: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            base_of_data: 0,
            image_base: read_u64(24),
            section_alignment: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            file_alignment: u32::from_le_bytes([data[36], data[37], data[38], data[39]]),
            major_operating_system_version: u16::from_le_bytes([data[40], data[41]]),
            minor_operating_system_version: u16::from_le_bytes([data[42], data[43]]),
            major_image_version: u16::from_le_bytes([data[44], data[45]]),
            minor_image_version: u16::from_le_bytes([data[46], data[47]]),
            major_subsystem_version: u16::from_le_bytes([data[48], data[49]]),
            minor_subsystem_version: u16::from_le_bytes([data[50], data[51]]),
            size_of_image: u32::from_le_bytes([data[56], data[57], data[58], data[59]]),
            size_of_headers: u32::from_le_bytes([data[60], data[61], data[62], data[63]]),
            checksum: u32::from_le_bytes([data[64], data[65], data[66], data[67]]),
            subsystem: u16::from_le_bytes([data[68], data[69]]),
            dll_characteristics: u16::from_le_bytes([data[70], data[71]]),
            size_of_stack_reserve: read_u64(72),
            size_of_stack_commit: read_u64(80),
            size_of_heap_reserve: read_u64(88),
            size_of_heap_commit: read_u64(96),
            number_of_rva_and_sizes: u32::from_le_bytes([
                data[108], data[109], data[110], data[111],
            ]),
        })
    }

    /// Returns true if this is PE32+.
    pub fn is_64bit(&self) -> bool {
        self.magic == PE32PLUS_MAGIC
    }

    /// Size of the fixed header part for this variant.
    pub fn fixed_size(&self) -> usize {
        if self.is_64bit() {
            OPTIONAL_HEADER_64_SIZE
        } else {
            OPTIONAL_HEADER_32_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_kind_by_index() {
        assert_eq!(DataDirectoryKind::from_index(0), DataDirectoryKind::ExportTable);
        assert_eq!(DataDirectoryKind::from_index(1), DataDirectoryKind::ImportTable);
        assert_eq!(DataDirectoryKind::from_index(9), DataDirectoryKind::TlsTable);
        assert_eq!(DataDirectoryKind::from_index(15), DataDirectoryKind::Reserved);
        assert_eq!(DataDirectoryKind::from_index(99), DataDirectoryKind::Reserved);
    }

    #[test]
    fn test_dos_header_rejects_bad_magic() {
        let data = vec![0u8; 64];
        assert!(matches!(
            DosHeader::parse(&data),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_optional_header_magic_mismatch() {
        let mut data = vec![0u8; 112];
        data[0..2].copy_from_slice(&PE32_MAGIC.to_le_bytes());
        assert!(OptionalHeader::parse_pe32plus(&data).is_err());
        assert!(OptionalHeader::parse_pe32(&data).is_ok());
    }
}
