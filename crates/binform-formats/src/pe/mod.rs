//! PE (Portable Executable) format parser.
//!
//! This module provides a PE parser for Windows executables and DLLs,
//! supporting:
//! - PE32 (32-bit) and PE32+ (64-bit)
//! - Section parsing and the full 16-slot data directory table
//! - Imports, exports, TLS, load configuration, base relocations,
//!   debug records, resources and Authenticode certificates
//!
//! Parsing is tolerant: only the header chain is mandatory. Every later
//! step runs inside its own failure boundary and degrades to a logged
//! warning, so a corrupted import table still yields a usable binary
//! with the sections and whatever else decoded cleanly.

mod debug;
mod exports;
mod header;
mod imports;
mod load_config;
mod relocations;
mod resources;
mod rich_header;
mod section;
mod signature;
mod symbols;
mod tls;

pub use debug::{parse_debug, DebugEntry, IMAGE_DEBUG_TYPE_CODEVIEW};
pub use exports::{parse_exports, Export, ExportDirectory};
pub use header::{
    CoffHeader, DataDirectory, DataDirectoryKind, DosHeader, OptionalHeader,
    IMAGE_FILE_MACHINE_AMD64, IMAGE_FILE_MACHINE_ARM64, IMAGE_FILE_MACHINE_I386,
    NUM_DATA_DIRECTORIES, PE32PLUS_MAGIC, PE32_MAGIC, PE_SIGNATURE,
};
pub use imports::{parse_imports, Import, ImportDescriptor, ImportEntry};
pub use load_config::{parse_load_config, LoadConfigVersion, LoadConfiguration};
pub use relocations::{parse_relocations, RelocationBlock, RelocationEntry};
pub use resources::{parse_resources, ResourceDirectory, ResourceId, ResourceNode};
pub use rich_header::{parse_rich_header, RichEntry, RichHeader};
pub use section::SectionHeader;
pub use signature::{parse_certificates, AttributeCertificate};
pub use symbols::parse_symbols;
pub use tls::{parse_tls, Tls, TlsDirectory, MAX_TLS_CALLBACKS};

use binform_core::{Architecture, Bitness, Endianness, Symbol};
use log::warn;

use crate::{BinaryFormat, ByteStream, ParseError, Section, MAX_DATA_SIZE};

/// A parsed PE binary.
///
/// Optional parts are populated only when their sub-parser succeeded;
/// check the `has_*` accessors before relying on them.
#[derive(Debug)]
pub struct Pe<'a> {
    /// Raw file data
    data: &'a [u8],
    /// DOS header
    pub dos_header: DosHeader,
    /// DOS stub program (between the DOS header and the PE header)
    pub dos_stub: Vec<u8>,
    /// Rich header, when one exists
    pub rich_header: Option<RichHeader>,
    /// COFF header
    pub coff_header: CoffHeader,
    /// Optional header
    pub optional_header: OptionalHeader,
    /// Section headers
    pub sections: Vec<SectionHeader>,
    /// The 16-slot data directory table
    pub data_directories: Vec<DataDirectory>,
    /// Imports grouped by DLL
    pub imports: Vec<Import>,
    /// Exported functions
    pub exports: Vec<Export>,
    /// TLS directory
    pub tls: Option<Tls>,
    /// Load configuration
    pub load_configuration: Option<LoadConfiguration>,
    /// Base relocation blocks
    pub relocations: Vec<RelocationBlock>,
    /// Debug directory records
    pub debug_entries: Vec<DebugEntry>,
    /// Resource tree root
    pub resources: Option<ResourceDirectory>,
    /// Attribute certificates (Authenticode)
    pub certificates: Vec<AttributeCertificate>,
    /// File offset of trailing data not covered by any section
    pub overlay_offset: Option<u64>,
    /// COFF symbols
    symbols: Vec<Symbol>,
}

impl<'a> Pe<'a> {
    /// Parse a PE file, selecting PE32 or PE32+ from the optional-header
    /// magic.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        let dos_header = DosHeader::parse(data)?;
        let opt_offset = dos_header.e_lfanew as usize + 4 + 20;
        let magic = ByteStream::new(data).peek_u16(opt_offset)?;
        let bitness = if magic == PE32PLUS_MAGIC {
            Bitness::Bits64
        } else {
            Bitness::Bits32
        };
        Self::parse_with(data, bitness)
    }

    /// Parse a PE file as the given variant.
    ///
    /// Header parsing is mandatory; any failure there aborts the parse.
    /// Every later step degrades to a warning.
    pub fn parse_with(data: &'a [u8], bitness: Bitness) -> Result<Self, ParseError> {
        // Step 1: the header chain. Failures here are fatal.
        let (dos_header, coff_header, optional_header) = Self::parse_headers(data, bitness)?;

        let pe_offset = dos_header.e_lfanew as usize;
        let opt_offset = pe_offset + 4 + 20;

        let mut pe = Self {
            data,
            dos_header,
            dos_stub: Vec::new(),
            rich_header: None,
            coff_header,
            optional_header,
            sections: Vec::new(),
            data_directories: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            tls: None,
            load_configuration: None,
            relocations: Vec::new(),
            debug_entries: Vec::new(),
            resources: None,
            certificates: Vec::new(),
            overlay_offset: None,
            symbols: Vec::new(),
        };

        // Steps 2..7 each run inside their own failure boundary.
        if let Some(stub) = warn_on_failure("DOS stub", pe.read_dos_stub()) {
            pe.dos_stub = stub;
        }

        if let Some(rich) = warn_on_failure("rich header", parse_rich_header(data, pe_offset)) {
            pe.rich_header = rich;
        }

        if let Some(sections) = warn_on_failure("section table", pe.read_sections(opt_offset)) {
            pe.sections = sections;
        }

        if let Some(directories) = warn_on_failure(
            "data directories",
            pe.read_data_directories(opt_offset),
        ) {
            pe.data_directories = directories;
            pe.dispatch_directories(bitness);
        }

        if pe.coff_header.pointer_to_symbol_table != 0 && pe.coff_header.number_of_symbols != 0 {
            if let Some(symbols) = warn_on_failure(
                "COFF symbol table",
                parse_symbols(
                    data,
                    pe.coff_header.pointer_to_symbol_table,
                    pe.coff_header.number_of_symbols,
                ),
            ) {
                pe.symbols = symbols;
            }
        }

        pe.find_overlay();

        Ok(pe)
    }

    /// Decode the DOS, COFF and optional headers. This is the only
    /// mandatory part of the pipeline.
    fn parse_headers(
        data: &[u8],
        bitness: Bitness,
    ) -> Result<(DosHeader, CoffHeader, OptionalHeader), ParseError> {
        let dos_header = DosHeader::parse(data)?;
        let stream = ByteStream::new(data);

        let pe_offset = dos_header.e_lfanew as usize;
        let pe_sig = stream.peek_u32(pe_offset)?;
        if pe_sig != PE_SIGNATURE {
            return Err(ParseError::invalid_magic(
                "PE\\0\\0",
                stream.peek_data(pe_offset, 4)?,
            ));
        }

        let coff_offset = pe_offset + 4;
        let coff_header = CoffHeader::parse(stream.peek_data(coff_offset, 20)?)?;

        let opt_offset = coff_offset + 20;
        let opt_size = match bitness {
            Bitness::Bits32 => header::OPTIONAL_HEADER_32_SIZE,
            Bitness::Bits64 => header::OPTIONAL_HEADER_64_SIZE,
        };
        let opt_data = stream.peek_data(opt_offset, opt_size)?;
        let optional_header = match bitness {
            Bitness::Bits32 => OptionalHeader::parse_pe32(opt_data)?,
            Bitness::Bits64 => OptionalHeader::parse_pe32plus(opt_data)?,
        };

        Ok((dos_header, coff_header, optional_header))
    }

    /// The DOS stub program sits between the DOS header and the PE
    /// header.
    fn read_dos_stub(&self) -> Result<Vec<u8>, ParseError> {
        let start = 64usize;
        let end = self.dos_header.e_lfanew as usize;
        if end < start {
            return Err(ParseError::invalid_structure(
                "DOS stub",
                start as u64,
                "PE header overlaps the DOS header",
            ));
        }
        let size = end - start;
        if size > MAX_DATA_SIZE {
            return Err(ParseError::invalid_structure(
                "DOS stub",
                start as u64,
                format!("stub of {size} bytes exceeds the in-memory cap"),
            ));
        }
        let stream = ByteStream::new(self.data);
        Ok(stream.peek_data(start, size)?.to_vec())
    }

    fn read_sections(&self, opt_offset: usize) -> Result<Vec<SectionHeader>, ParseError> {
        let sections_offset = opt_offset + self.coff_header.size_of_optional_header as usize;
        let count = self.coff_header.number_of_sections as usize;

        if sections_offset + count * section::SECTION_HEADER_SIZE > self.data.len() {
            return Err(ParseError::invalid_structure(
                "section table",
                sections_offset as u64,
                format!("{count} declared sections run past the end of the file"),
            ));
        }

        let image_base = self.optional_header.image_base;
        let mut sections = Vec::with_capacity(count);
        for i in 0..count {
            let offset = sections_offset + i * section::SECTION_HEADER_SIZE;
            let mut section = SectionHeader::parse(&self.data[offset..])?;
            section.populate_data(self.data, image_base);
            sections.push(section);
        }
        Ok(sections)
    }

    /// Decode the 16-slot directory table and bind each present slot to
    /// the section containing its RVA.
    ///
    /// The PE specification mandates a null final entry, but real-world
    /// samples exist whose last entry is populated, so no terminator is
    /// enforced: every slot is read.
    fn read_data_directories(&self, opt_offset: usize) -> Result<Vec<DataDirectory>, ParseError> {
        let dir_offset = opt_offset + self.optional_header.fixed_size();
        let on_disk = (self.optional_header.number_of_rva_and_sizes as usize)
            .min(NUM_DATA_DIRECTORIES);

        let stream = ByteStream::new(self.data);
        let mut directories = Vec::with_capacity(NUM_DATA_DIRECTORIES);
        for index in 0..NUM_DATA_DIRECTORIES {
            let mut directory = if index < on_disk {
                let raw = stream.peek_data(dir_offset + index * 8, 8)?;
                DataDirectory::parse(raw, index)?
            } else {
                DataDirectory {
                    rva: 0,
                    size: 0,
                    kind: DataDirectoryKind::from_index(index),
                    section_index: None,
                }
            };

            // The certificate slot holds a file offset, never an RVA.
            if directory.is_present() && directory.kind != DataDirectoryKind::CertificateTable {
                directory.section_index = self
                    .sections
                    .iter()
                    .position(|s| s.contains_rva(directory.rva));
                if directory.section_index.is_none() {
                    warn!(
                        "{:?} directory rva {:#x} is not covered by any section",
                        directory.kind, directory.rva
                    );
                }
            }
            directories.push(directory);
        }
        Ok(directories)
    }

    /// Run each present directory through its sub-parser, each inside its
    /// own failure boundary, and tag bound sections with their role.
    fn dispatch_directories(&mut self, bitness: Bitness) {
        for index in 0..self.data_directories.len() {
            let directory = self.data_directories[index].clone();
            if !directory.is_present() {
                continue;
            }

            if let Some(section_index) = directory.section_index {
                if let Some(section) = self.sections.get_mut(section_index) {
                    section.tag_kind(directory.kind);
                }
            }

            match directory.kind {
                DataDirectoryKind::ImportTable => {
                    self.imports =
                        parse_imports(self.data, directory.rva, &self.sections, bitness);
                }
                DataDirectoryKind::ExportTable => {
                    self.exports = parse_exports(
                        self.data,
                        directory.rva,
                        directory.size,
                        &self.sections,
                    );
                }
                DataDirectoryKind::CertificateTable => {
                    self.certificates =
                        parse_certificates(self.data, directory.rva, directory.size);
                }
                DataDirectoryKind::TlsTable => {
                    self.tls = warn_on_failure(
                        "TLS directory",
                        parse_tls(
                            self.data,
                            directory.rva,
                            &self.sections,
                            bitness,
                            self.optional_header.image_base,
                        ),
                    );
                }
                DataDirectoryKind::LoadConfigTable => {
                    self.load_configuration = warn_on_failure(
                        "load configuration",
                        parse_load_config(self.data, directory.rva, &self.sections, bitness),
                    );
                }
                DataDirectoryKind::BaseRelocationTable => {
                    self.relocations = parse_relocations(
                        self.data,
                        directory.rva,
                        directory.size,
                        &self.sections,
                    );
                }
                DataDirectoryKind::Debug => {
                    self.debug_entries =
                        parse_debug(self.data, directory.rva, directory.size, &self.sections);
                }
                DataDirectoryKind::ResourceTable => {
                    self.resources = warn_on_failure(
                        "resource directory",
                        parse_resources(self.data, directory.rva, &self.sections),
                    );
                }
                _ => {}
            }
        }
    }

    /// Locate trailing bytes past everything the section table and the
    /// certificate table cover.
    fn find_overlay(&mut self) {
        let mut end = self.optional_header.size_of_headers as u64;
        for section in &self.sections {
            end = end.max(section.raw_data_end());
        }
        if let Some(cert_dir) = self.data_directory(DataDirectoryKind::CertificateTable) {
            if cert_dir.is_present() {
                end = end.max(u64::from(cert_dir.rva) + u64::from(cert_dir.size));
            }
        }
        if end < self.data.len() as u64 {
            self.overlay_offset = Some(end);
        }
    }

    /// Get a data directory by kind.
    pub fn data_directory(&self, kind: DataDirectoryKind) -> Option<&DataDirectory> {
        self.data_directories.iter().find(|d| d.kind == kind)
    }

    /// Returns true if this is a 64-bit PE.
    pub fn is_64bit(&self) -> bool {
        self.optional_header.is_64bit()
    }

    /// Returns true if this is a DLL.
    pub fn is_dll(&self) -> bool {
        self.coff_header.is_dll()
    }

    /// Get the image base address.
    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base
    }

    /// Returns true if the import table decoded any entries.
    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty()
    }

    /// Returns true if the export table decoded any entries.
    pub fn has_exports(&self) -> bool {
        !self.exports.is_empty()
    }

    /// Returns true if a TLS directory was decoded.
    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Returns true if a load configuration was decoded.
    pub fn has_configuration(&self) -> bool {
        self.load_configuration.is_some()
    }

    /// Returns true if base relocations were decoded.
    pub fn has_relocations(&self) -> bool {
        !self.relocations.is_empty()
    }

    /// Returns true if debug records were decoded.
    pub fn has_debug(&self) -> bool {
        !self.debug_entries.is_empty()
    }

    /// Returns true if a resource tree was decoded.
    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }

    /// Returns true if attribute certificates were decoded.
    pub fn has_signatures(&self) -> bool {
        !self.certificates.is_empty()
    }

    /// Trailing bytes not covered by any section or certificate.
    pub fn overlay(&self) -> &'a [u8] {
        match self.overlay_offset {
            Some(offset) => &self.data[offset as usize..],
            None => &[],
        }
    }

    /// Convert RVA to file offset via the section table.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        rva_to_offset(rva, &self.sections)
    }

    /// Convert virtual address to file offset.
    pub fn va_to_offset(&self, va: u64) -> Option<usize> {
        if va < self.optional_header.image_base {
            return None;
        }
        let rva = (va - self.optional_header.image_base) as u32;
        self.rva_to_offset(rva)
    }
}

/// Convert RVA to file offset using a section table.
pub(crate) fn rva_to_offset(rva: u32, sections: &[SectionHeader]) -> Option<usize> {
    for section in sections {
        if section.contains_rva(rva) {
            let offset_in_section = (rva - section.virtual_address) as usize;
            return Some(section.pointer_to_raw_data as usize + offset_in_section);
        }
    }
    None
}

/// The partial-failure boundary: a failed step becomes a warning and the
/// pipeline moves on.
fn warn_on_failure<T>(step: &'static str, result: Result<T, ParseError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{step}: {err}");
            None
        }
    }
}

impl BinaryFormat for Pe<'_> {
    fn architecture(&self) -> Architecture {
        match self.coff_header.machine {
            IMAGE_FILE_MACHINE_AMD64 => Architecture::X86_64,
            IMAGE_FILE_MACHINE_I386 => Architecture::X86,
            IMAGE_FILE_MACHINE_ARM64 => Architecture::Arm64,
            other => Architecture::Unknown(other),
        }
    }

    fn endianness(&self) -> Endianness {
        // PE is always little-endian
        Endianness::Little
    }

    fn bitness(&self) -> Bitness {
        if self.is_64bit() {
            Bitness::Bits64
        } else {
            Bitness::Bits32
        }
    }

    fn entry_point(&self) -> Option<u64> {
        let rva = self.optional_header.address_of_entry_point;
        if rva == 0 {
            None
        } else {
            Some(self.optional_header.image_base + rva as u64)
        }
    }

    fn sections(&self) -> Box<dyn Iterator<Item = &dyn Section> + '_> {
        Box::new(self.sections.iter().map(|s| s as &dyn Section))
    }

    fn section_from_offset(&self, offset: u64) -> Option<&dyn Section> {
        self.sections
            .iter()
            .find(|s| s.contains_offset(offset))
            .map(|s| s as &dyn Section)
    }

    fn symbols(&self) -> Box<dyn Iterator<Item = &Symbol> + '_> {
        Box::new(self.symbols.iter())
    }
}
