//! Mach-O (macOS/iOS) binary format parser.
//!
//! This module provides a Mach-O parser supporting:
//! - 32-bit and 64-bit Mach-O files
//! - Common load commands
//! - An editable segment/section model with payload bookkeeping

mod header;
mod load_command;
mod segment;

pub use header::{CpuType, FileType, MachHeader};
pub use load_command::LoadCommand;
pub use segment::{Relocation, Section as MachSection, Segment};

use binform_core::{Architecture, Bitness, Endianness, Symbol};
use log::warn;

use crate::{BinaryFormat, ByteStream, ParseError, Section, MAX_DATA_SIZE};

/// A parsed Mach-O binary.
#[derive(Debug)]
pub struct MachO<'a> {
    /// Raw bytes of the file.
    data: &'a [u8],
    /// Parsed Mach-O header.
    pub header: MachHeader,
    /// Load commands.
    pub load_commands: Vec<LoadCommand>,
    /// Segments, with sections and payload attached.
    pub segments: Vec<Segment>,
}

impl<'a> MachO<'a> {
    /// Parse a Mach-O file from raw bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        let header = MachHeader::parse(data)?;
        let is_64 = header.is_64bit();

        let load_commands = Self::parse_load_commands(
            data,
            header.header_size(),
            header.ncmds as usize,
            header.sizeofcmds as usize,
        )?;

        // Materialize segments and attach their sections and payload.
        let mut segments = Vec::new();
        let stream = ByteStream::new(data);
        let mut lc_offset = header.header_size();
        for lc in &load_commands {
            let cmdsize = Self::command_size(&stream, lc_offset);
            if let Some(seg) = lc.segment() {
                let cmd_data = stream.peek_data(lc_offset, cmdsize).unwrap_or(&[]);
                let mut segment = seg.clone();
                Self::attach_sections(&mut segment, cmd_data, is_64);
                Self::populate_segment(&mut segment, data);
                segments.push(segment);
            }
            lc_offset += cmdsize;
        }

        Ok(Self {
            data,
            header,
            load_commands,
            segments,
        })
    }

    fn command_size(stream: &ByteStream<'_>, offset: usize) -> usize {
        stream.peek_u32(offset + 4).unwrap_or(0) as usize
    }

    fn parse_load_commands(
        data: &[u8],
        start: usize,
        ncmds: usize,
        total_size: usize,
    ) -> Result<Vec<LoadCommand>, ParseError> {
        let mut commands = Vec::with_capacity(ncmds.min(64));
        let mut stream = ByteStream::new(data);
        stream.set_position(start);

        for _ in 0..ncmds {
            let offset = stream.position();
            if offset >= start + total_size {
                break;
            }
            let Ok(cmd) = stream.peek_u32(offset) else {
                break;
            };
            let cmdsize = stream.peek_u32(offset + 4).unwrap_or(0) as usize;
            if cmdsize < 8 {
                warn!("load command {cmd:#x} at {offset:#x} has undersized cmdsize, stopping");
                break;
            }
            let Ok(cmd_data) = stream.peek_data(offset, cmdsize) else {
                warn!("load command {cmd:#x} at {offset:#x} extends past end of file, stopping");
                break;
            };

            commands.push(LoadCommand::parse(cmd, cmd_data)?);
            stream.set_position(offset + cmdsize);
        }

        Ok(commands)
    }

    /// Decode the section records trailing a segment command and attach
    /// them with their content bytes.
    fn attach_sections(segment: &mut Segment, cmd_data: &[u8], is_64: bool) {
        let (header_size, record_size) = if is_64 {
            (segment::SEGMENT_COMMAND_64_SIZE, segment::SECTION_64_SIZE)
        } else {
            (segment::SEGMENT_COMMAND_32_SIZE, segment::SECTION_32_SIZE)
        };

        let mut offset = header_size;
        for _ in 0..segment.nsects {
            if offset + record_size > cmd_data.len() {
                warn!(
                    "segment {} declares more sections than its command holds",
                    segment.segname
                );
                break;
            }
            let parsed = if is_64 {
                MachSection::parse_64(&cmd_data[offset..])
            } else {
                MachSection::parse_32(&cmd_data[offset..])
            };
            match parsed {
                Ok(section) => segment.attach_section(section),
                Err(err) => {
                    warn!("bad section record in segment {}: {err}", segment.segname);
                    break;
                }
            }
            offset += record_size;
        }
    }

    /// Fill the segment payload, section contents, and relocations from
    /// the file bytes.
    fn populate_segment(segment: &mut Segment, data: &[u8]) {
        let start = segment.fileoff as usize;
        let size = segment.filesize as usize;
        if size > MAX_DATA_SIZE {
            warn!(
                "segment {} payload of {size} bytes exceeds the in-memory cap, leaving it empty",
                segment.segname
            );
        } else if let Some(end) = start.checked_add(size) {
            if end <= data.len() {
                segment.set_content(data[start..end].to_vec());
            }
        }

        let mut reloc_specs: Vec<(u32, u32)> = Vec::new();
        let mut contents: Vec<Option<Vec<u8>>> = Vec::new();
        for section in segment.sections() {
            let start = section.offset as usize;
            let end = start.saturating_add(section.size as usize);
            if section.size as usize <= MAX_DATA_SIZE && end <= data.len() {
                contents.push(Some(data[start..end].to_vec()));
            } else {
                contents.push(None);
            }
            if section.nreloc > 0 {
                reloc_specs.push((section.reloff, section.nreloc));
            }
        }
        for (section, content) in segment.sections_mut().iter_mut().zip(contents) {
            if let Some(content) = content {
                section.set_content(content);
            }
        }

        for (reloff, nreloc) in reloc_specs {
            let mut offset = reloff as usize;
            for _ in 0..nreloc {
                match Relocation::parse(&data[offset.min(data.len())..]) {
                    Ok(relocation) => segment.add_relocation(relocation),
                    Err(_) => break,
                }
                offset += segment::RELOCATION_INFO_SIZE;
            }
        }
    }

    /// Get a segment by name.
    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.segname == name)
    }

    /// Get a segment by name, mutably.
    pub fn segment_by_name_mut(&mut self, name: &str) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.segname == name)
    }

    /// Get __TEXT segment.
    pub fn text_segment(&self) -> Option<&Segment> {
        self.segment_by_name("__TEXT")
    }

    /// Raw file data.
    pub fn raw_data(&self) -> &'a [u8] {
        self.data
    }
}

impl BinaryFormat for MachO<'_> {
    fn architecture(&self) -> Architecture {
        self.header.architecture()
    }

    fn endianness(&self) -> Endianness {
        // Mach-O on x86/ARM is always little-endian in practice
        Endianness::Little
    }

    fn bitness(&self) -> Bitness {
        if self.header.is_64bit() {
            Bitness::Bits64
        } else {
            Bitness::Bits32
        }
    }

    fn entry_point(&self) -> Option<u64> {
        for lc in &self.load_commands {
            if let LoadCommand::Main { entryoff, .. } = lc {
                // entryoff is relative to __TEXT
                if let Some(text) = self.text_segment() {
                    return Some(text.vmaddr + *entryoff);
                }
            }
        }
        None
    }

    fn sections(&self) -> Box<dyn Iterator<Item = &dyn Section> + '_> {
        Box::new(
            self.segments
                .iter()
                .flat_map(|seg| seg.sections().iter())
                .map(|s| s as &dyn Section),
        )
    }

    fn section_from_offset(&self, offset: u64) -> Option<&dyn Section> {
        self.segments
            .iter()
            .flat_map(|seg| seg.sections().iter())
            .find(|s| offset >= s.offset && offset < s.offset.saturating_add(s.size))
            .map(|s| s as &dyn Section)
    }

    fn symbols(&self) -> Box<dyn Iterator<Item = &Symbol> + '_> {
        Box::new(std::iter::empty())
    }
}

impl Section for MachSection {
    fn name(&self) -> &str {
        &self.sectname
    }

    fn virtual_address(&self) -> u64 {
        self.addr
    }

    fn file_offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn data(&self) -> &[u8] {
        self.content()
    }

    fn is_executable(&self) -> bool {
        MachSection::is_executable(self)
    }

    fn is_writable(&self) -> bool {
        // Sections don't have their own write flag; check segment
        false
    }
}
