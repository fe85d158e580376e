//! Mach-O segment and section model.
//!
//! Segments decoded from `LC_SEGMENT`/`LC_SEGMENT_64` own their sections
//! and a copy of the file bytes they span. The model is editable:
//! [`Segment::add_section`] appends a section at the end of the payload
//! window and keeps the offset/size bookkeeping consistent.

use std::collections::BTreeSet;
use std::fmt;

use super::load_command::{LC_SEGMENT, LC_SEGMENT_64};
use crate::ParseError;

/// Size of a 32-bit segment command, without trailing section records.
pub const SEGMENT_COMMAND_32_SIZE: usize = 56;
/// Size of a 64-bit segment command, without trailing section records.
pub const SEGMENT_COMMAND_64_SIZE: usize = 72;
/// Size of an on-disk 32-bit section record.
pub const SECTION_32_SIZE: usize = 68;
/// Size of an on-disk 64-bit section record.
pub const SECTION_64_SIZE: usize = 80;
/// Size of an on-disk relocation record.
pub const RELOCATION_INFO_SIZE: usize = 8;

// Section flags
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x80000000;
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x00000400;

// VM protection flags
pub const VM_PROT_READ: u32 = 0x01;
pub const VM_PROT_WRITE: u32 = 0x02;
pub const VM_PROT_EXECUTE: u32 = 0x04;

/// A Mach-O segment load command together with its sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Load command tag: `LC_SEGMENT` or `LC_SEGMENT_64`.
    pub cmd: u32,
    /// Declared size of the command, including trailing section records.
    pub cmdsize: u32,
    /// Segment name (up to 16 bytes on disk, truncated at the first NUL).
    pub segname: String,
    /// Virtual memory address.
    pub vmaddr: u64,
    /// Virtual memory size.
    pub vmsize: u64,
    /// File offset of the segment's payload.
    pub fileoff: u64,
    /// File size of the segment's payload.
    pub filesize: u64,
    /// Maximum VM protection.
    pub maxprot: u32,
    /// Initial VM protection.
    pub initprot: u32,
    /// On-disk declared section count. Not synchronized by
    /// [`Segment::add_section`]; callers writing the segment back out own
    /// this field.
    pub nsects: u32,
    /// Flags.
    pub flags: u32,
    /// The segment's contiguous payload bytes (`filesize` long once
    /// populated).
    data: Vec<u8>,
    /// Sections contained in this segment.
    sections: Vec<Section>,
    /// Relocations applying inside this segment, in a stable order.
    relocations: BTreeSet<Relocation>,
}

impl Segment {
    /// Creates an empty segment with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            cmd: LC_SEGMENT_64,
            cmdsize: 0,
            segname: name.into(),
            vmaddr: 0,
            vmsize: 0,
            fileoff: 0,
            filesize: 0,
            maxprot: 0,
            initprot: 0,
            nsects: 0,
            flags: 0,
            data: Vec::new(),
            sections: Vec::new(),
            relocations: BTreeSet::new(),
        }
    }

    /// Creates a segment with the given name and payload bytes.
    ///
    /// `filesize` is left at 0 until an edit or an explicit mutator sets
    /// it, matching construction from an empty command record.
    pub fn with_content(name: impl Into<String>, content: Vec<u8>) -> Self {
        let mut segment = Self::new(name);
        segment.data = content;
        segment
    }

    /// Parse a 32-bit segment command record.
    ///
    /// `data` starts at the command tag. Only the fixed 56-byte record is
    /// consumed; trailing section records and the payload are attached by
    /// the surrounding binary parser.
    pub fn parse_32(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < SEGMENT_COMMAND_32_SIZE {
            return Err(ParseError::too_short(SEGMENT_COMMAND_32_SIZE, data.len()));
        }

        let cmdsize = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let segname = parse_name(&data[8..24]);
        let vmaddr = u32::from_le_bytes([data[24], data[25], data[26], data[27]]) as u64;
        let vmsize = u32::from_le_bytes([data[28], data[29], data[30], data[31]]) as u64;
        let fileoff = u32::from_le_bytes([data[32], data[33], data[34], data[35]]) as u64;
        let filesize = u32::from_le_bytes([data[36], data[37], data[38], data[39]]) as u64;
        let maxprot = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
        let initprot = u32::from_le_bytes([data[44], data[45], data[46], data[47]]);
        let nsects = u32::from_le_bytes([data[48], data[49], data[50], data[51]]);
        let flags = u32::from_le_bytes([data[52], data[53], data[54], data[55]]);

        Ok(Self {
            cmd: LC_SEGMENT,
            cmdsize,
            segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            nsects,
            flags,
            data: Vec::new(),
            sections: Vec::new(),
            relocations: BTreeSet::new(),
        })
    }

    /// Parse a 64-bit segment command record. See [`Segment::parse_32`].
    pub fn parse_64(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < SEGMENT_COMMAND_64_SIZE {
            return Err(ParseError::too_short(SEGMENT_COMMAND_64_SIZE, data.len()));
        }

        let cmdsize = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let segname = parse_name(&data[8..24]);
        let read_u64 = |offset: usize| -> u64 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        };
        let vmaddr = read_u64(24);
        let vmsize = read_u64(32);
        let fileoff = read_u64(40);
        let filesize = read_u64(48);
        let maxprot = u32::from_le_bytes([data[56], data[57], data[58], data[59]]);
        let initprot = u32::from_le_bytes([data[60], data[61], data[62], data[63]]);
        let nsects = u32::from_le_bytes([data[64], data[65], data[66], data[67]]);
        let flags = u32::from_le_bytes([data[68], data[69], data[70], data[71]]);

        Ok(Self {
            cmd: LC_SEGMENT_64,
            cmdsize,
            segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            nsects,
            flags,
            data: Vec::new(),
            sections: Vec::new(),
            relocations: BTreeSet::new(),
        })
    }

    /// The segment's payload bytes.
    pub fn content(&self) -> &[u8] {
        &self.data
    }

    /// Replaces the segment's payload bytes.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.data = content;
    }

    /// Sections contained in this segment.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Mutable access for the binary parser filling section contents.
    pub(crate) fn sections_mut(&mut self) -> &mut [Section] {
        &mut self.sections
    }

    /// Relocations applying inside this segment, in ascending order.
    pub fn relocations(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations.iter()
    }

    /// Records a relocation against this segment.
    pub fn add_relocation(&mut self, relocation: Relocation) {
        self.relocations.insert(relocation);
    }

    /// Inserts a copy of `section` at the end of the payload window.
    ///
    /// The copy is rebound to this segment: its size is taken from its
    /// content, its offset is appended after the current payload, and a
    /// zero virtual address is assigned from the segment's address space.
    /// The payload buffer grows as needed and `filesize` tracks it, so
    /// the containment invariant holds on return. `nsects` is left alone.
    pub fn add_section(&mut self, section: &Section) -> &Section {
        let mut new_section = section.clone();
        new_section.segname = self.segname.clone();
        new_section.size = new_section.content.len() as u64;
        new_section.offset = self.fileoff + self.filesize;

        if section.addr == 0 {
            new_section.addr = self.vmaddr + new_section.offset;
        }

        let relative = (new_section.offset - self.fileoff) as usize;
        let end = relative + new_section.size as usize;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[relative..end].copy_from_slice(&new_section.content);

        self.filesize = self.data.len() as u64;
        let index = self.sections.len();
        self.sections.push(new_section);
        &self.sections[index]
    }

    /// Attaches an already-laid-out section without reconciling offsets.
    ///
    /// Used by the binary parser for on-disk sections whose offsets are
    /// authoritative.
    pub(crate) fn attach_section(&mut self, mut section: Section) {
        section.segname = self.segname.clone();
        self.sections.push(section);
    }

    /// Clears the section list and resets the declared count.
    ///
    /// The payload bytes are left untouched.
    pub fn remove_all_sections(&mut self) {
        self.nsects = 0;
        self.sections.clear();
    }

    /// Returns true if some contained section compares equal to `section`.
    pub fn has(&self, section: &Section) -> bool {
        self.sections.iter().any(|s| s == section)
    }

    /// Returns true if a contained section has the given name.
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.sectname == name)
    }

    /// Returns true if this segment is executable.
    pub fn is_executable(&self) -> bool {
        self.initprot & VM_PROT_EXECUTE != 0
    }

    /// Returns true if this segment is writable.
    pub fn is_writable(&self) -> bool {
        self.initprot & VM_PROT_WRITE != 0
    }

    /// Returns true if this segment is readable.
    pub fn is_readable(&self) -> bool {
        self.initprot & VM_PROT_READ != 0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:#x} {:#x} {:#x} {:#x} {:#x} {:#x} {:#x} {:#x}",
            self.segname,
            self.vmaddr,
            self.vmsize,
            self.fileoff,
            self.filesize,
            self.maxprot,
            self.initprot,
            self.nsects,
            self.flags,
        )?;
        for section in &self.sections {
            writeln!(
                f,
                "\t{:<16} {:#x} {:#x} {:#x}",
                section.sectname, section.addr, section.offset, section.size
            )?;
        }
        Ok(())
    }
}

/// A Mach-O section.
///
/// A section lives inside exactly one segment. `segname` is the cached
/// owner name, refreshed whenever the section is inserted into a segment;
/// resolving it back to the owning [`Segment`] goes through the binary's
/// segment list.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name (up to 16 bytes on disk, truncated at the first NUL).
    pub sectname: String,
    /// Name of the owning segment.
    pub segname: String,
    /// Virtual memory address.
    pub addr: u64,
    /// Size in bytes.
    pub size: u64,
    /// File offset of the section's payload.
    pub offset: u64,
    /// Alignment (power of 2).
    pub align: u32,
    /// File offset of relocations.
    pub reloff: u32,
    /// Number of relocations.
    pub nreloc: u32,
    /// Flags.
    pub flags: u32,
    /// Reserved fields.
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
    /// The section's payload bytes.
    content: Vec<u8>,
}

impl Section {
    /// Creates an empty section with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_content(name, Vec::new())
    }

    /// Creates a section with the given name and content bytes.
    pub fn with_content(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            sectname: name.into(),
            segname: String::new(),
            addr: 0,
            size: content.len() as u64,
            offset: 0,
            align: 0,
            reloff: 0,
            nreloc: 0,
            flags: 0,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            content,
        }
    }

    /// Parse a 32-bit on-disk section record.
    pub fn parse_32(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < SECTION_32_SIZE {
            return Err(ParseError::too_short(SECTION_32_SIZE, data.len()));
        }

        Ok(Self {
            sectname: parse_name(&data[0..16]),
            segname: parse_name(&data[16..32]),
            addr: u32::from_le_bytes([data[32], data[33], data[34], data[35]]) as u64,
            size: u32::from_le_bytes([data[36], data[37], data[38], data[39]]) as u64,
            offset: u32::from_le_bytes([data[40], data[41], data[42], data[43]]) as u64,
            align: u32::from_le_bytes([data[44], data[45], data[46], data[47]]),
            reloff: u32::from_le_bytes([data[48], data[49], data[50], data[51]]),
            nreloc: u32::from_le_bytes([data[52], data[53], data[54], data[55]]),
            flags: u32::from_le_bytes([data[56], data[57], data[58], data[59]]),
            reserved1: u32::from_le_bytes([data[60], data[61], data[62], data[63]]),
            reserved2: u32::from_le_bytes([data[64], data[65], data[66], data[67]]),
            reserved3: 0,
            content: Vec::new(),
        })
    }

    /// Parse a 64-bit on-disk section record.
    pub fn parse_64(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < SECTION_64_SIZE {
            return Err(ParseError::too_short(SECTION_64_SIZE, data.len()));
        }

        let read_u64 = |offset: usize| -> u64 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        };

        Ok(Self {
            sectname: parse_name(&data[0..16]),
            segname: parse_name(&data[16..32]),
            addr: read_u64(32),
            size: read_u64(40),
            offset: u32::from_le_bytes([data[48], data[49], data[50], data[51]]) as u64,
            align: u32::from_le_bytes([data[52], data[53], data[54], data[55]]),
            reloff: u32::from_le_bytes([data[56], data[57], data[58], data[59]]),
            nreloc: u32::from_le_bytes([data[60], data[61], data[62], data[63]]),
            flags: u32::from_le_bytes([data[64], data[65], data[66], data[67]]),
            reserved1: u32::from_le_bytes([data[68], data[69], data[70], data[71]]),
            reserved2: u32::from_le_bytes([data[72], data[73], data[74], data[75]]),
            reserved3: u32::from_le_bytes([data[76], data[77], data[78], data[79]]),
            content: Vec::new(),
        })
    }

    /// The section's payload bytes.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replaces the section's payload bytes.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
    }

    /// Returns the full section name (segment.section).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.segname, self.sectname)
    }

    /// Returns true if this section contains instructions.
    pub fn is_executable(&self) -> bool {
        self.flags & S_ATTR_PURE_INSTRUCTIONS != 0 || self.flags & S_ATTR_SOME_INSTRUCTIONS != 0
    }
}

/// Section identity covers the fields insertion does not reconcile.
/// Offset, size, address and the owner-name cache are rewritten by
/// [`Segment::add_section`], so a section still compares equal to the
/// copy a segment made of it.
impl PartialEq for Section {
    fn eq(&self, other: &Self) -> bool {
        self.sectname == other.sectname
            && self.align == other.align
            && self.flags == other.flags
            && self.reserved1 == other.reserved1
            && self.reserved2 == other.reserved2
            && self.reserved3 == other.reserved3
            && self.content == other.content
    }
}

impl Eq for Section {}

/// A relocation record inside a segment.
///
/// The derived ordering (address first) gives segment relocation sets a
/// deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Relocation {
    /// Offset from the start of the section the relocation applies to.
    pub address: u64,
    /// Symbol index or section ordinal.
    pub symbol: u32,
    /// Relocation type.
    pub kind: u8,
    /// log2 of the relocated quantity's size.
    pub length: u8,
    /// True if the relocation is PC-relative.
    pub pcrel: bool,
    /// True if `symbol` indexes the symbol table rather than a section.
    pub is_extern: bool,
}

impl Relocation {
    /// Parse an on-disk `relocation_info` record.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < RELOCATION_INFO_SIZE {
            return Err(ParseError::too_short(RELOCATION_INFO_SIZE, data.len()));
        }

        let address = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as u64;
        let info = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        Ok(Self {
            address,
            symbol: info & 0x00FF_FFFF,
            pcrel: (info >> 24) & 0x1 != 0,
            length: ((info >> 25) & 0x3) as u8,
            is_extern: (info >> 27) & 0x1 != 0,
            kind: ((info >> 28) & 0xF) as u8,
        })
    }
}

/// Parse a null-terminated name from a fixed-size buffer.
fn parse_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_segment() -> Segment {
        let mut segment = Segment::new("__TEXT");
        segment.vmaddr = 0x1000;
        segment
    }

    #[test]
    fn test_add_section_to_empty_segment() {
        let mut segment = text_segment();
        let section = Section::with_content("__text", vec![0xAA; 16]);

        let inserted = segment.add_section(&section);
        assert_eq!(inserted.offset, 0);
        assert_eq!(inserted.size, 16);
        assert_eq!(inserted.addr, 0x1000);
        assert_eq!(inserted.segname, "__TEXT");

        assert_eq!(segment.filesize, 16);
        assert_eq!(segment.content(), &[0xAA; 16][..]);
        assert_eq!(segment.sections().len(), 1);
    }

    #[test]
    fn test_add_section_appends_after_existing_payload() {
        let mut segment = text_segment();
        segment.add_section(&Section::with_content("__text", vec![0xAA; 16]));
        let second = segment.add_section(&Section::with_content("__const", vec![0xBB; 8]));

        assert_eq!(second.offset, 16);
        assert_eq!(second.addr, 0x1010);
        assert_eq!(segment.filesize, 24);
        assert_eq!(&segment.content()[16..24], &[0xBB; 8][..]);
    }

    #[test]
    fn test_with_content_leaves_filesize_unset() {
        let segment = Segment::with_content("__DATA", vec![5; 32]);
        assert_eq!(segment.content().len(), 32);
        // filesize tracks the payload only once an edit runs.
        assert_eq!(segment.filesize, 0);
    }

    #[test]
    fn test_add_section_preserves_nonzero_virtual_address() {
        let mut segment = text_segment();
        let mut section = Section::with_content("__text", vec![1, 2, 3, 4]);
        section.addr = 0x4000;

        let inserted = segment.add_section(&section);
        assert_eq!(inserted.addr, 0x4000);
    }

    #[test]
    fn test_add_section_containment_invariant() {
        let mut segment = text_segment();
        segment.fileoff = 0x200;
        segment.add_section(&Section::with_content("__a", vec![1; 10]));
        segment.add_section(&Section::with_content("__b", vec![2; 20]));

        assert_eq!(segment.filesize, segment.content().len() as u64);
        for section in segment.sections() {
            assert!(segment.fileoff <= section.offset);
            assert!(section.offset + section.size <= segment.fileoff + segment.filesize);
            let relative = (section.offset - segment.fileoff) as usize;
            assert_eq!(
                &segment.content()[relative..relative + section.size as usize],
                section.content()
            );
        }
    }

    #[test]
    fn test_add_section_does_not_touch_declared_count() {
        let mut segment = text_segment();
        segment.nsects = 7;
        segment.add_section(&Section::with_content("__text", vec![0; 4]));
        assert_eq!(segment.nsects, 7);
    }

    #[test]
    fn test_has_after_insert() {
        let mut segment = text_segment();
        let section = Section::with_content("__text", vec![0xAA; 16]);
        segment.add_section(&section);

        assert!(segment.has(&section));
        assert!(segment.has_section("__text"));
        assert!(!segment.has_section("__data"));
    }

    #[test]
    fn test_remove_all_sections() {
        let mut segment = text_segment();
        segment.add_section(&Section::with_content("__text", vec![0xAA; 16]));
        segment.remove_all_sections();

        assert!(segment.sections().is_empty());
        assert_eq!(segment.nsects, 0);
        // The payload stays behind.
        assert_eq!(segment.content().len(), 16);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut segment = text_segment();
        segment.add_section(&Section::with_content("__text", vec![0xAA; 16]));
        segment.add_relocation(Relocation {
            address: 8,
            symbol: 1,
            kind: 0,
            length: 2,
            pcrel: false,
            is_extern: true,
        });

        let mut copy = segment.clone();
        assert_eq!(copy, segment);
        assert_eq!(copy.relocations().count(), 1);

        copy.segname = "__DATA".to_string();
        assert_ne!(copy, segment);
        assert_eq!(segment.segname, "__TEXT");
    }

    #[test]
    fn test_relocation_ordering_is_by_address() {
        let mut segment = text_segment();
        for address in [0x30u64, 0x10, 0x20] {
            segment.add_relocation(Relocation {
                address,
                symbol: 0,
                kind: 0,
                length: 2,
                pcrel: false,
                is_extern: false,
            });
        }
        let addresses: Vec<u64> = segment.relocations().map(|r| r.address).collect();
        assert_eq!(addresses, vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_parse_64_roundtrip_fields() {
        let mut data = vec![0u8; SEGMENT_COMMAND_64_SIZE];
        data[0..4].copy_from_slice(&LC_SEGMENT_64.to_le_bytes());
        data[4..8].copy_from_slice(&(SEGMENT_COMMAND_64_SIZE as u32).to_le_bytes());
        data[8..14].copy_from_slice(b"__TEXT");
        data[24..32].copy_from_slice(&0x100000000u64.to_le_bytes());
        data[32..40].copy_from_slice(&0x4000u64.to_le_bytes());
        data[48..56].copy_from_slice(&0x4000u64.to_le_bytes());
        data[56..60].copy_from_slice(&5u32.to_le_bytes());
        data[60..64].copy_from_slice(&5u32.to_le_bytes());
        data[64..68].copy_from_slice(&2u32.to_le_bytes());

        let segment = Segment::parse_64(&data).unwrap();
        assert_eq!(segment.cmd, LC_SEGMENT_64);
        assert_eq!(segment.segname, "__TEXT");
        assert_eq!(segment.vmaddr, 0x100000000);
        assert_eq!(segment.vmsize, 0x4000);
        assert_eq!(segment.filesize, 0x4000);
        assert_eq!(segment.nsects, 2);
        assert!(segment.sections().is_empty());
        assert!(segment.is_readable());
        assert!(segment.is_executable());
    }

    #[test]
    fn test_section_name_truncates_at_nul() {
        let mut data = vec![0u8; SECTION_32_SIZE];
        data[0..7].copy_from_slice(b"__text\0");
        data[7] = b'X'; // Garbage after the NUL is ignored.
        data[16..22].copy_from_slice(b"__TEXT");

        let section = Section::parse_32(&data).unwrap();
        assert_eq!(section.sectname, "__text");
        assert_eq!(section.segname, "__TEXT");
    }
}
