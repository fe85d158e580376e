//! End-to-end tests for the Mach-O parser over hand-built images.

use binform_formats::macho::{MachO, MachSection, Segment};
use binform_formats::{BinaryFormat, ParseError};

const MH_MAGIC_64: u32 = 0xFEEDFACF;
const CPU_TYPE_X86_64: u32 = 7 | 0x01000000;
const MH_EXECUTE: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;

const HEADER_SIZE: usize = 32;
const SEGMENT_CMD_SIZE: usize = 72;
const SECTION_SIZE: usize = 80;

/// A 64-bit Mach-O with one `__TEXT` segment holding one `__text`
/// section. The segment payload lives at file offset 0x200.
fn minimal_macho64() -> Vec<u8> {
    let mut data = vec![0u8; 0x400];

    data[0..4].copy_from_slice(&MH_MAGIC_64.to_le_bytes());
    data[4..8].copy_from_slice(&CPU_TYPE_X86_64.to_le_bytes());
    data[12..16].copy_from_slice(&MH_EXECUTE.to_le_bytes());
    data[16..20].copy_from_slice(&1u32.to_le_bytes()); // ncmds
    data[20..24].copy_from_slice(&((SEGMENT_CMD_SIZE + SECTION_SIZE) as u32).to_le_bytes());

    // LC_SEGMENT_64
    let lc = HEADER_SIZE;
    data[lc..lc + 4].copy_from_slice(&LC_SEGMENT_64.to_le_bytes());
    data[lc + 4..lc + 8].copy_from_slice(&((SEGMENT_CMD_SIZE + SECTION_SIZE) as u32).to_le_bytes());
    data[lc + 8..lc + 14].copy_from_slice(b"__TEXT");
    data[lc + 24..lc + 32].copy_from_slice(&0x1_0000_0000u64.to_le_bytes()); // vmaddr
    data[lc + 32..lc + 40].copy_from_slice(&0x1000u64.to_le_bytes()); // vmsize
    data[lc + 40..lc + 48].copy_from_slice(&0x200u64.to_le_bytes()); // fileoff
    data[lc + 48..lc + 56].copy_from_slice(&0x100u64.to_le_bytes()); // filesize
    data[lc + 56..lc + 60].copy_from_slice(&7u32.to_le_bytes()); // maxprot
    data[lc + 60..lc + 64].copy_from_slice(&5u32.to_le_bytes()); // initprot
    data[lc + 64..lc + 68].copy_from_slice(&1u32.to_le_bytes()); // nsects

    // __text section record
    let sec = lc + SEGMENT_CMD_SIZE;
    data[sec..sec + 6].copy_from_slice(b"__text");
    data[sec + 16..sec + 22].copy_from_slice(b"__TEXT");
    data[sec + 32..sec + 40].copy_from_slice(&0x1_0000_0210u64.to_le_bytes()); // addr
    data[sec + 40..sec + 48].copy_from_slice(&0x10u64.to_le_bytes()); // size
    data[sec + 48..sec + 52].copy_from_slice(&0x210u32.to_le_bytes()); // offset

    // Section payload
    data[0x210..0x220].fill(0x90);

    data
}

#[test]
fn parse_populates_segment_and_section_payloads() {
    let data = minimal_macho64();
    let macho = MachO::parse(&data).unwrap();

    assert_eq!(macho.segments.len(), 1);
    let segment = &macho.segments[0];
    assert_eq!(segment.segname, "__TEXT");
    assert_eq!(segment.vmaddr, 0x1_0000_0000);
    assert_eq!(segment.filesize, 0x100);
    assert_eq!(segment.content().len(), 0x100);

    assert_eq!(segment.sections().len(), 1);
    let section = &segment.sections()[0];
    assert_eq!(section.sectname, "__text");
    assert_eq!(section.segname, "__TEXT");
    assert_eq!(section.offset, 0x210);
    assert_eq!(section.content(), &[0x90u8; 16][..]);

    // The section payload also appears inside the segment's window.
    let relative = (section.offset - segment.fileoff) as usize;
    assert_eq!(
        &segment.content()[relative..relative + section.size as usize],
        section.content()
    );
}

#[test]
fn section_from_offset_resolves_within_payload() {
    let data = minimal_macho64();
    let macho = MachO::parse(&data).unwrap();

    let section = macho.section_from_offset(0x215).expect("inside __text");
    assert_eq!(section.name(), "__text");
    assert!(macho.section_from_offset(0x300).is_none());
}

#[test]
fn segment_lookup_by_name() {
    let data = minimal_macho64();
    let macho = MachO::parse(&data).unwrap();

    assert!(macho.text_segment().is_some());
    assert!(macho.segment_by_name("__DATA").is_none());
}

#[test]
fn editing_a_parsed_segment_keeps_the_invariant() {
    let data = minimal_macho64();
    let mut macho = MachO::parse(&data).unwrap();

    let segment = macho.segment_by_name_mut("__TEXT").unwrap();
    let inserted_offset = {
        let inserted = segment.add_section(&MachSection::with_content("__extra", vec![0xAB; 8]));
        inserted.offset
    };

    // Appended after the existing 0x100-byte payload window.
    assert_eq!(inserted_offset, 0x200 + 0x100);
    assert_eq!(segment.filesize, 0x108);
    assert_eq!(segment.content().len(), 0x108);
    assert!(segment.has_section("__extra"));
    assert!(segment.has_section("__text"));
}

#[test]
fn truncated_header_is_an_error() {
    let data = vec![0u8; 16];
    assert!(matches!(
        MachO::parse(&data),
        Err(ParseError::TooShort { .. })
    ));
}

#[test]
fn load_command_walk_survives_undersized_cmdsize() {
    let mut data = minimal_macho64();
    // Corrupt the declared command size to something undersized; the
    // walk stops with a warning instead of looping or panicking.
    data[HEADER_SIZE + 4..HEADER_SIZE + 8].copy_from_slice(&4u32.to_le_bytes());

    let macho = MachO::parse(&data).unwrap();
    assert!(macho.segments.is_empty());
}

#[test]
fn user_built_segment_round_trips_through_display() {
    let mut segment = Segment::new("__LINKEDIT");
    segment.vmaddr = 0x2000;
    segment.add_section(&MachSection::with_content("__info", vec![1, 2, 3]));

    let printed = format!("{segment}");
    assert!(printed.contains("__LINKEDIT"));
    assert!(printed.contains("__info"));
}
