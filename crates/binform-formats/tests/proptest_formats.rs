//! Property-based tests for binary format parsers.
//!
//! These tests verify that format parsers handle arbitrary input safely
//! and produce consistent results, and that the segment editing model
//! keeps its bookkeeping invariants under arbitrary edit sequences.

use proptest::prelude::*;

use binform_formats::macho::{MachO, MachSection, Segment};
use binform_formats::pe::Pe;
use binform_formats::{detect_format, BinaryFormat, BinaryType};

// =============================================================================
// Mach-O Parser Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Mach-O parsing never panics on arbitrary input.
    #[test]
    fn macho_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        // This should not panic - errors are fine
        let _ = MachO::parse(&data);
    }

    /// Mach-O parsing is deterministic.
    #[test]
    fn macho_parse_is_deterministic(data in prop::collection::vec(any::<u8>(), 32..256)) {
        let result1 = MachO::parse(&data);
        let result2 = MachO::parse(&data);

        match (&result1, &result2) {
            (Ok(m1), Ok(m2)) => {
                prop_assert_eq!(m1.segments.len(), m2.segments.len());
                prop_assert_eq!(m1.entry_point(), m2.entry_point());
            }
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "Results should be consistent"),
        }
    }

    /// Mach-O magic handling: valid magic plus arbitrary tail never panics.
    #[test]
    fn macho_magic_handling(
        magic in prop::sample::select(vec![
            0xFEEDFACE_u32, // 32-bit
            0xFEEDFACF,     // 64-bit
        ]),
        rest in prop::collection::vec(any::<u8>(), 28..256)
    ) {
        let mut data = Vec::with_capacity(4 + rest.len());
        data.extend_from_slice(&magic.to_le_bytes());
        data.extend_from_slice(&rest);

        let _ = MachO::parse(&data);
    }

    /// Mach-O load command count handling.
    #[test]
    fn macho_load_cmd_count_handling(
        cmd_count in 0u32..1000,
        data in prop::collection::vec(any::<u8>(), 32..256)
    ) {
        let mut modified = data.clone();
        // ncmds is at offset 16 in mach_header
        modified[16..20].copy_from_slice(&cmd_count.to_le_bytes());
        let _ = MachO::parse(&modified);
    }
}

// =============================================================================
// Segment Model Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// After any sequence of insertions, every section's payload sits
    /// inside the segment window at its declared offset.
    #[test]
    fn add_section_keeps_containment_invariant(
        fileoff in 0u64..0x10000,
        vmaddr in 0u64..0x10000,
        contents in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8)
    ) {
        let mut segment = Segment::new("__TEST");
        segment.fileoff = fileoff;
        segment.vmaddr = vmaddr;

        for (i, content) in contents.iter().enumerate() {
            let section = MachSection::with_content(format!("__s{i}"), content.clone());
            segment.add_section(&section);
        }

        prop_assert_eq!(segment.filesize, segment.content().len() as u64);
        for section in segment.sections() {
            prop_assert!(segment.fileoff <= section.offset);
            prop_assert!(section.offset + section.size <= segment.fileoff + segment.filesize);
            let relative = (section.offset - segment.fileoff) as usize;
            prop_assert_eq!(
                &segment.content()[relative..relative + section.size as usize],
                section.content()
            );
        }
    }

    /// Consecutive insertions are laid out back to back.
    #[test]
    fn add_section_appends_contiguously(
        first_len in 0usize..128,
        second_len in 0usize..128,
    ) {
        let mut segment = Segment::new("__TEST");
        let a = segment.add_section(&MachSection::with_content("__a", vec![0xAA; first_len])).offset;
        let b = segment.add_section(&MachSection::with_content("__b", vec![0xBB; second_len])).offset;
        prop_assert_eq!(b, a + first_len as u64);
    }

    /// Cloning is deep: mutating the copy never changes the original.
    #[test]
    fn clone_leaves_original_unchanged(
        content in prop::collection::vec(any::<u8>(), 0..64),
        new_name in "[a-z]{1,12}",
    ) {
        let mut segment = Segment::new("__TEST");
        segment.add_section(&MachSection::with_content("__sec", content));

        let mut copy = segment.clone();
        prop_assert!(copy == segment);

        copy.segname = new_name.clone();
        if new_name != "__TEST" {
            prop_assert!(copy != segment);
        }
        prop_assert_eq!(&segment.segname, "__TEST");
    }
}

// =============================================================================
// PE Parser Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// PE parsing never panics on arbitrary input.
    #[test]
    fn pe_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        let _ = Pe::parse(&data);
    }

    /// PE parsing is deterministic.
    #[test]
    fn pe_parse_is_deterministic(data in prop::collection::vec(any::<u8>(), 64..512)) {
        let result1 = Pe::parse(&data);
        let result2 = Pe::parse(&data);

        match (&result1, &result2) {
            (Ok(p1), Ok(p2)) => {
                prop_assert_eq!(p1.entry_point(), p2.entry_point());
                prop_assert_eq!(p1.architecture(), p2.architecture());
                prop_assert_eq!(p1.sections.len(), p2.sections.len());
            }
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "Results should be consistent"),
        }
    }

    /// PE DOS header magic handling.
    #[test]
    fn pe_dos_magic_handling(
        pe_offset in 64u32..256,
        rest in prop::collection::vec(any::<u8>(), 256..512)
    ) {
        let mut data = vec![0u8; 512.max(rest.len())];

        // DOS header magic
        data[0] = b'M';
        data[1] = b'Z';

        // PE header offset at 0x3C
        data[0x3C..0x40].copy_from_slice(&pe_offset.to_le_bytes());

        // PE signature at offset
        if pe_offset as usize + 4 < data.len() {
            data[pe_offset as usize] = b'P';
            data[pe_offset as usize + 1] = b'E';
        }

        // Fill rest
        for (i, byte) in rest.iter().enumerate() {
            if pe_offset as usize + 4 + i < data.len() {
                data[pe_offset as usize + 4 + i] = *byte;
            }
        }

        let _ = Pe::parse(&data);
    }

    /// PE section count handling.
    #[test]
    fn pe_section_count_handling(
        section_count in 0u16..1000,
        data in prop::collection::vec(any::<u8>(), 256..512)
    ) {
        let mut modified = data.clone();
        // Section count would be at COFF header + 2
        modified[98] = (section_count & 0xFF) as u8;
        modified[99] = ((section_count >> 8) & 0xFF) as u8;
        let _ = Pe::parse(&modified);
    }
}

// =============================================================================
// Format Detection Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Format detection never panics.
    #[test]
    fn detect_format_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = detect_format(&data);
    }

    /// Format detection is deterministic.
    #[test]
    fn detect_format_is_deterministic(data in prop::collection::vec(any::<u8>(), 4..128)) {
        let result1 = detect_format(&data);
        let result2 = detect_format(&data);
        prop_assert_eq!(result1, result2, "Format detection should be deterministic");
    }

    /// Mach-O magic should be detected as Mach-O.
    #[test]
    fn macho_magic_detected(rest in prop::collection::vec(any::<u8>(), 12..64)) {
        let mut data = 0xFEEDFACF_u32.to_le_bytes().to_vec();
        data.extend_from_slice(&rest);

        prop_assert_eq!(detect_format(&data), BinaryType::MachO);
    }

    /// PE magic should be detected as PE.
    #[test]
    fn pe_magic_detected(rest in prop::collection::vec(any::<u8>(), 60..256)) {
        let mut data = vec![b'M', b'Z'];
        data.extend(vec![0u8; 58]); // Padding to 0x3C

        // PE offset at 0x3C pointing to 0x80
        data.extend_from_slice(&[0x80, 0x00, 0x00, 0x00]);

        // Padding to PE signature location
        data.extend(vec![0u8; 0x80 - 64]);

        // PE signature
        data.extend_from_slice(&[b'P', b'E', 0x00, 0x00]);

        data.extend_from_slice(&rest);

        prop_assert_eq!(detect_format(&data), BinaryType::Pe);
    }
}
