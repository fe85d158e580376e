//! PE load configuration parsing.
//!
//! The load configuration structure has grown release over release. The
//! declared `size` field selects the layout: the largest known layout
//! that fits inside the declared size is decoded, anything smaller than
//! the oldest known layout decodes the common base record alone.

use binform_core::Bitness;

use super::section::SectionHeader;
use crate::{ByteStream, ParseError};

/// Known load configuration revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadConfigVersion {
    /// The common prefix only (up to the security cookie).
    Base,
    /// Adds the SafeSEH handler table.
    V0,
    /// Adds Control Flow Guard pointers and flags.
    V1,
    /// Adds the code integrity block.
    V2,
    /// Adds address-taken IAT and long-jump tables.
    V3,
    /// Adds dynamic value relocations and hybrid metadata.
    V4,
    /// Adds Return Flow Guard routines.
    V5,
    /// Adds the stack-pointer verifier and hot-patch table.
    V6,
    /// Adds the enclave configuration pointer.
    V7,
}

/// Layout sizes for PE32, in ascending order.
pub const LOAD_CONFIG_SIZES_32: [(LoadConfigVersion, u32); 8] = [
    (LoadConfigVersion::V0, 72),
    (LoadConfigVersion::V1, 92),
    (LoadConfigVersion::V2, 104),
    (LoadConfigVersion::V3, 120),
    (LoadConfigVersion::V4, 128),
    (LoadConfigVersion::V5, 144),
    (LoadConfigVersion::V6, 152),
    (LoadConfigVersion::V7, 160),
];

/// Layout sizes for PE32+, in ascending order.
pub const LOAD_CONFIG_SIZES_64: [(LoadConfigVersion, u32); 8] = [
    (LoadConfigVersion::V0, 112),
    (LoadConfigVersion::V1, 148),
    (LoadConfigVersion::V2, 160),
    (LoadConfigVersion::V3, 192),
    (LoadConfigVersion::V4, 208),
    (LoadConfigVersion::V5, 232),
    (LoadConfigVersion::V6, 244),
    (LoadConfigVersion::V7, 256),
];

/// Picks the newest revision whose layout fits in the declared size.
pub fn select_version(declared_size: u32, bitness: Bitness) -> LoadConfigVersion {
    let table = match bitness {
        Bitness::Bits32 => &LOAD_CONFIG_SIZES_32,
        Bitness::Bits64 => &LOAD_CONFIG_SIZES_64,
    };
    let mut version = LoadConfigVersion::Base;
    for (candidate, struct_size) in table {
        if *struct_size <= declared_size {
            version = *candidate;
        }
    }
    version
}

/// SafeSEH handler table (v0).
#[derive(Debug, Clone, Default)]
pub struct SeHandlers {
    pub table: u64,
    pub count: u64,
}

/// Control Flow Guard block (v1).
#[derive(Debug, Clone, Default)]
pub struct GuardCf {
    pub check_function_pointer: u64,
    pub dispatch_function_pointer: u64,
    pub function_table: u64,
    pub function_count: u64,
    pub flags: u32,
}

/// Code integrity block (v2).
#[derive(Debug, Clone, Default)]
pub struct CodeIntegrity {
    pub flags: u16,
    pub catalog: u16,
    pub catalog_offset: u32,
    pub reserved: u32,
}

/// Address-taken IAT and long-jump guard tables (v3).
#[derive(Debug, Clone, Default)]
pub struct GuardAddressTaken {
    pub iat_entry_table: u64,
    pub iat_entry_count: u64,
    pub long_jump_target_table: u64,
    pub long_jump_target_count: u64,
}

/// Dynamic value relocations and hybrid metadata (v4).
#[derive(Debug, Clone, Default)]
pub struct HybridMetadata {
    pub dynamic_value_reloc_table: u64,
    pub hybrid_metadata_pointer: u64,
}

/// Return Flow Guard block (v5).
#[derive(Debug, Clone, Default)]
pub struct GuardRf {
    pub failure_routine: u64,
    pub failure_routine_function_pointer: u64,
    pub dynamic_value_reloc_table_offset: u32,
    pub dynamic_value_reloc_table_section: u16,
    pub reserved2: u16,
}

/// Stack-pointer verification and hot patching (v6).
#[derive(Debug, Clone, Default)]
pub struct HotPatch {
    pub verify_stack_pointer_function_pointer: u64,
    pub hot_patch_table_offset: u32,
}

/// Enclave configuration (v7).
#[derive(Debug, Clone, Default)]
pub struct EnclaveConfiguration {
    pub reserved3: u32,
    pub enclave_configuration_pointer: u64,
}

/// A decoded load configuration, tagged with its revision.
///
/// Every block past the base record is present exactly when the selected
/// revision includes it.
#[derive(Debug, Clone)]
pub struct LoadConfiguration {
    /// Selected revision.
    pub version: LoadConfigVersion,
    /// Declared structure size (the `Characteristics` field).
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub global_flags_clear: u32,
    pub global_flags_set: u32,
    pub critical_section_default_timeout: u32,
    pub decommit_free_block_threshold: u64,
    pub decommit_total_free_threshold: u64,
    pub lock_prefix_table: u64,
    pub maximum_allocation_size: u64,
    pub virtual_memory_threshold: u64,
    pub process_affinity_mask: u64,
    pub process_heap_flags: u32,
    pub csd_version: u16,
    pub reserved1: u16,
    pub edit_list: u64,
    pub security_cookie: u64,
    pub se_handlers: Option<SeHandlers>,
    pub guard_cf: Option<GuardCf>,
    pub code_integrity: Option<CodeIntegrity>,
    pub guard_address_taken: Option<GuardAddressTaken>,
    pub hybrid_metadata: Option<HybridMetadata>,
    pub guard_rf: Option<GuardRf>,
    pub hot_patch: Option<HotPatch>,
    pub enclave: Option<EnclaveConfiguration>,
}

/// Parse the load configuration at `config_rva`.
pub fn parse_load_config(
    data: &[u8],
    config_rva: u32,
    sections: &[SectionHeader],
    bitness: Bitness,
) -> Result<LoadConfiguration, ParseError> {
    let offset = super::rva_to_offset(config_rva, sections)
        .ok_or(ParseError::NotFound("section containing load configuration"))?;

    let mut stream = ByteStream::new(data);
    let declared_size = stream.peek_u32(offset)?;
    let version = select_version(declared_size, bitness);

    stream.set_position(offset);
    let characteristics = stream.read_u32()?;
    let time_date_stamp = stream.read_u32()?;
    let major_version = stream.read_u16()?;
    let minor_version = stream.read_u16()?;
    let global_flags_clear = stream.read_u32()?;
    let global_flags_set = stream.read_u32()?;
    let critical_section_default_timeout = stream.read_u32()?;
    let decommit_free_block_threshold = stream.read_ptr(bitness)?;
    let decommit_total_free_threshold = stream.read_ptr(bitness)?;
    let lock_prefix_table = stream.read_ptr(bitness)?;
    let maximum_allocation_size = stream.read_ptr(bitness)?;
    let virtual_memory_threshold = stream.read_ptr(bitness)?;

    // The affinity mask and heap flags swap places between the two
    // widths.
    let (process_affinity_mask, process_heap_flags) = match bitness {
        Bitness::Bits32 => {
            let heap_flags = stream.read_u32()?;
            let affinity = stream.read_ptr(bitness)?;
            (affinity, heap_flags)
        }
        Bitness::Bits64 => {
            let affinity = stream.read_ptr(bitness)?;
            let heap_flags = stream.read_u32()?;
            (affinity, heap_flags)
        }
    };

    let csd_version = stream.read_u16()?;
    let reserved1 = stream.read_u16()?;
    let edit_list = stream.read_ptr(bitness)?;
    let security_cookie = stream.read_ptr(bitness)?;

    let mut config = LoadConfiguration {
        version,
        characteristics,
        time_date_stamp,
        major_version,
        minor_version,
        global_flags_clear,
        global_flags_set,
        critical_section_default_timeout,
        decommit_free_block_threshold,
        decommit_total_free_threshold,
        lock_prefix_table,
        maximum_allocation_size,
        virtual_memory_threshold,
        process_affinity_mask,
        process_heap_flags,
        csd_version,
        reserved1,
        edit_list,
        security_cookie,
        se_handlers: None,
        guard_cf: None,
        code_integrity: None,
        guard_address_taken: None,
        hybrid_metadata: None,
        guard_rf: None,
        hot_patch: None,
        enclave: None,
    };

    if version >= LoadConfigVersion::V0 {
        config.se_handlers = Some(SeHandlers {
            table: stream.read_ptr(bitness)?,
            count: stream.read_ptr(bitness)?,
        });
    }
    if version >= LoadConfigVersion::V1 {
        config.guard_cf = Some(GuardCf {
            check_function_pointer: stream.read_ptr(bitness)?,
            dispatch_function_pointer: stream.read_ptr(bitness)?,
            function_table: stream.read_ptr(bitness)?,
            function_count: stream.read_ptr(bitness)?,
            flags: stream.read_u32()?,
        });
    }
    if version >= LoadConfigVersion::V2 {
        config.code_integrity = Some(CodeIntegrity {
            flags: stream.read_u16()?,
            catalog: stream.read_u16()?,
            catalog_offset: stream.read_u32()?,
            reserved: stream.read_u32()?,
        });
    }
    if version >= LoadConfigVersion::V3 {
        config.guard_address_taken = Some(GuardAddressTaken {
            iat_entry_table: stream.read_ptr(bitness)?,
            iat_entry_count: stream.read_ptr(bitness)?,
            long_jump_target_table: stream.read_ptr(bitness)?,
            long_jump_target_count: stream.read_ptr(bitness)?,
        });
    }
    if version >= LoadConfigVersion::V4 {
        config.hybrid_metadata = Some(HybridMetadata {
            dynamic_value_reloc_table: stream.read_ptr(bitness)?,
            hybrid_metadata_pointer: stream.read_ptr(bitness)?,
        });
    }
    if version >= LoadConfigVersion::V5 {
        config.guard_rf = Some(GuardRf {
            failure_routine: stream.read_ptr(bitness)?,
            failure_routine_function_pointer: stream.read_ptr(bitness)?,
            dynamic_value_reloc_table_offset: stream.read_u32()?,
            dynamic_value_reloc_table_section: stream.read_u16()?,
            reserved2: stream.read_u16()?,
        });
    }
    if version >= LoadConfigVersion::V6 {
        config.hot_patch = Some(HotPatch {
            verify_stack_pointer_function_pointer: stream.read_ptr(bitness)?,
            hot_patch_table_offset: stream.read_u32()?,
        });
    }
    if version >= LoadConfigVersion::V7 {
        config.enclave = Some(EnclaveConfiguration {
            reserved3: stream.read_u32()?,
            enclave_configuration_pointer: stream.read_ptr(bitness)?,
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_selection_is_monotone() {
        assert_eq!(select_version(0, Bitness::Bits32), LoadConfigVersion::Base);
        assert_eq!(select_version(64, Bitness::Bits32), LoadConfigVersion::Base);
        assert_eq!(select_version(72, Bitness::Bits32), LoadConfigVersion::V0);
        // A size between two layouts picks the smaller one.
        assert_eq!(select_version(100, Bitness::Bits32), LoadConfigVersion::V1);
        assert_eq!(select_version(160, Bitness::Bits32), LoadConfigVersion::V7);
        assert_eq!(select_version(u32::MAX, Bitness::Bits32), LoadConfigVersion::V7);

        assert_eq!(select_version(96, Bitness::Bits64), LoadConfigVersion::Base);
        assert_eq!(select_version(112, Bitness::Bits64), LoadConfigVersion::V0);
        assert_eq!(select_version(256, Bitness::Bits64), LoadConfigVersion::V7);
    }
}
