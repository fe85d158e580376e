//! Traits for binary format abstraction.

use binform_core::{Architecture, Bitness, Endianness, Symbol};

/// A parsed binary file.
///
/// This trait abstracts over the binary formats (Mach-O, PE) to provide a
/// uniform read-only view of the parsed object graph.
pub trait BinaryFormat {
    /// Returns the target architecture.
    fn architecture(&self) -> Architecture;

    /// Returns the byte order.
    fn endianness(&self) -> Endianness;

    /// Returns whether this is a 32-bit or 64-bit binary.
    fn bitness(&self) -> Bitness;

    /// Returns the entry point address, if any.
    fn entry_point(&self) -> Option<u64>;

    /// Returns an iterator over all sections.
    fn sections(&self) -> Box<dyn Iterator<Item = &dyn Section> + '_>;

    /// Returns the section whose file range contains the given offset.
    fn section_from_offset(&self, offset: u64) -> Option<&dyn Section>;

    /// Returns an iterator over symbols.
    fn symbols(&self) -> Box<dyn Iterator<Item = &Symbol> + '_>;
}

/// A section in a binary.
pub trait Section {
    /// Section name.
    fn name(&self) -> &str;

    /// Virtual address where this section is loaded.
    fn virtual_address(&self) -> u64;

    /// Offset of the section's raw data in the file.
    fn file_offset(&self) -> u64;

    /// Size in bytes.
    fn size(&self) -> u64;

    /// Raw section data.
    fn data(&self) -> &[u8];

    /// Returns true if this section contains executable code.
    fn is_executable(&self) -> bool;

    /// Returns true if this section is writable.
    fn is_writable(&self) -> bool;
}
