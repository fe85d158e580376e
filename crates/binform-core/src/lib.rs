//! # binform-core
//!
//! Core abstractions shared by the binform format parsers. This crate
//! defines format-agnostic types for architectures, byte order, and
//! symbols extracted from binaries.

pub mod arch;
pub mod symbol;

pub use arch::{Architecture, Bitness, Endianness};
pub use symbol::{Symbol, SymbolBinding, SymbolKind};
