//! Mach-O load command parsing.

use super::segment::Segment;
use crate::ParseError;

// Load command types
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_LOAD_DYLIB: u32 = 0xC;
pub const LC_ID_DYLIB: u32 = 0xD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_UUID: u32 = 0x1B;
pub const LC_MAIN: u32 = 0x80000028;
pub const LC_BUILD_VERSION: u32 = 0x32;

/// A parsed load command.
#[derive(Debug, Clone)]
pub enum LoadCommand {
    /// LC_SEGMENT (32-bit)
    Segment(Segment),
    /// LC_SEGMENT_64
    Segment64(Segment),
    /// LC_MAIN
    Main { entryoff: u64, stacksize: u64 },
    /// LC_UUID
    Uuid { uuid: [u8; 16] },
    /// LC_LOAD_DYLIB / LC_ID_DYLIB
    LoadDylib { name: String },
    /// LC_BUILD_VERSION
    BuildVersion { platform: u32, minos: u32, sdk: u32 },
    /// Other/unknown load command
    Other { cmd: u32, cmdsize: u32 },
}

impl LoadCommand {
    /// Parse a load command from bytes.
    ///
    /// `data` covers the whole command (`cmdsize` bytes, starting at the
    /// tag). Segment commands decode only the fixed record here; the
    /// binary parser attaches their sections and payload.
    pub fn parse(cmd: u32, data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::too_short(8, data.len()));
        }

        let cmdsize = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        let result = match cmd {
            LC_SEGMENT => Self::Segment(Segment::parse_32(data)?),
            LC_SEGMENT_64 => Self::Segment64(Segment::parse_64(data)?),
            LC_MAIN => {
                if data.len() < 24 {
                    return Err(ParseError::too_short(24, data.len()));
                }
                let read_u64 = |offset: usize| -> u64 {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&data[offset..offset + 8]);
                    u64::from_le_bytes(bytes)
                };
                Self::Main {
                    entryoff: read_u64(8),
                    stacksize: read_u64(16),
                }
            }
            LC_UUID => {
                if data.len() < 24 {
                    return Err(ParseError::too_short(24, data.len()));
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&data[8..24]);
                Self::Uuid { uuid }
            }
            LC_LOAD_DYLIB | LC_ID_DYLIB => {
                if data.len() < 24 {
                    return Ok(Self::Other { cmd, cmdsize });
                }
                let name_offset =
                    u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
                let name = if name_offset < data.len() {
                    let name_bytes = &data[name_offset..];
                    let end = name_bytes
                        .iter()
                        .position(|&b| b == 0)
                        .unwrap_or(name_bytes.len());
                    String::from_utf8_lossy(&name_bytes[..end]).to_string()
                } else {
                    String::new()
                };
                Self::LoadDylib { name }
            }
            LC_BUILD_VERSION => {
                if data.len() < 20 {
                    return Ok(Self::Other { cmd, cmdsize });
                }
                Self::BuildVersion {
                    platform: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
                    minos: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
                    sdk: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
                }
            }
            _ => Self::Other { cmd, cmdsize },
        };

        Ok(result)
    }

    /// Returns the command type tag.
    pub fn cmd_type(&self) -> u32 {
        match self {
            Self::Segment(_) => LC_SEGMENT,
            Self::Segment64(_) => LC_SEGMENT_64,
            Self::Main { .. } => LC_MAIN,
            Self::Uuid { .. } => LC_UUID,
            Self::LoadDylib { .. } => LC_LOAD_DYLIB,
            Self::BuildVersion { .. } => LC_BUILD_VERSION,
            Self::Other { cmd, .. } => *cmd,
        }
    }

    /// Returns true if this command carries a segment (32- or 64-bit).
    pub fn is_segment(&self) -> bool {
        matches!(self, Self::Segment(_) | Self::Segment64(_))
    }

    /// Returns the carried segment, if any.
    pub fn segment(&self) -> Option<&Segment> {
        match self {
            Self::Segment(seg) | Self::Segment64(seg) => Some(seg),
            _ => None,
        }
    }

    /// Returns a human-readable name for this command type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Segment(_) => "LC_SEGMENT",
            Self::Segment64(_) => "LC_SEGMENT_64",
            Self::Main { .. } => "LC_MAIN",
            Self::Uuid { .. } => "LC_UUID",
            Self::LoadDylib { .. } => "LC_LOAD_DYLIB",
            Self::BuildVersion { .. } => "LC_BUILD_VERSION",
            Self::Other { .. } => "LC_OTHER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_classification() {
        let mut data = vec![0u8; 72];
        data[0..4].copy_from_slice(&LC_SEGMENT_64.to_le_bytes());
        data[4..8].copy_from_slice(&72u32.to_le_bytes());
        data[8..14].copy_from_slice(b"__TEXT");

        let lc = LoadCommand::parse(LC_SEGMENT_64, &data).unwrap();
        assert!(lc.is_segment());
        assert_eq!(lc.cmd_type(), LC_SEGMENT_64);
        assert_eq!(lc.segment().map(|s| s.segname.as_str()), Some("__TEXT"));

        let other = LoadCommand::parse(LC_UUID, &vec![0u8; 24]).unwrap();
        assert!(!other.is_segment());
    }
}
