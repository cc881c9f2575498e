//! PE layout constants and address-width parameters.
//!
//! Offsets here are relative to structures living in the target's memory and
//! are only ever used to compute remote addresses.

pub mod load_config;

pub use load_config::{locate_load_config, LoadConfigError, LoadConfigFields};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of `e_lfanew` in the DOS header
pub const DOS_E_LFANEW_OFFSET: u64 = 0x3C;
/// Size of the `PE\0\0` signature plus the COFF file header
pub const NT_SIGNATURE_AND_FILE_HEADER_SIZE: u64 = 4 + 20;
/// Size of one data directory entry (RVA + size)
pub const DATA_DIRECTORY_ENTRY_SIZE: u64 = 8;

pub const IMAGE_DIRECTORY_ENTRY_LOAD_CONFIG: u32 = 10;

pub const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20b;
/// Size of one section table entry
pub const IMAGE_SIZEOF_SECTION_HEADER: u64 = 40;

// Section characteristics
pub const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

// Guard flags (LoadConfig.GuardFlags)
pub const IMAGE_GUARD_CF_INSTRUMENTED: u32 = 0x0000_0100;
pub const IMAGE_GUARD_CF_FUNCTION_TABLE_PRESENT: u32 = 0x0000_0400;
pub const IMAGE_GUARD_XFG_ENABLED: u32 = 0x0080_0000;
pub const IMAGE_GUARD_CF_FUNCTION_TABLE_SIZE_MASK: u32 = 0xF000_0000;
pub const IMAGE_GUARD_CF_FUNCTION_TABLE_SIZE_SHIFT: u32 = 28;

// Per-entry metadata flags in the guard function table
pub const IMAGE_GUARD_FLAG_FID_SUPPRESSED: u8 = 0x01;
pub const IMAGE_GUARD_FLAG_EXPORT_SUPPRESSED: u8 = 0x02;
pub const IMAGE_GUARD_FLAG_FID_LANGEXCPTHANDLER: u8 = 0x04;
/// Call target supports XFG
pub const IMAGE_GUARD_FLAG_FID_XFG: u8 = 0x08;

/// Size of the type hash stored in front of every XFG target.
pub const XFG_HASH_SIZE: u64 = 8;

/// `mov r10, imm64` opcode bytes (REX.WB + B8+r), used to stage the
/// expected hash before an XFG-checked indirect call on x64.
pub const X64_HASH_LOAD_PREFIX: [u8; 2] = [0x49, 0xBA];

/// Address width of the target process.
///
/// Selected once per run; every width-dependent offset flows from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressWidth {
    Bits32,
    Bits64,
}

impl AddressWidth {
    /// Size of a pointer in bytes.
    pub fn pointer_size(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// `SizeOfOptionalHeader` with all 16 data directories.
    pub fn optional_header_size(self) -> u64 {
        match self {
            Self::Bits32 => 224,
            Self::Bits64 => 240,
        }
    }

    /// Offset of `GuardCFCheckFunctionPointer` inside the load-config structure.
    pub fn guard_fields_offset(self) -> u64 {
        match self {
            Self::Bits32 => 72,
            Self::Bits64 => 112,
        }
    }

    /// Size of the five guard fields: four pointers and the 32-bit flags.
    pub fn guard_fields_size(self) -> u64 {
        4 * self.pointer_size() as u64 + 4
    }

    /// Offset of `NumberOfRvaAndSizes` from the start of the NT headers.
    pub fn rva_and_sizes_count_offset(self) -> u64 {
        NT_SIGNATURE_AND_FILE_HEADER_SIZE
            + match self {
                Self::Bits32 => 92,
                Self::Bits64 => 108,
            }
    }

    /// Offset of the first data directory from the start of the NT headers.
    pub fn data_directories_offset(self) -> u64 {
        NT_SIGNATURE_AND_FILE_HEADER_SIZE
            + match self {
                Self::Bits32 => 96,
                Self::Bits64 => 112,
            }
    }

    /// Byte signature preceding an 8-byte hash immediate at XFG call sites.
    ///
    /// `None` when no signature is known for this width.
    pub fn hash_load_signature(self) -> Option<&'static [u8]> {
        match self {
            Self::Bits32 => None,
            Self::Bits64 => Some(&X64_HASH_LOAD_PREFIX),
        }
    }

    /// Render an address the way the host prints pointers.
    pub fn format_address(self, address: u64) -> String {
        match self {
            Self::Bits32 => format!("{:08X}", address as u32),
            Self::Bits64 => format!("{:016X}", address),
        }
    }
}

impl fmt::Display for AddressWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bits32 => write!(f, "32-bit"),
            Self::Bits64 => write!(f, "64-bit"),
        }
    }
}
