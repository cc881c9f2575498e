//! Locate the load-configuration directory of a mapped module and extract
//! its control-flow-guard field block.
//!
//! The walk is DOS header -> `e_lfanew` -> NT headers -> data directory 10 ->
//! load-config structure. Every hop is a remote read; nothing is trusted
//! until the structure's own `Size` field covers the guard block.
//!
//! references:
//!   - https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#load-configuration-directory

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::*;
use crate::host::memory::{MemoryError, RemoteCursor, RemoteMemory};

/// Why no usable guard block was found.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LoadConfigError {
    #[error("failed to read PE headers: {0}")]
    HeaderRead(#[from] MemoryError),
    #[error("module declares only {count} data directories")]
    DirectoryIndexOutOfRange { count: u32 },
    #[error("load config directory is absent")]
    DirectoryMissing,
    #[error("load config directory is too small ({size} bytes)")]
    DirectoryTooSmall { size: u32 },
    #[error("load config declares {declared} bytes, guard fields need {required}")]
    GuardFieldsTruncated { declared: u32, required: u64 },
    #[error("header offset {offset:#x} from {base:#x} leaves the address space")]
    AddressOverflow { base: u64, offset: u64 },
}

fn header_field(base: u64, offset: u64) -> Result<u64, LoadConfigError> {
    base.checked_add(offset).ok_or(LoadConfigError::AddressOverflow { base, offset })
}

/// The control-flow-guard block of the load-config structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfigFields {
    pub guard_cf_check_function_pointer: u64,
    pub guard_cf_dispatch_function_pointer: u64,
    /// VA of the guard function table
    pub guard_cf_function_table: u64,
    /// Number of entries in the guard function table
    pub guard_cf_function_count: u64,
    pub guard_flags: u32,
}

impl LoadConfigFields {
    pub fn xfg_enabled(&self) -> bool {
        self.guard_flags & IMAGE_GUARD_XFG_ENABLED != 0
    }

    /// Bytes of metadata following each 4-byte RVA in the guard table.
    pub fn metadata_size(&self) -> u32 {
        (self.guard_flags & IMAGE_GUARD_CF_FUNCTION_TABLE_SIZE_MASK)
            >> IMAGE_GUARD_CF_FUNCTION_TABLE_SIZE_SHIFT
    }
}

/// Find the NT headers of the module at `module_base`.
pub fn nt_headers_address<M: RemoteMemory + ?Sized>(
    memory: &M,
    module_base: u64,
) -> Result<u64, MemoryError> {
    let e_lfanew = memory.read_i32(module_base.wrapping_add(DOS_E_LFANEW_OFFSET))?;
    Ok(module_base.wrapping_add_signed(e_lfanew as i64))
}

/// Read data directory `index` as `(rva, size)`.
pub fn data_directory<M: RemoteMemory + ?Sized>(
    memory: &M,
    nt_headers: u64,
    width: AddressWidth,
    index: u32,
) -> Result<(u32, u32), LoadConfigError> {
    let count_at = header_field(nt_headers, width.rva_and_sizes_count_offset())?;
    let count = memory.read_u32(count_at)?;
    if count <= index {
        return Err(LoadConfigError::DirectoryIndexOutOfRange { count });
    }

    let entry = header_field(
        nt_headers,
        width.data_directories_offset() + index as u64 * DATA_DIRECTORY_ENTRY_SIZE,
    )?;
    let mut cursor = RemoteCursor::new(memory, entry);
    let rva = cursor.read_u32()?;
    let size = cursor.read_u32()?;
    Ok((rva, size))
}

/// Read the guard-CF field block of the module at `module_base`.
pub fn locate_load_config<M: RemoteMemory + ?Sized>(
    memory: &M,
    module_base: u64,
    width: AddressWidth,
) -> Result<LoadConfigFields, LoadConfigError> {
    let nt_headers = nt_headers_address(memory, module_base)?;
    debug!(nt_headers = format_args!("{:#x}", nt_headers), "found NT headers");

    let (rva, size) = data_directory(
        memory,
        nt_headers,
        width,
        IMAGE_DIRECTORY_ENTRY_LOAD_CONFIG,
    )?;
    if rva == 0 {
        return Err(LoadConfigError::DirectoryMissing);
    }
    if (size as usize) < std::mem::size_of::<u32>() {
        return Err(LoadConfigError::DirectoryTooSmall { size });
    }

    let load_config = header_field(module_base, rva as u64)?;
    debug!(
        load_config = format_args!("{:#x}", load_config),
        size, "load config directory"
    );

    // The first DWORD of the structure is its own size; older linkers emit
    // structures that end before the guard fields.
    let declared = memory.read_u32(load_config)?;
    let required = width.guard_fields_offset() + width.guard_fields_size();
    if (declared as u64) < required {
        return Err(LoadConfigError::GuardFieldsTruncated { declared, required });
    }

    let pointer_size = width.pointer_size();
    let guard_fields = header_field(load_config, width.guard_fields_offset())?;
    let mut cursor = RemoteCursor::new(memory, guard_fields);
    let fields = LoadConfigFields {
        guard_cf_check_function_pointer: cursor.read_pointer(pointer_size)?,
        guard_cf_dispatch_function_pointer: cursor.read_pointer(pointer_size)?,
        guard_cf_function_table: cursor.read_pointer(pointer_size)?,
        guard_cf_function_count: cursor.read_pointer(pointer_size)?,
        guard_flags: cursor.read_u32()?,
    };
    debug!(
        table = format_args!("{:#x}", fields.guard_cf_function_table),
        count = fields.guard_cf_function_count,
        flags = format_args!("{:#x}", fields.guard_flags),
        "guard CF fields"
    );

    Ok(fields)
}
