//! Decode XFG entries from the guard function table.
//!
//! The table is an array of variable-size records:
//!   u32       RVA of the guarded function
//!   variable  metadata; the first byte carries the per-function flags
//! The metadata size comes from the guard flags. XFG-flagged functions carry
//! their 64-bit type hash in the 8 bytes directly below the function start.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, XfgError};
use crate::host::{Annotator, RemoteCursor, RemoteMemory};
use crate::pe::{LoadConfigFields, IMAGE_GUARD_FLAG_FID_XFG, XFG_HASH_SIZE};

/// Location of a stored XFG hash, 8 bytes below its guarded function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct XfgEntry {
    pub address: u64,
}

impl XfgEntry {
    /// Entry for the function at `module_base + rva`.
    pub fn from_rva(module_base: u64, rva: u32) -> Self {
        Self {
            address: module_base
                .wrapping_add(rva as u64)
                .wrapping_sub(XFG_HASH_SIZE),
        }
    }

    /// Start of the guarded function.
    pub fn function(&self) -> u64 {
        self.address.wrapping_add(XFG_HASH_SIZE)
    }
}

/// Outcome of walking the guard table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTable {
    /// XFG entries in table order
    pub entries: Vec<XfgEntry>,
    /// Entries successfully marked as 64-bit data
    pub marked: usize,
    /// Markings the host refused
    pub warnings: usize,
}

/// Validate the guard flags and return the per-entry metadata size.
pub fn metadata_stride(fields: &LoadConfigFields) -> Result<u32> {
    if !fields.xfg_enabled() {
        return Err(XfgError::XfgNotEnabled {
            guard_flags: fields.guard_flags,
        });
    }
    match fields.metadata_size() {
        0 => Err(XfgError::ZeroStride {
            guard_flags: fields.guard_flags,
        }),
        stride => Ok(stride),
    }
}

/// Walk the guard table, collecting XFG entries and marking each stored hash
/// as a 64-bit value.
///
/// A read failure anywhere in the table aborts the walk; a refused marking
/// is only counted.
pub fn decode_xfg_entries<H>(
    host: &mut H,
    module_base: u64,
    fields: &LoadConfigFields,
) -> Result<DecodedTable>
where
    H: RemoteMemory + Annotator + ?Sized,
{
    let stride = metadata_stride(fields)? as u64;

    let mut entries = Vec::new();
    let mut position = fields.guard_cf_function_table;
    for _ in 0..fields.guard_cf_function_count {
        let (rva, flags) = {
            let mut cursor = RemoteCursor::new(&*host, position);
            let rva = cursor.read_u32().map_err(|source| XfgError::TableRead {
                address: cursor.position(),
                source,
            })?;
            let flags = cursor.peek_u8().map_err(|source| XfgError::TableRead {
                address: cursor.position(),
                source,
            })?;
            cursor.skip(stride);
            position = cursor.position();
            (rva, flags)
        };

        if flags & IMAGE_GUARD_FLAG_FID_XFG != 0 {
            entries.push(XfgEntry::from_rva(module_base, rva));
        }
    }
    debug!(
        count = fields.guard_cf_function_count,
        xfg = entries.len(),
        "walked guard function table"
    );

    let mut table = DecodedTable {
        entries,
        ..Default::default()
    };
    for entry in &table.entries {
        match host.mark_data(entry.address, XFG_HASH_SIZE as usize) {
            Ok(()) => table.marked += 1,
            Err(e) => {
                table.warnings += 1;
                warn!("Warning: Failed to mark {:#x} XFG entry: {}", entry.address, e);
            }
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ImageHost;
    use crate::pe::{locate_load_config, AddressWidth, IMAGE_GUARD_CF_INSTRUMENTED};
    use crate::synth::{SyntheticModule, CODE_RVA};

    const BASE: u64 = 0x1_8000_0000;

    fn fields(host: &ImageHost) -> LoadConfigFields {
        locate_load_config(host, BASE, AddressWidth::Bits64).unwrap()
    }

    #[test]
    fn entry_address_is_rva_minus_eight() {
        let e = XfgEntry::from_rva(BASE, 0x10010);
        assert_eq!(e.address, BASE + 0x10010 - 8);
        assert_eq!(e.function(), BASE + 0x10010);
    }

    #[test]
    fn filters_xfg_entries() {
        let a = CODE_RVA + 0x10;
        let b = CODE_RVA + 0x40;
        let mut host = SyntheticModule::new(BASE, AddressWidth::Bits64)
            .xfg_function(a, 1)
            .cfg_function(CODE_RVA + 0x20)
            .xfg_function(b, 2)
            .build();
        let f = fields(&host);

        let table = decode_xfg_entries(&mut host, BASE, &f).unwrap();
        assert_eq!(
            table.entries,
            vec![XfgEntry::from_rva(BASE, a), XfgEntry::from_rva(BASE, b)]
        );
        assert_eq!(table.marked, 2);
        assert_eq!(table.warnings, 0);
        assert_eq!(
            host.annotations().data_marks.get(&(BASE + a as u64 - 8)),
            Some(&8)
        );
    }

    #[test]
    fn wide_metadata_stride_skips_padding() {
        let a = CODE_RVA + 0x10;
        let b = CODE_RVA + 0x80;
        let mut host = SyntheticModule::new(BASE, AddressWidth::Bits64)
            .metadata_size(5)
            .xfg_function(a, 1)
            .xfg_function(b, 2)
            .build();
        let f = fields(&host);
        assert_eq!(metadata_stride(&f).unwrap(), 5);

        let table = decode_xfg_entries(&mut host, BASE, &f).unwrap();
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[1].function(), BASE + b as u64);
    }

    #[test]
    fn zero_stride_fails() {
        let mut host = SyntheticModule::new(BASE, AddressWidth::Bits64)
            .metadata_size(0)
            .xfg_function(CODE_RVA + 0x10, 1)
            .build();
        let f = fields(&host);

        assert!(matches!(
            decode_xfg_entries(&mut host, BASE, &f),
            Err(XfgError::ZeroStride { .. })
        ));
    }

    #[test]
    fn xfg_disabled_fails() {
        let mut host = SyntheticModule::new(BASE, AddressWidth::Bits64)
            .guard_flags(IMAGE_GUARD_CF_INSTRUMENTED)
            .xfg_function(CODE_RVA + 0x10, 1)
            .build();
        let f = fields(&host);

        assert!(matches!(
            decode_xfg_entries(&mut host, BASE, &f),
            Err(XfgError::XfgNotEnabled { .. })
        ));
        assert!(host.annotations().data_marks.is_empty());
    }

    #[test]
    fn unreadable_table_is_fatal() {
        let module =
            SyntheticModule::new(BASE, AddressWidth::Bits64).xfg_function(CODE_RVA + 0x10, 1);
        let mut host = module.build();
        let f = fields(&host);
        host.fail_reads_at(module.guard_table_address());

        assert!(matches!(
            decode_xfg_entries(&mut host, BASE, &f),
            Err(XfgError::TableRead { address, .. }) if address == module.guard_table_address()
        ));
    }

    #[test]
    fn refused_marking_is_a_warning() {
        let a = CODE_RVA + 0x10;
        let mut host = SyntheticModule::new(BASE, AddressWidth::Bits64)
            .xfg_function(a, 1)
            .xfg_function(CODE_RVA + 0x30, 2)
            .build();
        host.reject_mark_at(BASE + a as u64 - 8);
        let f = fields(&host);

        let table = decode_xfg_entries(&mut host, BASE, &f).unwrap();
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.marked, 1);
        assert_eq!(table.warnings, 1);
    }
}
