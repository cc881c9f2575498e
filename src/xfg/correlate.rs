//! Correlate XFG targets with the call sites that check their hash.
//!
//! Pass one groups entries by their stored hash, read from the executable
//! snapshot. Pass two scans the snapshot for hash loads and annotates every
//! site whose immediate names a known group.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::MarkerConfig;
use crate::host::{Annotator, SymbolSource};
use crate::pe::{AddressWidth, XFG_HASH_SIZE};

use super::naming::group_comment;
use super::regions::ExecutableRegions;
use super::scan::{find_hash_loads, mask_hash};
use super::table::XfgEntry;

/// Entries sharing one masked hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XfgHashGroup {
    pub entries: Vec<XfgEntry>,
    /// Built on first use and reused at every later site
    pub comment: Option<String>,
}

/// Masked hash -> group.
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    groups: HashMap<u64, XfgHashGroup>,
}

impl HashIndex {
    /// Group `entries` by the hash stored in front of each target.
    ///
    /// Returns the index and the number of entries that could not be read
    /// from the snapshot.
    pub fn build(entries: &[XfgEntry], regions: &ExecutableRegions) -> (Self, usize) {
        let mut index = Self::default();
        let mut warnings = 0;

        for entry in entries {
            let bytes = regions
                .read(entry.address, XFG_HASH_SIZE as usize)
                .and_then(|b| <[u8; 8]>::try_from(b).ok());
            let Some(bytes) = bytes else {
                warnings += 1;
                warn!(
                    "Warning: Failed to find memory region for XFG entry {:#x}",
                    entry.address
                );
                continue;
            };
            let hash = mask_hash(u64::from_le_bytes(bytes));
            index.groups.entry(hash).or_default().entries.push(*entry);
        }

        debug!(groups = index.groups.len(), "built XFG hash index");
        (index, warnings)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group for `hash`; the low bit is ignored.
    pub fn get(&self, hash: u64) -> Option<&XfgHashGroup> {
        self.groups.get(&mask_hash(hash))
    }

    fn get_mut(&mut self, hash: u64) -> Option<&mut XfgHashGroup> {
        self.groups.get_mut(&mask_hash(hash))
    }
}

/// Annotations added by one correlation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationResult {
    /// One per (site, group member) pair; each pair is two references
    pub xref_count: usize,
    /// One per annotated site
    pub comment_count: usize,
    pub usage_sites: usize,
}

/// Scan every region for hash loads and annotate the matching sites.
///
/// Host refusals are logged and otherwise ignored; counts reflect every
/// annotation requested.
pub fn correlate<H>(
    host: &mut H,
    regions: &ExecutableRegions,
    index: &mut HashIndex,
    signature: &[u8],
    config: &MarkerConfig,
    width: AddressWidth,
) -> CorrelationResult
where
    H: Annotator + SymbolSource + ?Sized,
{
    let mut result = CorrelationResult::default();

    for region in regions.iter() {
        let mut matches = find_hash_loads(region.bytes, signature);
        while let Some(hit) = matches.next() {
            let Some(group) = index.get_mut(hit.hash) else {
                continue;
            };
            matches.skip_immediate();
            let site = region.start + hit.offset as u64;
            result.usage_sites += 1;

            if config.add_xrefs {
                for entry in &group.entries {
                    let function = entry.function();
                    for (from, to) in [(site, function), (function, site)] {
                        if let Err(e) = host.add_xref(from, to) {
                            debug!("xref {:#x} -> {:#x} refused: {}", from, to, e);
                        }
                    }
                    result.xref_count += 1;
                }
            }

            if config.add_comments {
                let comment = group
                    .comment
                    .get_or_insert_with(|| group_comment(&*host, &group.entries, width));
                if let Err(e) = host.set_auto_comment(site, comment) {
                    debug!("comment at {:#x} refused: {}", site, e);
                }
                result.comment_count += 1;
            }
        }
    }

    result
}
