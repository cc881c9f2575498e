//! Snapshots of a module's executable memory.
//!
//! Contiguous executable pages are merged into one region and copied out of
//! the target in a single read. Regions are keyed by start address so the
//! region holding any address is one ordered-map lookup away.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::{debug, warn};

use crate::host::{ModuleImage, PageRights, RemoteMemory};

/// Default page granularity used when walking a module.
pub const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// Whether `page_size` can step through a module.
pub fn valid_page_size(page_size: u64) -> bool {
    page_size.is_power_of_two()
}

/// A local copy of one run of executable pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutableRegion<'a> {
    pub start: u64,
    pub bytes: &'a [u8],
}

impl<'a> ExecutableRegion<'a> {
    /// One past the last captured byte.
    pub fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }

    /// The `len` captured bytes at `address`, if they lie entirely inside
    /// this region.
    pub fn slice(&self, address: u64, len: usize) -> Option<&'a [u8]> {
        let offset = usize::try_from(address.checked_sub(self.start)?).ok()?;
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }
}

/// Executable regions of one module, ordered by start address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutableRegions {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl ExecutableRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, start: u64, bytes: Vec<u8>) {
        self.regions.insert(start, bytes);
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Total captured bytes.
    pub fn captured_bytes(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = ExecutableRegion<'_>> {
        self.regions.iter().map(|(&start, bytes)| ExecutableRegion {
            start,
            bytes: bytes.as_slice(),
        })
    }

    /// The region with the greatest start address not above `address`.
    pub fn at_or_before(&self, address: u64) -> Option<ExecutableRegion<'_>> {
        self.regions
            .range((Bound::Unbounded, Bound::Included(address)))
            .next_back()
            .map(|(&start, bytes)| ExecutableRegion {
                start,
                bytes: bytes.as_slice(),
            })
    }

    /// The region that captured `address`, if any.
    pub fn containing(&self, address: u64) -> Option<ExecutableRegion<'_>> {
        self.at_or_before(address)
            .filter(|region| address < region.end())
    }

    /// `len` captured bytes at `address`, without touching the target.
    pub fn read(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.at_or_before(address)?.slice(address, len)
    }
}

/// Snapshot statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Pages whose rights could not be queried plus regions that could not be read
    pub warnings: usize,
}

/// Copy every run of executable pages in `module` out of the target.
///
/// A failed rights query ends the current run and skips that page; a failed
/// bulk read drops the whole run. Neither stops the walk.
pub fn snapshot_executable_regions<H>(
    host: &H,
    module: ModuleImage,
    page_size: u64,
) -> (ExecutableRegions, SnapshotStats)
where
    H: RemoteMemory + PageRights + ?Sized,
{
    let page_size = if valid_page_size(page_size) {
        page_size
    } else {
        warn!("invalid page size {:#x}, using {:#x}", page_size, DEFAULT_PAGE_SIZE);
        DEFAULT_PAGE_SIZE
    };
    let mut regions = ExecutableRegions::new();
    let mut stats = SnapshotStats::default();
    let end = module.end();

    let mut page = module.base;
    while page < end {
        let start = page;
        let mut size = 0u64;

        while page < end {
            match host.page_rights(page) {
                Ok(rights) if rights.starts_with('E') => {
                    size += page_size;
                    page = page.saturating_add(page_size);
                }
                Ok(_) => break,
                Err(e) => {
                    stats.warnings += 1;
                    warn!("Warning: Failed to get page access rights for {:#x}: {}", page, e);
                    break;
                }
            }
        }
        // step over the page that ended the run
        page = page.saturating_add(page_size);

        if size == 0 {
            continue;
        }

        match host.read_bytes(start, size as usize) {
            Ok(bytes) => {
                debug!(
                    start = format_args!("{:#x}", start),
                    size, "captured executable region"
                );
                regions.insert(start, bytes);
            }
            Err(e) => {
                stats.warnings += 1;
                warn!("Warning: Failed to read {:#x} bytes at {:#x}: {}", size, start, e);
            }
        }
    }

    (regions, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ImageHost, PageProtection};

    const RX: PageProtection = PageProtection::READ.union(PageProtection::EXECUTE);

    fn regions(spans: &[(u64, usize)]) -> ExecutableRegions {
        let mut r = ExecutableRegions::new();
        for &(start, len) in spans {
            r.insert(start, vec![0xCC; len]);
        }
        r
    }

    #[test]
    fn lookup_returns_enclosing_region() {
        let r = regions(&[(0x1000, 0x1000), (0x4000, 0x2000)]);

        assert_eq!(r.containing(0x1000).unwrap().start, 0x1000);
        assert_eq!(r.containing(0x1fff).unwrap().start, 0x1000);
        assert_eq!(r.containing(0x4000).unwrap().start, 0x4000);
        assert_eq!(r.containing(0x5abc).unwrap().start, 0x4000);
    }

    #[test]
    fn lookup_in_gap_is_none() {
        let r = regions(&[(0x1000, 0x1000), (0x4000, 0x2000)]);

        assert!(r.containing(0x0fff).is_none());
        assert!(r.containing(0x2000).is_none());
        assert!(r.containing(0x3fff).is_none());
        assert!(r.containing(0x6000).is_none());
        // the preceding region exists but does not cover the address
        assert_eq!(r.at_or_before(0x3000).unwrap().start, 0x1000);
    }

    #[test]
    fn read_is_bounded_by_region_length() {
        let r = regions(&[(0x1000, 0x10)]);
        assert!(r.read(0x1008, 8).is_some());
        assert!(r.read(0x1009, 8).is_none());
        assert!(r.read(0x0ff8, 8).is_none());
    }

    #[test]
    fn merges_contiguous_executable_pages() {
        let mut host = ImageHost::new();
        host.map(0x10000, 0x1000, PageProtection::READ);
        host.map(0x11000, 0x2000, RX);
        host.map(0x13000, 0x1000, PageProtection::READ | PageProtection::WRITE);
        host.map(0x14000, 0x1000, RX);

        let module = ModuleImage::new(0x10000, 0x5000);
        let (r, stats) = snapshot_executable_regions(&host, module, DEFAULT_PAGE_SIZE);

        let spans: Vec<_> = r.iter().map(|x| (x.start, x.bytes.len())).collect();
        assert_eq!(spans, vec![(0x11000, 0x2000), (0x14000, 0x1000)]);
        assert_eq!(stats.warnings, 0);
        assert_eq!(r.captured_bytes(), 0x3000);
    }

    #[test]
    fn zero_page_size_falls_back_to_default() {
        let mut host = ImageHost::new();
        host.map(0x10000, 0x2000, RX);

        let module = ModuleImage::new(0x10000, 0x2000);
        let (r, stats) = snapshot_executable_regions(&host, module, 0);

        let spans: Vec<_> = r.iter().map(|x| (x.start, x.bytes.len())).collect();
        assert_eq!(spans, vec![(0x10000, 0x2000)]);
        assert_eq!(stats.warnings, 0);
    }

    #[test]
    fn rights_failure_splits_region() {
        let mut host = ImageHost::new();
        host.map(0x10000, 0x4000, RX);
        host.fail_rights_query_at(0x11000);

        let module = ModuleImage::new(0x10000, 0x4000);
        let (r, stats) = snapshot_executable_regions(&host, module, DEFAULT_PAGE_SIZE);

        let spans: Vec<_> = r.iter().map(|x| (x.start, x.bytes.len())).collect();
        assert_eq!(spans, vec![(0x10000, 0x1000), (0x12000, 0x2000)]);
        assert_eq!(stats.warnings, 1);
    }

    #[test]
    fn unreadable_region_is_dropped() {
        let mut host = ImageHost::new();
        host.map(0x10000, 0x1000, RX);
        host.map(0x11000, 0x1000, PageProtection::READ);
        host.map(0x12000, 0x2000, RX);
        host.fail_reads_at(0x13000);

        let module = ModuleImage::new(0x10000, 0x4000);
        let (r, stats) = snapshot_executable_regions(&host, module, DEFAULT_PAGE_SIZE);

        assert_eq!(r.len(), 1);
        assert_eq!(r.iter().next().unwrap().start, 0x10000);
        assert_eq!(stats.warnings, 1);
    }
}
