//! XFG marking pipeline.
//!
//! A run reads the guard table of the selected module, marks every stored
//! XFG hash as a 64-bit value, and when enabled links call sites that load a
//! known hash with the functions that carry it.
//!
//! ```text
//! load config -> guard table -> executable snapshot -> hash index -> scan
//! ```

pub mod correlate;
pub mod naming;
pub mod regions;
pub mod scan;
pub mod table;

pub use correlate::{correlate, CorrelationResult, HashIndex, XfgHashGroup};
pub use regions::{snapshot_executable_regions, ExecutableRegion, ExecutableRegions};
pub use scan::{find_hash_loads, mask_hash, HashLoad, HashLoadMatches};
pub use table::{decode_xfg_entries, metadata_stride, DecodedTable, XfgEntry};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MarkerConfig;
use crate::error::{Result, XfgError};
use crate::host::{DebugHost, ModuleImage};
use crate::pe::{locate_load_config, AddressWidth};

/// Tunables for the region snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanOptions {
    page_size: u64,
}

impl ScanOptions {
    /// Options stepping through modules in `page_size` units, which must be a
    /// power of two.
    pub fn with_page_size(page_size: u64) -> Result<Self> {
        if !regions::valid_page_size(page_size) {
            return Err(XfgError::InvalidPageSize(page_size));
        }
        Ok(Self { page_size })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: regions::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub entries_found: usize,
    pub entries_marked: usize,
    pub xref_count: usize,
    pub comment_count: usize,
    pub warning_count: usize,
}

impl RunResult {
    /// One-line summary in the host log format.
    pub fn summary(&self) -> String {
        if self.entries_found == 0 {
            return "No XFG entries were found".to_string();
        }

        let mut msg = if self.entries_found == self.entries_marked {
            format!("Found and marked {} XFG entries", self.entries_found)
        } else {
            format!(
                "Found {} XFG entries, marked {} entries",
                self.entries_found, self.entries_marked
            )
        };
        if self.xref_count > 0 {
            msg.push_str(&format!(", added {} xrefs", self.xref_count));
        }
        if self.comment_count > 0 {
            msg.push_str(&format!(", added {} comments", self.comment_count));
        }
        if self.warning_count > 0 {
            msg.push_str(&format!(" ({} warnings, see log)", self.warning_count));
        }
        msg
    }
}

/// Runs the marking pipeline against a debug host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XfgMarker {
    width: AddressWidth,
    options: ScanOptions,
}

impl XfgMarker {
    pub fn new(width: AddressWidth) -> Self {
        Self {
            width,
            options: ScanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn width(&self) -> AddressWidth {
        self.width
    }

    pub fn options(&self) -> ScanOptions {
        self.options
    }

    /// Mark the module backing the current selection.
    pub fn run<H>(&self, host: &mut H, config: &MarkerConfig) -> Result<RunResult>
    where
        H: DebugHost + ?Sized,
    {
        let module = host.selected_module().ok_or(XfgError::NoModule)?;
        self.run_module(host, module, config)
    }

    /// Mark an explicit module.
    pub fn run_module<H>(
        &self,
        host: &mut H,
        module: ModuleImage,
        config: &MarkerConfig,
    ) -> Result<RunResult>
    where
        H: DebugHost + ?Sized,
    {
        let span = crate::span_trace!(
            "xfg_mark",
            base = format_args!("{:#x}", module.base),
            width = %self.width
        );
        let _guard = span.enter();

        let fields =
            locate_load_config(&*host, module.base, self.width).map_err(XfgError::NoCfgTable)?;
        let table = decode_xfg_entries(host, module.base, &fields)?;

        let mut result = RunResult {
            entries_found: table.entries.len(),
            entries_marked: table.marked,
            warning_count: table.warnings,
            ..Default::default()
        };

        if table.entries.is_empty() {
            info!("{}", result.summary());
            return Ok(result);
        }

        if config.wants_correlation() {
            match self.width.hash_load_signature() {
                Some(signature) => {
                    let (regions, stats) =
                        snapshot_executable_regions(&*host, module, self.options.page_size);
                    result.warning_count += stats.warnings;

                    let (mut index, missed) = HashIndex::build(&table.entries, &regions);
                    result.warning_count += missed;

                    let c = correlate(host, &regions, &mut index, signature, config, self.width);
                    result.xref_count = c.xref_count;
                    result.comment_count = c.comment_count;
                    debug!(
                        regions = regions.len(),
                        groups = index.len(),
                        sites = c.usage_sites,
                        "correlation finished"
                    );
                }
                None => debug!(
                    "no hash load signature for {} targets, skipping correlation",
                    self.width
                ),
            }
        }

        host.refresh_disassembly();
        info!("{}", result.summary());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_must_be_power_of_two() {
        assert!(matches!(ScanOptions::with_page_size(0), Err(XfgError::InvalidPageSize(0))));
        assert!(ScanOptions::with_page_size(0x1800).is_err());
        assert_eq!(ScanOptions::with_page_size(0x800).unwrap().page_size(), 0x800);
        assert_eq!(ScanOptions::default().page_size(), regions::DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn summary_none_found() {
        assert_eq!(RunResult::default().summary(), "No XFG entries were found");
    }

    #[test]
    fn summary_all_marked() {
        let r = RunResult {
            entries_found: 3,
            entries_marked: 3,
            ..Default::default()
        };
        assert_eq!(r.summary(), "Found and marked 3 XFG entries");
    }

    #[test]
    fn summary_with_everything() {
        let r = RunResult {
            entries_found: 4,
            entries_marked: 3,
            xref_count: 5,
            comment_count: 3,
            warning_count: 2,
        };
        assert_eq!(
            r.summary(),
            "Found 4 XFG entries, marked 3 entries, added 5 xrefs, added 3 comments (2 warnings, see log)"
        );
    }

    #[test]
    fn summary_skips_zero_counts() {
        let r = RunResult {
            entries_found: 2,
            entries_marked: 2,
            comment_count: 1,
            ..Default::default()
        };
        assert_eq!(r.summary(), "Found and marked 2 XFG entries, added 1 comments");
    }
}
