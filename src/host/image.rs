//! ImageHost: an in-process stand-in for a debugged process.
//!
//! Memory is kept as page-granular buffers with per-page protection. The host
//! records every annotation it receives so callers can inspect the outcome of
//! a run, and it can be told to fail specific reads, rights queries or data
//! markings to exercise degraded paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::memory::{MemoryError, RemoteMemory};
use super::settings::SettingsStore;
use super::{AnnotationError, Annotator, DebugHost, ModuleImage, PageRights, SymbolSource};
use crate::error::Result;

/// Page granularity of the simulated address space.
pub const PAGE_SIZE: u64 = 0x1000;

bitflags! {
    /// Protection of one simulated page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageProtection: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl PageProtection {
    /// Rights string in the host's format, e.g. `"ER--"` or `"-RW-"`.
    pub fn rights_string(self) -> String {
        let mut s = String::with_capacity(4);
        s.push(if self.contains(Self::EXECUTE) { 'E' } else { '-' });
        s.push(if self.contains(Self::READ) { 'R' } else { '-' });
        s.push(if self.contains(Self::WRITE) { 'W' } else { '-' });
        s.push('-');
        s
    }
}

#[derive(Debug, Clone)]
struct Page {
    data: Box<[u8]>,
    protection: PageProtection,
}

/// Everything a run wrote through the `Annotator` interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAnnotations {
    /// Directed cross-references as `(from, to)` pairs
    pub xrefs: BTreeSet<(u64, u64)>,
    /// Auto-comments by address; later writes overwrite earlier ones
    pub comments: BTreeMap<u64, String>,
    /// Data markings as `address -> size`
    pub data_marks: BTreeMap<u64, usize>,
    /// Number of `add_xref` calls, including duplicates
    pub xref_calls: usize,
    /// Number of `set_auto_comment` calls, including overwrites
    pub comment_calls: usize,
}

/// Simulated debuggee implementing every host capability.
#[derive(Debug, Clone, Default)]
pub struct ImageHost {
    pages: BTreeMap<u64, Page>,
    modules: Vec<ModuleImage>,
    selection: Option<u64>,
    symbols: HashMap<u64, String>,
    settings: HashMap<(String, String), u64>,
    unreadable_pages: BTreeSet<u64>,
    rights_failures: BTreeSet<u64>,
    rejected_marks: BTreeSet<u64>,
    annotations: RecordedAnnotations,
    refresh_count: usize,
    detached: bool,
}

fn page_of(address: u64) -> u64 {
    address & !(PAGE_SIZE - 1)
}

impl ImageHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map zero-filled pages covering `[address, address + size)`.
    ///
    /// Pages that already exist keep their contents and take the new protection.
    pub fn map(&mut self, address: u64, size: u64, protection: PageProtection) {
        if size == 0 {
            return;
        }
        let first = page_of(address);
        let last = page_of(address.saturating_add(size - 1));
        let mut page = first;
        loop {
            self.pages
                .entry(page)
                .and_modify(|p| p.protection = protection)
                .or_insert_with(|| Page {
                    data: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
                    protection,
                });
            if page >= last {
                break;
            }
            page += PAGE_SIZE;
        }
    }

    /// Copy `bytes` into already-mapped memory, ignoring protection.
    pub fn write(&mut self, address: u64, bytes: &[u8]) -> std::result::Result<(), MemoryError> {
        let mut written = 0usize;
        while written < bytes.len() {
            let current = address
                .checked_add(written as u64)
                .ok_or(MemoryError::Overflow {
                    address,
                    len: bytes.len(),
                })?;
            let page = self
                .pages
                .get_mut(&page_of(current))
                .ok_or(MemoryError::Unmapped { address: current })?;
            let offset = (current - page_of(current)) as usize;
            let n = (PAGE_SIZE as usize - offset).min(bytes.len() - written);
            page.data[offset..offset + n].copy_from_slice(&bytes[written..written + n]);
            written += n;
        }
        Ok(())
    }

    /// Register a loaded module.
    pub fn add_module(&mut self, module: ModuleImage) {
        self.modules.push(module);
    }

    /// Place the disassembly selection at `address`.
    pub fn select(&mut self, address: u64) {
        self.selection = Some(address);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Register a (possibly decorated) symbol name.
    pub fn add_symbol(&mut self, address: u64, name: impl Into<String>) {
        self.symbols.insert(address, name.into());
    }

    /// Make every read touching the page at `address` fail.
    pub fn fail_reads_at(&mut self, address: u64) {
        self.unreadable_pages.insert(page_of(address));
    }

    /// Make the rights query for the page at `address` fail.
    pub fn fail_rights_query_at(&mut self, address: u64) {
        self.rights_failures.insert(page_of(address));
    }

    /// Make `mark_data` at exactly `address` fail.
    pub fn reject_mark_at(&mut self, address: u64) {
        self.rejected_marks.insert(address);
    }

    pub fn annotations(&self) -> &RecordedAnnotations {
        &self.annotations
    }

    /// Drop all recorded annotations, keeping memory and settings.
    pub fn clear_annotations(&mut self) {
        self.annotations = RecordedAnnotations::default();
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_count
    }

    /// Simulate attaching to or detaching from the target.
    pub fn set_debugging(&mut self, debugging: bool) {
        self.detached = !debugging;
    }

    /// Module containing `address`, if any.
    pub fn module_containing(&self, address: u64) -> Option<ModuleImage> {
        self.modules.iter().copied().find(|m| m.contains(address))
    }
}

impl RemoteMemory for ImageHost {
    fn read_into(&self, address: u64, buf: &mut [u8]) -> std::result::Result<(), MemoryError> {
        if buf.is_empty() {
            return Ok(());
        }
        address
            .checked_add(buf.len() as u64 - 1)
            .ok_or(MemoryError::Overflow {
                address,
                len: buf.len(),
            })?;

        let mut done = 0usize;
        while done < buf.len() {
            let current = address + done as u64;
            let base = page_of(current);
            if self.unreadable_pages.contains(&base) {
                return Err(MemoryError::Unreadable { address: current });
            }
            let page = self
                .pages
                .get(&base)
                .ok_or(MemoryError::Unmapped { address: current })?;
            if page.protection.is_empty() {
                return Err(MemoryError::Unreadable { address: current });
            }
            let offset = (current - base) as usize;
            let n = (PAGE_SIZE as usize - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&page.data[offset..offset + n]);
            done += n;
        }
        Ok(())
    }
}

impl PageRights for ImageHost {
    fn page_rights(&self, address: u64) -> std::result::Result<String, MemoryError> {
        let base = page_of(address);
        if self.rights_failures.contains(&base) {
            return Err(MemoryError::RightsQuery { address });
        }
        self.pages
            .get(&base)
            .map(|p| p.protection.rights_string())
            .ok_or(MemoryError::RightsQuery { address })
    }
}

impl Annotator for ImageHost {
    fn add_xref(&mut self, from: u64, to: u64) -> std::result::Result<(), AnnotationError> {
        self.annotations.xref_calls += 1;
        self.annotations.xrefs.insert((from, to));
        Ok(())
    }

    fn set_auto_comment(
        &mut self,
        address: u64,
        text: &str,
    ) -> std::result::Result<(), AnnotationError> {
        self.annotations.comment_calls += 1;
        self.annotations.comments.insert(address, text.to_string());
        Ok(())
    }

    fn mark_data(&mut self, address: u64, size: usize) -> std::result::Result<(), AnnotationError> {
        if self.rejected_marks.contains(&address) {
            return Err(AnnotationError::Rejected {
                address,
                reason: "marking rejected".to_string(),
            });
        }
        if self.module_containing(address).is_none() {
            return Err(AnnotationError::Rejected {
                address,
                reason: "address is outside every module".to_string(),
            });
        }
        self.annotations.data_marks.insert(address, size);
        Ok(())
    }
}

impl SymbolSource for ImageHost {
    fn decorated_symbol_at(&self, address: u64) -> Option<String> {
        self.symbols.get(&address).cloned()
    }
}

impl DebugHost for ImageHost {
    fn selected_module(&self) -> Option<ModuleImage> {
        self.selection.and_then(|a| self.module_containing(a))
    }

    fn is_debugging(&self) -> bool {
        !self.detached
    }

    fn refresh_disassembly(&mut self) {
        self.refresh_count += 1;
    }
}

impl SettingsStore for ImageHost {
    fn get_uint(&self, section: &str, key: &str) -> Option<u64> {
        self.settings
            .get(&(section.to_string(), key.to_string()))
            .copied()
    }

    fn set_uint(&mut self, section: &str, key: &str, value: u64) -> Result<()> {
        self.settings
            .insert((section.to_string(), key.to_string()), value);
        Ok(())
    }
}
