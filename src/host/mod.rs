//! Capabilities consumed from the debugging environment.
//!
//! The engine never talks to a debugger directly. It is handed an object
//! implementing the traits below: remote memory reads, page rights queries,
//! the annotation store, symbol lookup and persistent settings. `ImageHost`
//! is an in-process implementation used for offline analysis and tests.

pub mod image;
pub mod memory;
pub mod settings;

pub use image::{ImageHost, PageProtection};
pub use memory::{MemoryError, RemoteCursor, RemoteMemory};
pub use settings::{JsonSettingsFile, SettingsStore};

use serde::{Deserialize, Serialize};

/// Identity of the module under analysis. Fixed for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleImage {
    /// Load address of the module
    pub base: u64,
    /// Size of the mapped image in bytes
    pub size: u64,
}

impl ModuleImage {
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the last byte of the image.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// The host refused an annotation request.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("cannot annotate {address:#x}: {reason}")]
    Rejected { address: u64, reason: String },
}

/// Page protection queries.
pub trait PageRights {
    /// Return the host's rights string for the page containing `address`.
    ///
    /// The first character is `'E'` iff the page is executable.
    fn page_rights(&self, address: u64) -> Result<String, MemoryError>;

    fn is_executable(&self, address: u64) -> Result<bool, MemoryError> {
        Ok(self.page_rights(address)?.starts_with('E'))
    }
}

/// Analyst-facing annotation store owned by the host.
///
/// Writes are fire-and-forget and idempotent by overwrite.
pub trait Annotator {
    /// Add a one-directional cross-reference `from` -> `to`.
    fn add_xref(&mut self, from: u64, to: u64) -> Result<(), AnnotationError>;

    /// Set the auto-generated comment at `address`, replacing any previous one.
    fn set_auto_comment(&mut self, address: u64, text: &str) -> Result<(), AnnotationError>;

    /// Display `size` bytes at `address` as one fixed-width data value.
    fn mark_data(&mut self, address: u64, size: usize) -> Result<(), AnnotationError>;
}

/// Symbol lookup.
pub trait SymbolSource {
    /// Decorated (possibly mangled) name of the symbol at exactly `address`.
    fn decorated_symbol_at(&self, address: u64) -> Option<String>;
}

/// A debugger session able to run a marking pass.
pub trait DebugHost: RemoteMemory + PageRights + Annotator + SymbolSource {
    /// Module backing the current disassembly selection.
    fn selected_module(&self) -> Option<ModuleImage>;

    /// Whether a target is attached. Menu-triggered runs are ignored otherwise.
    fn is_debugging(&self) -> bool {
        true
    }

    /// Ask the disassembly view to redraw with new annotations.
    fn refresh_disassembly(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_image_bounds() {
        let m = ModuleImage::new(0x1_4000_0000, 0x3000);
        assert_eq!(m.end(), 0x1_4000_3000);
        assert!(m.contains(0x1_4000_0000));
        assert!(m.contains(0x1_4000_2fff));
        assert!(!m.contains(0x1_4000_3000));
    }
}
