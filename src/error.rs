//! Error types for the XFG marker.
//!
//! Only failures that abort a run are represented here. Recoverable problems
//! (unreadable pages, entries outside any captured region, refused data
//! markings) are counted in `RunResult::warning_count` and logged instead.

use crate::host::memory::MemoryError;
use crate::pe::LoadConfigError;
use thiserror::Error;

/// Reasons a marking run stops without producing results.
#[derive(Debug, Error)]
pub enum XfgError {
    /// The current disassembly selection is not inside any module
    #[error("No module in the CPU view")]
    NoModule,

    /// The load-config directory or its guard block could not be used
    #[error("No CFG function table found")]
    NoCfgTable(#[source] LoadConfigError),

    /// The module was not built with XFG
    #[error("XFG isn't enabled for the target module")]
    XfgNotEnabled { guard_flags: u32 },

    /// The guard flags declare a zero-sized per-entry metadata block
    #[error("mdSize is zero")]
    ZeroStride { guard_flags: u32 },

    /// A guard table slot could not be read; partial tables are not trusted
    #[error("DbgMemRead failed at {address:#x}")]
    TableRead {
        address: u64,
        #[source]
        source: MemoryError,
    },

    /// Region walks need a power-of-two page size
    #[error("invalid page size {0:#x}")]
    InvalidPageSize(u64),

    /// The command was invoked with arguments
    #[error("Command does not accept arguments")]
    InvalidArguments(usize),

    /// Settings could not be read or persisted
    #[error("Settings error: {0}")]
    Settings(String),

    /// An image could not be loaded for offline analysis
    #[error("Load error: {0}")]
    Load(String),
}

/// Result type alias for marker operations
pub type Result<T> = std::result::Result<T, XfgError>;
