//! Extended Control Flow Guard (XFG) marker.
//!
//! Recovers the XFG type hashes that the compiler stores in front of every
//! guarded function of a loaded module, marks them as data, and correlates
//! them with the call sites that check each hash.
//!
//! The engine only talks to the debugger through the capability traits in
//! [`host`]. [`host::ImageHost`] implements them in-process, and
//! [`loader`] fills one from a PE file on disk.

/// Command and menu surface
pub mod commands;
/// Annotation toggles and their persistence
pub mod config;
pub mod demangle;
/// Error types
pub mod error;
/// Debugger capabilities and the simulated host
pub mod host;
pub mod loader;
/// Logging and tracing infrastructure
pub mod logging;
/// PE layout
pub mod pe;
/// Synthetic XFG modules for tests and demonstrations
pub mod synth;
/// The marking pipeline
pub mod xfg;

pub use config::MarkerConfig;
pub use error::{Result, XfgError};
pub use host::{DebugHost, ImageHost, ModuleImage};
pub use pe::AddressWidth;
pub use xfg::{RunResult, XfgMarker};
