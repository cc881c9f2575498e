//! Command and menu surface exposed to the debugger.
//!
//! `xfg_mark` takes no arguments. The menu carries the same action (bound to
//! a hotkey), the two annotation toggles, and an about entry.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MarkerConfig;
use crate::error::{Result, XfgError};
use crate::host::{DebugHost, SettingsStore};
use crate::log_error;
use crate::xfg::{RunResult, XfgMarker};

pub const PLUGIN_NAME: &str = "XFG Marker";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Name of the registered command.
pub const COMMAND_NAME: &str = "xfg_mark";
/// Hotkey bound to [`MenuEntry::MarkXfg`].
pub const MARK_HOTKEY: &str = "Ctrl+Shift+X";

/// Plugin menu entries, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MenuEntry {
    MarkXfg,
    ToggleXrefs,
    ToggleComments,
    About,
}

impl MenuEntry {
    pub const ALL: [MenuEntry; 4] = [
        MenuEntry::MarkXfg,
        MenuEntry::ToggleXrefs,
        MenuEntry::ToggleComments,
        MenuEntry::About,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuEntry::MarkXfg => "Mark &XFG",
            MenuEntry::ToggleXrefs => "Add xrefs",
            MenuEntry::ToggleComments => "Add comments",
            MenuEntry::About => "&About",
        }
    }

    /// Whether a separator follows this entry.
    pub fn separator_after(self) -> bool {
        matches!(self, MenuEntry::MarkXfg | MenuEntry::ToggleComments)
    }

    pub fn hotkey(self) -> Option<&'static str> {
        match self {
            MenuEntry::MarkXfg => Some(MARK_HOTKEY),
            _ => None,
        }
    }

    /// Check state of toggle entries; `None` for plain actions.
    pub fn checked(self, config: &MarkerConfig) -> Option<bool> {
        match self {
            MenuEntry::ToggleXrefs => Some(config.add_xrefs),
            MenuEntry::ToggleComments => Some(config.add_comments),
            _ => None,
        }
    }
}

/// What a menu click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOutcome {
    Marked(RunResult),
    /// No target attached; nothing ran
    Skipped,
    Toggled { entry: MenuEntry, enabled: bool },
    About(String),
}

/// Text of the about dialog.
pub fn about_text() -> String {
    format!(
        "{} v{}\n\nRecovers XFG type hashes from the module in the CPU view, marks them \
         as data, and links hash-checking call sites with their possible targets.",
        PLUGIN_NAME, PLUGIN_VERSION
    )
}

/// The `xfg_mark` command. `args` excludes the command name.
pub fn xfg_mark<H>(
    host: &mut H,
    marker: &XfgMarker,
    config: &MarkerConfig,
    args: &[&str],
) -> Result<RunResult>
where
    H: DebugHost + ?Sized,
{
    if !args.is_empty() {
        return Err(log_error!(XfgError::InvalidArguments(args.len())));
    }
    marker.run(host, config).map_err(|e| log_error!(e))
}

/// Dispatch a menu click. Toggles are persisted through the host's settings.
pub fn handle_menu_entry<H>(
    host: &mut H,
    marker: &XfgMarker,
    config: &mut MarkerConfig,
    entry: MenuEntry,
) -> Result<MenuOutcome>
where
    H: DebugHost + SettingsStore,
{
    match entry {
        MenuEntry::MarkXfg => {
            if !host.is_debugging() {
                return Ok(MenuOutcome::Skipped);
            }
            xfg_mark(host, marker, config, &[]).map(MenuOutcome::Marked)
        }
        MenuEntry::ToggleXrefs => {
            let enabled = config.toggle_xrefs(host)?;
            info!(enabled, "toggled xrefs");
            Ok(MenuOutcome::Toggled { entry, enabled })
        }
        MenuEntry::ToggleComments => {
            let enabled = config.toggle_comments(host)?;
            info!(enabled, "toggled comments");
            Ok(MenuOutcome::Toggled { entry, enabled })
        }
        MenuEntry::About => Ok(MenuOutcome::About(about_text())),
    }
}
