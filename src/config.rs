//! User-togglable marker settings.
//!
//! Two booleans decide what a run writes beyond the data markings: cross
//! references between usage sites and targets, and synthesized comments at
//! usage sites. They are threaded into each run as a value and persisted
//! through a `SettingsStore`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::SettingsStore;

/// Settings section used for persistence.
pub const SETTINGS_SECTION: &str = "XFG Marker";
/// Key of the cross-reference toggle.
pub const KEY_ADD_XREFS: &str = "AddXrefs";
/// Key of the comment toggle.
pub const KEY_ADD_COMMENTS: &str = "AddComments";

/// Annotation toggles for a marking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Add usage-site <-> target cross-references.
    pub add_xrefs: bool,
    /// Add target-list comments at usage sites.
    pub add_comments: bool,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            add_xrefs: true,
            add_comments: true,
        }
    }
}

impl MarkerConfig {
    /// Load toggles from `store`, keeping defaults for absent keys.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let mut config = Self::default();
        if let Some(v) = store.get_uint(SETTINGS_SECTION, KEY_ADD_XREFS) {
            config.add_xrefs = v != 0;
        }
        if let Some(v) = store.get_uint(SETTINGS_SECTION, KEY_ADD_COMMENTS) {
            config.add_comments = v != 0;
        }
        config
    }

    /// Whether a run needs the correlation stage at all.
    pub fn wants_correlation(&self) -> bool {
        self.add_xrefs || self.add_comments
    }

    /// Flip the cross-reference toggle and persist it. Returns the new value.
    pub fn toggle_xrefs(&mut self, store: &mut dyn SettingsStore) -> Result<bool> {
        self.add_xrefs = !self.add_xrefs;
        store.set_uint(SETTINGS_SECTION, KEY_ADD_XREFS, self.add_xrefs as u64)?;
        Ok(self.add_xrefs)
    }

    /// Flip the comment toggle and persist it. Returns the new value.
    pub fn toggle_comments(&mut self, store: &mut dyn SettingsStore) -> Result<bool> {
        self.add_comments = !self.add_comments;
        store.set_uint(SETTINGS_SECTION, KEY_ADD_COMMENTS, self.add_comments as u64)?;
        Ok(self.add_comments)
    }
}
