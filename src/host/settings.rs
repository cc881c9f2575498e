//! Persistent key/value settings.
//!
//! The host stores unsigned integers under a `(section, key)` pair. Absent
//! values are reported as `None`; callers keep their in-memory defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, XfgError};

/// Named unsigned-integer settings.
pub trait SettingsStore {
    fn get_uint(&self, section: &str, key: &str) -> Option<u64>;
    fn set_uint(&mut self, section: &str, key: &str, value: u64) -> Result<()>;
}

/// Settings persisted as a JSON object of sections, e.g.
/// `{"XFG Marker": {"AddXrefs": 1, "AddComments": 0}}`.
///
/// Every `set_uint` rewrites the file.
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
    values: BTreeMap<String, BTreeMap<String, u64>>,
}

impl JsonSettingsFile {
    /// Open the settings at `path`. A missing file yields an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                XfgError::Settings(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file absent, using defaults");
                BTreeMap::new()
            }
            Err(e) => return Err(XfgError::Settings(format!("{}: {}", path.display(), e))),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.values)
            .map_err(|e| XfgError::Settings(e.to_string()))?;
        fs::write(&self.path, text)
            .map_err(|e| XfgError::Settings(format!("{}: {}", self.path.display(), e)))
    }
}

impl SettingsStore for JsonSettingsFile {
    fn get_uint(&self, section: &str, key: &str) -> Option<u64> {
        self.values.get(section)?.get(key).copied()
    }

    fn set_uint(&mut self, section: &str, key: &str, value: u64) -> Result<()> {
        self.values
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.flush()
    }
}
