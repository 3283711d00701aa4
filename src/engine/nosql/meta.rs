//! Meta information for the store format
//!
//! Lets a newer binary refuse a store layout it does not understand.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use chrono::{DateTime, Utc};

use super::error::{NoSqlError, Result};

/// Current format version supported by this engine
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Minimum format version we can read
pub const MIN_FORMAT_VERSION: u32 = 1;

const META_FILE: &str = "_meta.json";

/// Meta information stored in _meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    /// Engine identifier
    pub engine: String,

    /// Format version number
    pub format_version: u32,

    /// Version of the binary that created this store
    pub created_by: String,

    /// When this store was created
    pub created_at: DateTime<Utc>,
}

impl Meta {
    /// Create new meta for a fresh store
    pub fn new() -> Self {
        Self {
            engine: "fleetward-store".to_string(),
            format_version: CURRENT_FORMAT_VERSION,
            created_by: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
        }
    }

    /// Load meta from a directory
    pub fn load(base_path: &Path) -> Result<Self> {
        let meta_path = base_path.join(META_FILE);
        let content = fs::read_to_string(&meta_path)?;
        let meta: Meta = serde_json::from_str(&content)?;

        if meta.format_version < MIN_FORMAT_VERSION || meta.format_version > CURRENT_FORMAT_VERSION {
            return Err(NoSqlError::UnsupportedFormatVersion {
                found: meta.format_version,
                min: MIN_FORMAT_VERSION,
                max: CURRENT_FORMAT_VERSION,
            });
        }

        Ok(meta)
    }

    /// Save meta to a directory
    pub fn save(&self, base_path: &Path) -> Result<()> {
        let meta_path = base_path.join(META_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(meta_path, content)?;
        Ok(())
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::new()
    }
}
