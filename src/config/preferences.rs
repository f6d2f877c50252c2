//! Persistence of the user's session preferences between runs.
//!
//! The controller itself never touches storage: the host loads the saved
//! [`SessionConfig`] before starting and saves after each change.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::schema::SessionConfig;

/// Durable home for [`SessionConfig`].
pub trait PreferenceStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> anyhow::Result<Option<SessionConfig>>;
    fn save(&self, config: &SessionConfig) -> anyhow::Result<()>;
}

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonPreferenceStore {
    path: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/voxbridge/preferences.json`.
    pub fn in_data_dir() -> Option<Self> {
        directories::ProjectDirs::from("dev", "voxbridge", "voxbridge")
            .map(|dirs| Self::new(dirs.data_dir().join("preferences.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn load(&self) -> anyhow::Result<Option<SessionConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("malformed preferences in {}", self.path.display()))?;
        Ok(Some(config))
    }

    fn save(&self, config: &SessionConfig) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(config)?;

        // Write then rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "preferences saved");
        Ok(())
    }
}
