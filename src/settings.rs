use crate::errors::{AppError, AppResult};
use crate::models::OrganizerSettings;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

/// The one JSON document the host persists for the panel: tags, tag_map,
/// folders, backups, and notes. Saving is explicit; callers decide the
/// checkpoints.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AppResult<OrganizerSettings> {
        if !self.path.exists() {
            return Ok(OrganizerSettings::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw)
            .map_err(|err| AppError::Validation(format!("Settings blob is unreadable: {err}")))
    }

    pub fn save(&self, settings: &OrganizerSettings) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(settings)?)?;
        Ok(())
    }
}
