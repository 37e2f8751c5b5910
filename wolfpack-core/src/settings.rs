use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::{fs, path::PathBuf};

/// Persistent launcher state, loaded and saved as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Game directory chosen by the user; overrides drive probing when set.
    pub manually_specified_game_path: Option<String>,
    /// Release tag of the last successfully installed modpack version.
    pub installed_tag: Option<String>,
    /// Changelog body recorded alongside the installed tag.
    pub installed_changelog: Option<String>,
    pub first_run: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            manually_specified_game_path: None,
            installed_tag: None,
            installed_changelog: None,
            first_run: true,
        }
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store rooted next to the executable, the usual place for a portable
    /// launcher.
    pub fn new() -> Result<Self> {
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .ok_or_else(|| anyhow::anyhow!("failed to resolve launcher directory"))?;
        fs::create_dir_all(&exe_dir)?;
        Ok(Self { path: exe_dir.join("settings.toml") })
    }

    /// Store at an explicit file path; hosts embedding the pipeline pick
    /// their own location.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<AppSettings> {
        if !self.path.exists() {
            return Ok(AppSettings::default());
        }
        let text = fs::read_to_string(&self.path)?;
        let settings: AppSettings = toml::from_str(&text)?;
        Ok(settings)
    }

    pub fn save(&self, settings: &AppSettings) -> Result<()> {
        let text = toml::to_string_pretty(settings)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.toml"));
        let s = store.load().unwrap();
        assert!(s.first_run);
        assert!(s.installed_tag.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.toml"));
        let mut s = AppSettings::default();
        s.installed_tag = Some("v1.2.0".into());
        s.first_run = false;
        store.save(&s).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.installed_tag.as_deref(), Some("v1.2.0"));
        assert!(!loaded.first_run);
    }
}
