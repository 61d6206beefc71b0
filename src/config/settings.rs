//! Launch settings persisted as JSON in the data directory.
//!
//! Loading never fails: a missing or unreadable file yields the defaults so a
//! broken settings file cannot block a launch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// User toggles consumed by the profile composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchSettings {
    pub use_microphone: bool,
    pub use_web_camera: bool,
    pub share_printers: bool,
    pub mount_credential_store: bool,
    pub mount_specific_folders: bool,
    pub folders: Vec<String>,
    pub disclaimer_accepted: Option<DateTime<Utc>>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            use_microphone: false,
            use_web_camera: false,
            share_printers: false,
            mount_credential_store: true,
            mount_specific_folders: false,
            folders: Vec::new(),
            disclaimer_accepted: None,
        }
    }
}

impl LaunchSettings {
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "useMicrophone" | "use_microphone" => self.use_microphone = value.parse()?,
            "useWebCamera" | "use_web_camera" => self.use_web_camera = value.parse()?,
            "sharePrinters" | "share_printers" => self.share_printers = value.parse()?,
            "mountCredentialStore" | "mount_credential_store" => {
                self.mount_credential_store = value.parse()?
            }
            "mountSpecificFolders" | "mount_specific_folders" => {
                self.mount_specific_folders = value.parse()?
            }
            _ => anyhow::bail!("Unknown settings key: {}", key),
        }
        Ok(())
    }

    /// Add a folder unless an identical entry is already listed.
    pub fn add_folder(&mut self, folder: &str) -> bool {
        if self.folders.iter().any(|f| f.eq_ignore_ascii_case(folder)) {
            return false;
        }
        self.folders.push(folder.to_string());
        true
    }

    pub fn remove_folder(&mut self, folder: &str) -> bool {
        let before = self.folders.len();
        self.folders.retain(|f| !f.eq_ignore_ascii_case(folder));
        self.folders.len() != before
    }

    pub fn accept_disclaimer(&mut self) {
        self.disclaimer_accepted = Some(Utc::now());
    }
}

/// Reads and writes [`LaunchSettings`] at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> LaunchSettings {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", self.path.display());
                return LaunchSettings::default();
            }
            Err(e) => {
                error!(
                    "Cannot load settings from file '{}' due to error: {}",
                    self.path.display(),
                    e
                );
                return LaunchSettings::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                error!(
                    "Cannot parse settings file '{}': {}",
                    self.path.display(),
                    e
                );
                LaunchSettings::default()
            }
        }
    }

    pub async fn save(&self, settings: &LaunchSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(tmp.path().join("launcher.json"));

        let settings = store.load().await;
        assert_eq!(settings, LaunchSettings::default());
        assert!(settings.mount_credential_store);
    }

    #[tokio::test]
    async fn corrupt_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("launcher.json");
        std::fs::write(&path, "{ not json").unwrap();

        let settings = SettingsStore::new(&path).load().await;
        assert_eq!(settings, LaunchSettings::default());
    }

    #[tokio::test]
    async fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(tmp.path().join("nested").join("launcher.json"));

        let mut settings = LaunchSettings::default();
        settings.use_microphone = true;
        settings.mount_specific_folders = true;
        settings.add_folder("%USERPROFILE%\\Documents");
        settings.accept_disclaimer();
        store.save(&settings).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded, settings);
    }

    #[test]
    fn json_uses_camel_case_and_fills_missing_fields() {
        let settings: LaunchSettings =
            serde_json::from_str(r#"{"useWebCamera": true, "folders": ["C:\\Data"]}"#).unwrap();
        assert!(settings.use_web_camera);
        assert!(settings.mount_credential_store);
        assert_eq!(settings.folders, vec!["C:\\Data".to_string()]);

        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"mountSpecificFolders\""));
    }

    #[test]
    fn folder_list_ignores_case_duplicates() {
        let mut settings = LaunchSettings::default();
        assert!(settings.add_folder("C:\\Data"));
        assert!(!settings.add_folder("c:\\data"));
        assert!(settings.remove_folder("C:\\DATA"));
        assert!(settings.folders.is_empty());
        assert!(!settings.remove_folder("C:\\Data"));
    }

    #[test]
    fn set_value_parses_booleans() {
        let mut settings = LaunchSettings::default();
        settings.set_value("sharePrinters", "true").unwrap();
        assert!(settings.share_printers);
        assert!(settings.set_value("sharePrinters", "yes").is_err());
        assert!(settings.set_value("unknown", "true").is_err());
    }
}
