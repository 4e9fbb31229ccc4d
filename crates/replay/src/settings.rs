use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use zova_timeline::TimelineConfig;

pub const SETTINGS_DIRECTORY_NAME: &str = "zova";
pub const SETTINGS_FILE_NAME: &str = "replay.json";
pub const DATABASE_FILE_NAME: &str = "replay.sqlite3";
/// `ZOVA_TIMELINE__PAGE_SIZE=20` overrides `timeline.page_size`.
pub const ENV_PREFIX: &str = "ZOVA_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySettings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub timeline: TimelineConfig,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            timeline: TimelineConfig::default(),
        }
    }
}

impl ReplaySettings {
    pub fn normalized(mut self) -> Self {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = default_database_path();
        }
        self.timeline = self.timeline.normalized();
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ReplaySettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".zova"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn open(config_path: PathBuf) -> Result<Self, SettingsError> {
        let settings = Self::load_from_disk(&config_path)?;
        Ok(Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        })
    }

    pub fn load() -> Result<Self, SettingsError> {
        Self::open(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ReplaySettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ReplaySettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> Result<ReplaySettings, SettingsError> {
        let mut figment = Figment::from(Serialized::defaults(ReplaySettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings = figment
            .extract::<ReplaySettings>()
            .context(ExtractSnafu {
                stage: "extract-replay-settings",
                path: path.to_path_buf(),
            })?;
        Ok(settings.normalized())
    }

    fn persist(&self, settings: &ReplaySettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        source: figment::Error,
    },
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".zova"))
        .join(DATABASE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("replay.json")).unwrap();

        assert_eq!(store.settings().timeline.max_window, 150);
        assert!(store.settings().database_path.ends_with(DATABASE_FILE_NAME));
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.json");
        std::fs::write(
            &path,
            r#"{"database_path": "/tmp/history.sqlite3", "timeline": {"page_size": 20}}"#,
        )
        .unwrap();

        let settings = SettingsStore::open(path).unwrap().settings();
        assert_eq!(settings.database_path, PathBuf::from("/tmp/history.sqlite3"));
        assert_eq!(settings.timeline.page_size, 20);
        assert_eq!(settings.timeline.max_window, 150);
    }

    #[test]
    fn malformed_file_is_an_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.json");
        std::fs::write(&path, r#"{"timeline": {"page_size": "lots"}}"#).unwrap();

        let error = SettingsStore::open(path).err().unwrap();
        assert!(matches!(error, SettingsError::Extract { .. }));
    }

    #[test]
    fn update_persists_normalized_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("replay.json");
        let store = SettingsStore::open(path.clone()).unwrap();

        let mut settings = (*store.settings()).clone();
        settings.timeline.page_size = 0;
        store.update(settings).unwrap();

        assert_eq!(store.settings().timeline.page_size, 1);
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = SettingsStore::open(path).unwrap();
        assert_eq!(reopened.settings().timeline.page_size, 1);
    }
}
