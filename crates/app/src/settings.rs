use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_SUBJECT: &str = "math";
pub const DEFAULT_GRADE_LEVEL: &str = "High School";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const SETTINGS_DIRECTORY_NAME: &str = "sage";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Tutoring preferences and backend location, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_grade_level")]
    pub grade_level: String,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            subject: default_subject(),
            grade_level: default_grade_level(),
            language: default_language(),
        }
    }
}

impl Settings {
    /// Trims every field and falls back to the default for blank values.
    pub fn normalized(mut self) -> Self {
        self.base_url = if self.base_url.trim().is_empty() {
            default_base_url()
        } else {
            self.base_url.trim().to_string()
        };
        self.subject = if self.subject.trim().is_empty() {
            default_subject()
        } else {
            self.subject.trim().to_string()
        };
        self.grade_level = if self.grade_level.trim().is_empty() {
            default_grade_level()
        } else {
            self.grade_level.trim().to_string()
        };
        self.language = if self.language.trim().is_empty() {
            default_language()
        } else {
            self.language.trim().to_string()
        };
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".sage"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> SettingsResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> Settings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return Settings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(Settings::default())).merge(Json::file(path));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> SettingsResult<()> {
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
}

pub type SettingsResult<T> = Result<T, SettingsError>;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

fn default_grade_level() -> String {
    DEFAULT_GRADE_LEVEL.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);

        assert_eq!(*store.settings(), Settings::default());
    }

    #[test]
    fn update_persists_and_a_fresh_store_reads_it_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);

        let settings = Settings {
            base_url: "http://tutor.example:9000".to_string(),
            subject: "physics".to_string(),
            grade_level: "Middle School".to_string(),
            language: "de".to_string(),
        };
        store.update(settings.clone()).expect("persist settings");
        assert_eq!(*store.settings(), settings);

        let reloaded = store_in(&dir);
        assert_eq!(*reloaded.settings(), settings);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"subject": "chemistry"}"#).expect("seed file");

        let store = SettingsStore::new(path);
        let settings = store.settings();
        assert_eq!(settings.subject, "chemistry");
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.grade_level, DEFAULT_GRADE_LEVEL);
        assert_eq!(settings.language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{not json").expect("seed file");

        let store = SettingsStore::new(path);
        assert_eq!(*store.settings(), Settings::default());
    }

    #[test]
    fn update_normalizes_before_storing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(&dir);

        store
            .update(Settings {
                base_url: "  http://tutor.example  ".to_string(),
                subject: String::new(),
                grade_level: "  ".to_string(),
                language: "fr".to_string(),
            })
            .expect("persist settings");

        let settings = store.settings();
        assert_eq!(settings.base_url, "http://tutor.example");
        assert_eq!(settings.subject, DEFAULT_SUBJECT);
        assert_eq!(settings.grade_level, DEFAULT_GRADE_LEVEL);
        assert_eq!(settings.language, "fr");
    }
}
