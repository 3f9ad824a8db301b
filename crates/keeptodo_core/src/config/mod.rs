use crate::error::AppError;
use crate::storage::{DEFAULT_SOURCE, DEFAULT_STORAGE_KEY, StorageKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "keeptodo";
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "KEEPTODO_CONFIG_PATH";
const DATA_DIR_ENV_VAR: &str = "KEEPTODO_DATA_DIR";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub quota_bytes: Option<usize>,
}

impl Config {
    pub fn storage_key(&self) -> StorageKey {
        StorageKey {
            key: self
                .storage_key
                .clone()
                .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string()),
            source: self
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        }
    }

    /// `KEEPTODO_DATA_DIR`, then `data_dir`, then the application directory.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, AppError> {
        if let Ok(path) = std::env::var(DATA_DIR_ENV_VAR)
            && !path.trim().is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        match self.data_dir.as_ref() {
            Some(dir) => Ok(dir.clone()),
            None => app_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub storage_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub source: Option<String>,
    pub quota_bytes: Option<usize>,
}

fn app_dir() -> Result<PathBuf, AppError> {
    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config").join(APP_DIR_NAME))
    }
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    Ok(app_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    Ok(normalize_config(config))
}

fn normalize_config(mut config: Config) -> Config {
    config.storage_key = config
        .storage_key
        .and_then(|key| canonical_storage_key(&key));
    config.source = config
        .source
        .map(|source| source.trim().to_string())
        .filter(|source| !source.is_empty());
    config
}

/// Lowercases a key and folds every run of other characters into one `-`.
/// Blank keys normalize to `None` so the default key applies.
pub fn canonical_storage_key(raw: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_dash = false;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            cleaned.push(ch.to_ascii_lowercase());
            previous_dash = false;
        } else if !previous_dash && !cleaned.is_empty() {
            cleaned.push('-');
            previous_dash = true;
        }
    }

    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(key) = overrides.storage_key.as_ref()
        && let Some(normalized) = canonical_storage_key(key)
    {
        merged.storage_key = Some(normalized);
    }
    if let Some(dir) = overrides.data_dir.as_ref() {
        merged.data_dir = Some(dir.clone());
    }
    if let Some(source) = overrides.source.as_ref() {
        merged.source = Some(source.trim().to_string()).filter(|source| !source.is_empty());
    }
    if overrides.quota_bytes.is_some() {
        merged.quota_bytes = overrides.quota_bytes;
    }

    merged
}
