use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SlaError;

pub const CONFIG_ENV_VAR: &str = "SLA_CLI_CONFIG_FILE";
pub const CONFIG_FILE_NAME: &str = ".sla_cli_config.json";

pub const MAX_BATCH_SIZE: usize = 300;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub isic: Option<IsicConfig>,
    #[serde(default)]
    pub data_directory: Option<String>,
    #[serde(default)]
    pub cache_directory: Option<String>,
    #[serde(default)]
    pub unzip: Option<bool>,
    #[serde(default)]
    pub convert: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IsicConfig {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsicSettings {
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: usize,
    pub page_size: usize,
}

impl Default for IsicSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            max_workers: 5,
            max_retries: 3,
            page_size: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub isic: IsicSettings,
    pub data_directory: Utf8PathBuf,
    pub cache_directory: Utf8PathBuf,
    pub unzip: bool,
    pub convert: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Environment(PathBuf),
    WorkingDirectory(PathBuf),
    Defaults,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, SlaError> {
        let cwd = std::env::current_dir().map_err(|err| SlaError::Filesystem(err.to_string()))?;
        let env_value = std::env::var(CONFIG_ENV_VAR).ok();
        let (settings, source) = Self::resolve_from(path, env_value.as_deref(), &cwd)?;
        debug!(?source, "configuration resolved");
        Ok(settings)
    }

    /// Explicit path, then the environment variable, then the working directory file,
    /// then defaults. An existing but empty file falls through to the next source.
    pub fn resolve_from(
        explicit: Option<&str>,
        env_value: Option<&str>,
        cwd: &Path,
    ) -> Result<(Settings, ConfigSource), SlaError> {
        if let Some(path) = explicit {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(SlaError::ConfigRead(path));
            }
            if let Some(config) = Self::read(&path)? {
                return Ok((
                    Self::resolve_config(config, cwd)?,
                    ConfigSource::Explicit(path),
                ));
            }
        }

        if let Some(value) = env_value.filter(|value| !value.trim().is_empty()) {
            let path = PathBuf::from(value);
            if path.exists() {
                if let Some(config) = Self::read(&path)? {
                    return Ok((
                        Self::resolve_config(config, cwd)?,
                        ConfigSource::Environment(path),
                    ));
                }
            }
        }

        let local = cwd.join(CONFIG_FILE_NAME);
        if local.exists() {
            if let Some(config) = Self::read(&local)? {
                return Ok((
                    Self::resolve_config(config, cwd)?,
                    ConfigSource::WorkingDirectory(local),
                ));
            }
        }

        debug!("no configuration file found, loading defaults");
        Ok((
            Self::resolve_config(Config::default(), cwd)?,
            ConfigSource::Defaults,
        ))
    }

    fn read(path: &Path) -> Result<Option<Config>, SlaError> {
        let content =
            fs::read_to_string(path).map_err(|_| SlaError::ConfigRead(path.to_path_buf()))?;
        if content.trim().is_empty() {
            debug!(
                path = %path.display(),
                "configuration file is empty, continuing to look for other sources"
            );
            return Ok(None);
        }
        let config: Config =
            serde_json::from_str(&content).map_err(|err| SlaError::ConfigParse(err.to_string()))?;
        Ok(Some(config))
    }

    pub fn resolve_config(config: Config, cwd: &Path) -> Result<Settings, SlaError> {
        let defaults = IsicSettings::default();
        let isic = config.isic.unwrap_or_default();
        let isic = IsicSettings {
            batch_size: isic.batch_size.unwrap_or(defaults.batch_size),
            max_workers: isic.max_workers.unwrap_or(defaults.max_workers),
            max_retries: isic.max_retries.unwrap_or(defaults.max_retries),
            page_size: isic.page_size.unwrap_or(defaults.page_size),
        };

        if !(1..=MAX_BATCH_SIZE).contains(&isic.batch_size) {
            return Err(SlaError::InvalidConfig(format!(
                "'isic.batch_size' must be between 1 and {MAX_BATCH_SIZE}, got {}",
                isic.batch_size
            )));
        }
        for (name, value) in [
            ("isic.max_workers", isic.max_workers),
            ("isic.max_retries", isic.max_retries),
            ("isic.page_size", isic.page_size),
        ] {
            if value == 0 {
                return Err(SlaError::InvalidConfig(format!(
                    "'{name}' must be greater than 0"
                )));
            }
        }

        let timeout_secs = config.request_timeout_secs.unwrap_or(300);
        if timeout_secs == 0 {
            return Err(SlaError::InvalidConfig(
                "'request_timeout_secs' must be greater than 0".to_string(),
            ));
        }

        let data_directory = match config.data_directory {
            Some(dir) => Utf8PathBuf::from(dir),
            None => Utf8PathBuf::from_path_buf(cwd.to_path_buf())
                .map_err(|_| SlaError::Filesystem("non-utf8 working directory".to_string()))?,
        };
        let cache_directory = match config.cache_directory {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_directory()?,
        };

        Ok(Settings {
            isic,
            data_directory,
            cache_directory,
            unzip: config.unzip.unwrap_or(true),
            convert: config
                .convert
                .map(|value| value.to_lowercase())
                .unwrap_or_else(|| "original".to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

pub fn default_cache_directory() -> Result<Utf8PathBuf, SlaError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("skin-lesion-archive"))
                .ok()
        })
        .ok_or_else(|| SlaError::Filesystem("unable to resolve cache directory".to_string()))
}
