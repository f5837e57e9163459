//! Application Configuration
//!
//! User settings stored in TOML format. Environment overrides are applied
//! once at startup; nothing reads the environment afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::vision::models::DEFAULT_MODEL_BASE_URL;
use crate::vision::padding::DEFAULT_PAD_RATIO;
use crate::vision::{DeviceConfig, PredictOptions};

/// Forces CPU inference when truthy
pub const ENV_FORCE_CPU: &str = "MEMEFINDER_FORCE_CPU";
/// `1/true/yes/on` enables the accelerator, `0/false/no/off` disables it
pub const ENV_USE_GPU: &str = "MEMEFINDER_USE_GPU";

pub const CONFIG_FILENAME: &str = "config.toml";

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ocr: OcrSettings,
    pub device: DeviceConfig,
    pub models: ModelSettings,
    pub batch: BatchSettings,
}

/// OCR pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Border added on each side, as a fraction of the image size
    pub pad_ratio: f64,
    /// Border color [R, G, B]
    pub pad_color: [u8; 3],
    /// Detector options passed to the engine
    pub options: PredictOptions,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            pad_ratio: DEFAULT_PAD_RATIO,
            pad_color: [0, 0, 0],
            options: PredictOptions::default(),
        }
    }
}

/// Model file settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model directory, defaults to `<data dir>/models`
    pub dir: Option<PathBuf>,
    pub base_url: String,
    /// Never download
    pub offline: bool,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: None,
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            offline: false,
            intra_threads: 4,
        }
    }
}

/// Batch processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Images fetched from the database per page
    pub batch_size: usize,
    /// Database file, defaults to `<data dir>/memes.db`
    pub database: Option<PathBuf>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            database: None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AppConfig {
    /// Apply device overrides read through `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_FORCE_CPU) {
            if parse_flag(&value) == Some(true) {
                info!("{} set, forcing CPU", ENV_FORCE_CPU);
                self.device.force_cpu = true;
            }
        }

        if let Some(value) = lookup(ENV_USE_GPU) {
            match parse_flag(&value) {
                Some(enabled) => {
                    info!("{}={} overrides accelerator detection", ENV_USE_GPU, value);
                    self.device.accelerator = Some(enabled);
                }
                None if value.is_empty() => {}
                None => warn!("Ignoring unrecognized {}={:?}", ENV_USE_GPU, value),
            }
        }

        self
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(self) -> Self {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join(CONFIG_FILENAME))
}

/// Load `path`, or write and return the defaults if it does not exist
pub fn load_or_create_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    let config = AppConfig::default();
    if let Err(e) = save_config(&config, path) {
        warn!("Could not write default config to {:?}: {}", path, e);
    } else {
        info!("Wrote default configuration to {:?}", path);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::LimitType;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!((config.ocr.pad_ratio - 0.10).abs() < 1e-9);
        assert_eq!(config.ocr.pad_color, [0, 0, 0]);
        assert_eq!(config.ocr.options.limit_side_len, 1536);
        assert_eq!(config.ocr.options.limit_type, LimitType::Max);

        assert!(!config.device.force_cpu);
        assert!(config.device.accelerator.is_none());
        assert_eq!(config.device.init_timeout_secs, 30);

        assert!(config.models.dir.is_none());
        assert!(!config.models.offline);
        assert_eq!(config.batch.batch_size, 100);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.device.accelerator = Some(false);
        config.ocr.options.limit_type = LimitType::Min;
        config.batch.database = Some(PathBuf::from("/tmp/memes.db"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [device]
            force_cpu = true

            [ocr.options]
            box_thresh = 0.5
            "#,
        )
        .unwrap();

        assert!(parsed.device.force_cpu);
        assert_eq!(parsed.device.init_timeout_secs, 30);
        assert!((parsed.ocr.options.box_thresh - 0.5).abs() < 1e-6);
        assert!((parsed.ocr.options.unclip_ratio - 2.30).abs() < 1e-6);
        assert_eq!(parsed.batch.batch_size, 100);
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.ocr.pad_ratio = 0.2;

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = load_or_create_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_env_force_cpu() {
        let config = AppConfig::default().with_env_overrides(env(&[(ENV_FORCE_CPU, "1")]));
        assert!(config.device.force_cpu);

        let config = AppConfig::default().with_env_overrides(env(&[(ENV_FORCE_CPU, "0")]));
        assert!(!config.device.force_cpu);
    }

    #[test]
    fn test_env_use_gpu() {
        let on = AppConfig::default().with_env_overrides(env(&[(ENV_USE_GPU, "Yes")]));
        assert_eq!(on.device.accelerator, Some(true));

        let off = AppConfig::default().with_env_overrides(env(&[(ENV_USE_GPU, "false")]));
        assert_eq!(off.device.accelerator, Some(false));
        assert!(off.device.cpu_forced());

        let junk = AppConfig::default().with_env_overrides(env(&[(ENV_USE_GPU, "maybe")]));
        assert_eq!(junk.device.accelerator, None);
    }
}
