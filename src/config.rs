use crate::error::ConfigError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "ring_generator";
const CONFIG_FILE: &str = "config.json";

/// Persistent operator settings. Command-line flags override every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Mix and canonical PCM sample rate.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// ffmpeg binary, looked up on PATH unless absolute.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Where exported files go (next to the project when unset).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub parallel_records: bool,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            sample_rate: default_sample_rate(),
            ffmpeg_path: default_ffmpeg_path(),
            output_dir: None,
            parallel_records: false,
        }
    }
}

impl AppConfig {
    /// `<config dir>/ring_generator/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(config) => return config,
                    Err(e) => warn!("Corrupt config file '{}', using defaults: {}", path.display(), e),
                },
                Err(e) => warn!("Could not read config file '{}': {}", path.display(), e),
            }
        }
        AppConfig::default()
    }

    /// Load from the default location.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => AppConfig::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn save_default(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save(&path)?;
        Ok(path)
    }

    /// Set one field from its textual form, e.g. `sample_rate 48000`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "sample_rate" => {
                let rate: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid sample rate '{}'", value))?;
                if rate == 0 {
                    return Err("Sample rate must be positive".to_string());
                }
                self.sample_rate = rate;
            }
            "ffmpeg_path" => self.ffmpeg_path = PathBuf::from(value),
            "output_dir" => {
                self.output_dir = match value {
                    "" | "none" => None,
                    dir => Some(PathBuf::from(dir)),
                }
            }
            "parallel_records" => {
                self.parallel_records = match value.to_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => return Err(format!("Invalid boolean '{}'", value)),
                }
            }
            _ => {
                return Err(format!(
                    "Unknown key '{}'. Expected: sample_rate, ffmpeg_path, output_dir, parallel_records",
                    key
                ))
            }
        }
        Ok(())
    }
}
