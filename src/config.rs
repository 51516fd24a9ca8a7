// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides the fixed demo parameters as defaults if the file is missing or
// has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub device: DeviceConfig,
    pub compute: ComputeConfig,
    pub shader: ShaderConfig,
    pub debug: DebugConfig,
}

/// Application identity reported to the driver
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "vkcscratch".to_string(),
        }
    }
}

/// Physical device selection
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// Pre-selected device index; skips the interactive prompt
    pub index: Option<usize>,
}

/// Payload settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Number of i32 elements in each of the input and output buffers
    pub element_count: u32,
    pub seed: Option<u64>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            element_count: 16384,
            seed: None,
        }
    }
}

/// Shader source settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// SPIR-V file to load instead of the embedded copy shader
    pub path: Option<PathBuf>,
    pub entry_point: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            path: None,
            entry_point: "f".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vkcscratch.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    ///
    /// Called before logging exists. An unreadable or invalid file is an error.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;

        if config.compute.element_count == 0 {
            anyhow::bail!("compute.element_count must be greater than zero");
        }

        Ok(config)
    }

    /// Get log level as a `log` filter
    pub fn get_log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            // Logging is not up yet, so this goes straight to stderr
            eprintln!(
                "Unknown log level '{}', defaulting to info",
                self.debug.log_level
            );
            log::LevelFilter::Info
        })
    }

    /// Size in bytes of one buffer (input or output)
    pub fn buffer_size(&self) -> u64 {
        self.compute.element_count as u64 * std::mem::size_of::<i32>() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_parameters() {
        let config = Config::default();
        assert_eq!(config.app.name, "vkcscratch");
        assert_eq!(config.compute.element_count, 16384);
        assert_eq!(config.buffer_size(), 65536);
        assert_eq!(config.shader.entry_point, "f");
        assert!(config.shader.path.is_none());
        assert!(config.device.index.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [device]
            index = 1

            [compute]
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.device.index, Some(1));
        assert_eq!(config.compute.seed, Some(7));
        assert_eq!(config.compute.element_count, 16384);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn shader_path_is_parsed() {
        let config = Config::parse(
            r#"
            [shader]
            path = "shaders/copy.comp.spv"
            entry_point = "main"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.shader.path.as_deref(),
            Some(Path::new("shaders/copy.comp.spv"))
        );
        assert_eq!(config.shader.entry_point, "main");
    }

    #[test]
    fn zero_elements_rejected() {
        let err = Config::parse("[compute]\nelement_count = 0\n").unwrap_err();
        assert!(err.to_string().contains("element_count"));
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(Config::parse("[compute\nelement_count = ").is_err());
    }

    #[test]
    fn log_level_parsing() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_eq!(config.get_log_level(), log::LevelFilter::Debug);

        config.debug.log_level = "loud".to_string();
        assert_eq!(config.get_log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.compute.element_count, 16384);
    }

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir()
            .join(format!("vkcscratch-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn zero_elements_in_file_is_an_error() {
        let path = write_temp("zero", "[compute]\nelement_count = 0\n");
        let result = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("element_count"));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let path = write_temp("garbage", "[compute\nelement_count = \"many\"\n");
        let result = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn valid_file_is_loaded() {
        let path = write_temp("valid", "[compute]\nelement_count = 64\nseed = 3\n");
        let config = Config::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.compute.element_count, 64);
        assert_eq!(config.compute.seed, Some(3));
    }
}
