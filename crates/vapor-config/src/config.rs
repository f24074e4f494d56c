//! Configuration sections, defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "config.ron";

/// Per-user configuration directory, `None` on platforms without one.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vapor"))
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub volumetrics: VolumetricsConfig,
    pub fog: FogConfig,
    pub demo: DemoConfig,
    pub debug: DebugConfig,
}

/// Platform-level volumetric support.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumetricsConfig {
    /// When false the volumetric pipeline is never created.
    pub support_volumetrics: bool,
    /// Use the High preset (4px tiles, 128 slices) instead of Medium.
    pub increase_resolution: bool,
    pub camera_relative_rendering: bool,
}

/// Fog applied to every camera.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FogConfig {
    pub enabled: bool,
    /// Volumetric fog on top of the analytic fog.
    pub volumetric: bool,
    /// Distance in meters covered by the V-Buffer.
    pub depth_extent: f32,
    /// 0 = exponential slices, 1 = linear.
    pub slice_distribution_uniformity: f32,
    /// Phase function anisotropy in (-1, 1).
    pub anisotropy: f32,
    pub global_light_probe_dimmer: f32,
    pub filter: bool,
    pub reprojection: bool,
}

/// Headless frame driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub cameras: u32,
    /// Density volumes scattered in the random scene.
    pub volumes: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g. "debug", "info,vapor_volumetrics=trace").
    pub log_level: String,
}

impl Default for VolumetricsConfig {
    fn default() -> Self {
        Self {
            support_volumetrics: true,
            increase_resolution: false,
            camera_relative_rendering: false,
        }
    }
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volumetric: true,
            depth_extent: 64.0,
            slice_distribution_uniformity: 0.75,
            anisotropy: 0.0,
            global_light_probe_dimmer: 1.0,
            filter: true,
            reprojection: true,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frames: 8,
            cameras: 1,
            volumes: 64,
            seed: 42,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl FogConfig {
    /// Clamp values the pipeline cannot represent.
    pub fn sanitize(&mut self) {
        self.depth_extent = self.depth_extent.max(0.01);
        self.slice_distribution_uniformity = self.slice_distribution_uniformity.clamp(0.0, 1.0);
        self.anisotropy = self.anisotropy.clamp(-0.999, 0.999);
        self.global_light_probe_dimmer = self.global_light_probe_dimmer.max(0.0);
    }
}

impl Config {
    /// Load `config.ron` from `config_dir`, writing the defaults there if it does not exist.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let mut config = Self::read(&config_path)?;
            config.fog.sanitize();
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::WriteError {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new().depth_limit(2);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::WriteError {
            path: config_path,
            source,
        })
    }

    /// Re-read `config.ron`. Returns the new config only if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let mut new_config = Self::read(&config_dir.join(CONFIG_FILE_NAME))?;
        new_config.fog.sanitize();

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}
