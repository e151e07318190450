//! Driver configuration.
//!
//! Covers the viewport, terrain, persistence and the scripted pan. Loaded from
//! and saved to a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strata_world::{CacheConfig, MAXIMUM_CHUNKS};
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "strata.toml";

/// Which terrain the world is generated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainKind {
    /// Sine-wave hills of a single solid tile
    #[default]
    Sine,
    /// Perlin-noise hills with grass, dirt and stone
    Noise,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Driver configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // === View Settings ===
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
    /// Camera zoom level
    pub camera_zoom: f32,

    // === World Settings ===
    /// World seed (noise terrain only)
    pub world_seed: u32,
    /// Terrain generator
    pub terrain: TerrainKind,
    /// Maximum resident chunks
    pub max_resident: usize,

    // === Persistence ===
    /// Save chunks to disk and reload them on the next run
    pub persist_to_disk: bool,
    /// Directory for chunk files
    pub save_dir: PathBuf,

    // === Simulation ===
    /// Frames to simulate before shutting down
    pub frames: u32,
    /// Frame interval in milliseconds
    pub frame_interval_ms: u64,
    /// Horizontal camera pan per frame in world pixels
    pub pan_speed: f32,

    // === Logging ===
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            // View
            viewport_width: 1280,
            viewport_height: 720,
            camera_zoom: 1.0,

            // World
            world_seed: 12345,
            terrain: TerrainKind::Sine,
            max_resident: MAXIMUM_CHUNKS,

            // Persistence
            persist_to_disk: false,
            save_dir: PathBuf::from("saves"),

            // Simulation
            frames: 600,
            frame_interval_ms: 16,
            pan_speed: 32.0,

            // Logging
            log_format: LogFormat::Pretty,
        }
    }
}

/// Outcome of reading a configuration file.
#[derive(Debug)]
pub enum ConfigLoad {
    /// The file was read and parsed
    Loaded(AppConfig),
    /// No file at the path
    Missing,
    /// The file could not be read or parsed
    Invalid(String),
}

impl ConfigLoad {
    /// The configuration to run with: the loaded one, else defaults.
    #[must_use]
    pub fn config(&self) -> AppConfig {
        match self {
            Self::Loaded(config) => config.clone(),
            Self::Missing | Self::Invalid(_) => AppConfig::default(),
        }
    }

    /// Logs what happened; call once logging is set up.
    pub fn report(&self, path: &Path) {
        match self {
            Self::Loaded(_) => info!("Loaded config from {}", path.display()),
            Self::Missing => info!("Config file not found, using defaults"),
            Self::Invalid(e) => warn!("Failed to load config file {}: {e}", path.display()),
        }
    }
}

impl AppConfig {
    /// Read configuration from a specific path, without logging.
    pub fn read_from<P: AsRef<Path>>(path: P) -> ConfigLoad {
        let path = path.as_ref();

        if !path.exists() {
            return ConfigLoad::Missing;
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => return ConfigLoad::Invalid(format!("read failed: {e}")),
        };

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                ConfigLoad::Loaded(config)
            },
            Err(e) => ConfigLoad::Invalid(format!("parse failed: {e}")),
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.viewport_width = self.viewport_width.clamp(64, 7680);
        self.viewport_height = self.viewport_height.clamp(64, 4320);
        self.camera_zoom = self
            .camera_zoom
            .clamp(strata_world::MIN_ZOOM, strata_world::MAX_ZOOM);
        self.max_resident = self.max_resident.max(1);
        self.frame_interval_ms = self.frame_interval_ms.clamp(1, 1000);
        if !self.pan_speed.is_finite() {
            self.pan_speed = 0.0;
        }
    }

    /// Cache settings derived from this configuration.
    #[must_use]
    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            max_resident: self.max_resident,
        }
    }
}
