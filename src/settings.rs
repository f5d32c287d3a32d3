//! Runner settings with persistence
//!
//! Read from `~/.config/strider/settings.toml` unless a path is given.
//! `strider --write-settings` writes the defaults there to start from.

use std::fs;
use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use strider_core::TimeConfig;
use strider_movement::MovementConfig;
use strider_net::NetConfig;
use anyhow::Context;
use tracing::{info, warn};

/// All runner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub movement: MovementConfig,
    pub net: NetConfig,
    pub time: TimeConfig,
    pub scenario: ScenarioSettings,
}

impl SimSettings {
    /// `~/.config/strider/settings.toml`, or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("strider").join("settings.toml"))
    }

    /// Settings from the default path. A missing file means defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(_) => {
                info!("No settings file, running with defaults");
                Self::default()
            }
            None => {
                warn!("No config directory on this platform, running with defaults");
                Self::default()
            }
        }
    }

    /// Settings from `path`. Unreadable or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match Self::read(path) {
            Ok(settings) => {
                info!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("{:#}, running with defaults", e);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Could not parse {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write these settings as TOML to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        info!("Wrote settings to {}", path.display());
        Ok(())
    }
}

/// What the demo run does
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSettings {
    /// Simulated seconds to run
    pub duration: f32,
    /// Frame time fed to the clock each frame
    pub frame_time: f32,
    /// Input direction held for the whole run
    pub input: Vec3,
    /// When the character jumps
    pub jump: JumpSchedule,
    /// Custom gravity direction; world gravity when unset
    pub gravity_direction: Option<Vec3>,
    /// Offset applied to the client's copy at spawn so the server has to correct it
    pub client_offset: Vec3,
    /// Send a proxy snapshot every this many fixed steps
    pub snapshot_interval: u32,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            duration: 6.0,
            frame_time: 1.0 / 60.0,
            input: Vec3::X,
            jump: JumpSchedule::At(1.0),
            gravity_direction: None,
            client_offset: Vec3::new(0.0, 25.0, 0.0),
            snapshot_interval: 6,
        }
    }
}

/// Written `jump = "never"` or `jump = { at = 1.0 }`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpSchedule {
    Never,
    /// Seconds into the run
    At(f32),
}

impl JumpSchedule {
    pub fn time(self) -> Option<f32> {
        match self {
            JumpSchedule::Never => None,
            JumpSchedule::At(at) => Some(at),
        }
    }
}
