use crate::encode::Framing;
use crate::motors::Orientation;
use crate::types::{MotorPort, SensorPort, SensorType, DEFAULT_ADDRESS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Link-level settings for one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct BrickSettings {
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default)]
    pub framing: Framing,
    /// Upper bound on one exchange.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Polling interval; zero or negative keeps the pump paused.
    #[serde(default)]
    pub update_interval_ms: i64,
}

fn default_address() -> u8 {
    DEFAULT_ADDRESS
}

fn default_timeout_ms() -> u64 {
    bus_transport::DEFAULT_TIMEOUT_MS
}

impl Default for BrickSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            framing: Framing::Direct,
            timeout_ms: default_timeout_ms(),
            update_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct SensorEntry {
    pub port: SensorPort,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MotorEntry {
    pub port: MotorPort,
    #[serde(default)]
    pub orientation: Orientation,
}

/// Board description loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct BoardConfig {
    #[serde(flatten)]
    pub settings: BrickSettings,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
    #[serde(default)]
    pub motors: Vec<MotorEntry>,
}

impl BoardConfig {
    /// Reject configs that name the same port twice.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, a) in self.sensors.iter().enumerate() {
            if self.sensors[..i].iter().any(|b| b.port == a.port) {
                anyhow::bail!("sensor port {} listed more than once", a.port);
            }
        }
        for (i, a) in self.motors.iter().enumerate() {
            if self.motors[..i].iter().any(|b| b.port == a.port) {
                anyhow::bail!("motor port {} listed more than once", a.port);
            }
        }
        Ok(())
    }
}

pub fn parse_board_config(raw: &str) -> anyhow::Result<BoardConfig> {
    let config: BoardConfig = serde_yaml::from_str(raw).context("parsing board config")?;
    config.validate()?;
    Ok(config)
}

pub fn load_board_config(path: impl AsRef<Path>) -> anyhow::Result<BoardConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading board config: {}", path.display()))?;
    parse_board_config(&raw).with_context(|| format!("loading {}", path.display()))
}
