use crate::decode::{read_i16, read_i32, read_i8, read_u8};
use crate::error::{ConfigError, DecodeError};
use crate::types::{MotorPort, REPLY_DATA};
use serde::{Deserialize, Serialize};

/// Power code that lets a motor coast instead of braking.
pub const FLOAT_POWER: i8 = -128;

/// Mounting orientation of a motor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Forward,
    Reversed,
}

impl Orientation {
    /// Sign applied to commanded power.
    pub fn multiplier(self) -> i8 {
        match self {
            Orientation::Forward => 1,
            Orientation::Reversed => -1,
        }
    }

    /// Power as sent on the wire: commanded power times the multiplier,
    /// reduced mod 256.
    pub fn wire_power(self, power: i8) -> u8 {
        (i16::from(power) * i16::from(self.multiplier())) as u8
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MotorConfig {
    pub port: MotorPort,
    pub orientation: Orientation,
}

impl MotorConfig {
    pub fn new(port: MotorPort, orientation: Orientation) -> Self {
        Self { port, orientation }
    }

    /// Build from a raw multiplier, which must be `1` or `-1`.
    pub fn with_multiplier(port: MotorPort, multiplier: i8) -> Result<Self, ConfigError> {
        let orientation = match multiplier {
            1 => Orientation::Forward,
            -1 => Orientation::Reversed,
            other => return Err(ConfigError::InvalidDirection(port, other)),
        };
        Ok(Self::new(port, orientation))
    }

    pub fn multiplier(&self) -> i8 {
        self.orientation.multiplier()
    }

    pub fn wire_power(&self, power: i8) -> u8 {
        self.orientation.wire_power(power)
    }
}

/// Snapshot of one motor as reported by a status read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MotorStatus {
    /// Flag bits, see [`MotorStatus::LOW_VOLTAGE_FLOAT`] and
    /// [`MotorStatus::OVERLOADED`].
    pub state: u8,
    /// Power currently applied, -100..=100.
    pub power: i8,
    /// Encoder position in degrees.
    pub position: i32,
    /// Speed in degrees per second.
    pub dps: i16,
}

impl MotorStatus {
    pub const LOW_VOLTAGE_FLOAT: u8 = 0x01;
    pub const OVERLOADED: u8 = 0x02;

    /// Reply layout: state, power, 4-byte position, 2-byte speed.
    pub fn decode(reply: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            state: read_u8(reply, REPLY_DATA)?,
            power: read_i8(reply, REPLY_DATA + 1)?,
            position: read_i32(reply, REPLY_DATA + 2)?,
            dps: read_i16(reply, REPLY_DATA + 6)?,
        })
    }

    /// The motor floats because the supply is too low to drive it.
    pub fn is_low_voltage_float(&self) -> bool {
        self.state & Self::LOW_VOLTAGE_FLOAT != 0
    }

    pub fn is_overloaded(&self) -> bool {
        self.state & Self::OVERLOADED != 0
    }
}

/// Encoder position in degrees from an encoder reply.
pub fn decode_encoder(reply: &[u8]) -> Result<i32, DecodeError> {
    read_i32(reply, REPLY_DATA)
}
