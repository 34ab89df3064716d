use crate::types::{MotorPort, Port, SensorType};
use bus_transport::TransportError;
use core::fmt;
use thiserror::Error;

pub type Result<T, E = BrickError> = core::result::Result<T, E>;

/// Every failure a board operation can report. Nothing is retried internally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrickError {
    /// The byte exchange itself failed or timed out.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// The exchange completed but the board did not accept the request.
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} rejected by board (status {})", fmt_status(.status))]
pub struct VerificationError {
    pub operation: Operation,
    /// Status byte actually received; `None` when the reply was too short.
    pub status: Option<u8>,
}

fn fmt_status(status: &Option<u8>) -> String {
    status.map_or_else(|| "missing".to_string(), |s| format!("0x{s:02X}"))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no device configured on {0}")]
    NotConfigured(Port),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("sensor type {0} cannot be read with a sensor query")]
    UnreadableSensor(SensorType),
    #[error("unknown sensor type: {0}")]
    UnknownSensorType(String),
    #[error("motor {0}: direction multiplier must be +1 or -1, got {1}")]
    InvalidDirection(MotorPort, i8),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reply too short: need {needed} bytes, got {actual}")]
    ShortReply { needed: usize, actual: usize },
    #[error("unknown sensor state code {0}")]
    UnknownState(u8),
    #[error("bit field of {0} bits exceeds 32")]
    FieldTooWide(u32),
    #[error("sensor type {0} carries no value")]
    NoValue(SensorType),
}

/// Logical board operation, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Identify,
    ReadVersion,
    ReadVoltage,
    SetLed,
    ConfigureSensor,
    ReadSensor,
    SetMotorPower,
    SetMotorPosition,
    SetMotorDps,
    SetMotorLimits,
    SetMotorGains,
    OffsetEncoder,
    ReadEncoder,
    ReadMotorStatus,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Identify => "identification query",
            Operation::ReadVersion => "version query",
            Operation::ReadVoltage => "voltage query",
            Operation::SetLed => "LED update",
            Operation::ConfigureSensor => "sensor configuration",
            Operation::ReadSensor => "sensor read",
            Operation::SetMotorPower => "motor power command",
            Operation::SetMotorPosition => "motor position command",
            Operation::SetMotorDps => "motor speed command",
            Operation::SetMotorLimits => "motor limits command",
            Operation::SetMotorGains => "motor gain command",
            Operation::OffsetEncoder => "encoder offset",
            Operation::ReadEncoder => "encoder read",
            Operation::ReadMotorStatus => "motor status read",
        };
        f.write_str(s)
    }
}
