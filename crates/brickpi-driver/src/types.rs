use crate::error::ConfigError;
use core::fmt;
use core::ops::BitOr;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Board address used by a factory-fresh BrickPi.
pub const DEFAULT_ADDRESS: u8 = 0x01;

/// One of the four sensor inputs, S1..S4.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum SensorPort {
    S1,
    S2,
    S3,
    S4,
}

/// One of the four motor outputs, A..D.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum MotorPort {
    A,
    B,
    C,
    D,
}

impl SensorPort {
    pub const ALL: [SensorPort; 4] = [Self::S1, Self::S2, Self::S3, Self::S4];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self, ConfigError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| ConfigError::InvalidPort(index.to_string()))
    }

    /// Parse the board label, `1`..`4` or `S1`..`S4`.
    pub fn parse(label: &str) -> Result<Self, ConfigError> {
        let t = label.trim();
        let digits = t
            .strip_prefix('S')
            .or_else(|| t.strip_prefix('s'))
            .unwrap_or(t);
        match digits.parse::<usize>() {
            Ok(n @ 1..=4) => Self::from_index(n - 1),
            _ => Err(ConfigError::InvalidPort(label.to_string())),
        }
    }

    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    /// Opcode that reads this port.
    pub fn read_opcode(self) -> Opcode {
        match self {
            Self::S1 => Opcode::GetSensor1,
            Self::S2 => Opcode::GetSensor2,
            Self::S3 => Opcode::GetSensor3,
            Self::S4 => Opcode::GetSensor4,
        }
    }
}

impl MotorPort {
    pub const ALL: [MotorPort; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self, ConfigError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| ConfigError::InvalidPort(index.to_string()))
    }

    /// Parse the board label, `A`..`D` in either case.
    pub fn parse(label: &str) -> Result<Self, ConfigError> {
        match label.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            "C" | "c" => Ok(Self::C),
            "D" | "d" => Ok(Self::D),
            _ => Err(ConfigError::InvalidPort(label.to_string())),
        }
    }

    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    pub fn encoder_opcode(self) -> Opcode {
        match self {
            Self::A => Opcode::GetMotorAEncoder,
            Self::B => Opcode::GetMotorBEncoder,
            Self::C => Opcode::GetMotorCEncoder,
            Self::D => Opcode::GetMotorDEncoder,
        }
    }

    pub fn status_opcode(self) -> Opcode {
        match self {
            Self::A => Opcode::GetMotorAStatus,
            Self::B => Opcode::GetMotorBStatus,
            Self::C => Opcode::GetMotorCStatus,
            Self::D => Opcode::GetMotorDStatus,
        }
    }
}

impl fmt::Display for SensorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.index() + 1)
    }
}

impl fmt::Display for MotorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(label)
    }
}

/// Any addressable port on the board.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Port {
    Sensor(SensorPort),
    Motor(MotorPort),
}

impl Port {
    pub fn index(self) -> usize {
        match self {
            Port::Sensor(p) => p.index(),
            Port::Motor(p) => p.index(),
        }
    }

    pub fn mask(self) -> u8 {
        match self {
            Port::Sensor(p) => p.mask(),
            Port::Motor(p) => p.mask(),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Sensor(p) => write!(f, "sensor {p}"),
            Port::Motor(p) => write!(f, "motor {p}"),
        }
    }
}

/// Set of motor ports addressed by one packet (OR of their bit masks).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct MotorMask(u8);

impl MotorMask {
    pub const NONE: MotorMask = MotorMask(0);
    pub const ALL: MotorMask = MotorMask(0x0F);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, port: MotorPort) -> bool {
        self.0 & port.mask() != 0
    }

    pub fn ports(self) -> impl Iterator<Item = MotorPort> {
        MotorPort::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl From<MotorPort> for MotorMask {
    fn from(port: MotorPort) -> Self {
        MotorMask(port.mask())
    }
}

impl BitOr for MotorPort {
    type Output = MotorMask;

    fn bitor(self, rhs: MotorPort) -> MotorMask {
        MotorMask(self.mask() | rhs.mask())
    }
}

impl BitOr<MotorPort> for MotorMask {
    type Output = MotorMask;

    fn bitor(self, rhs: MotorPort) -> MotorMask {
        MotorMask(self.0 | rhs.mask())
    }
}

impl BitOr for MotorMask {
    type Output = MotorMask;

    fn bitor(self, rhs: MotorMask) -> MotorMask {
        MotorMask(self.0 | rhs.0)
    }
}

impl FromIterator<MotorPort> for MotorMask {
    fn from_iter<I: IntoIterator<Item = MotorPort>>(iter: I) -> Self {
        iter.into_iter().fold(MotorMask::NONE, |m, p| m | p)
    }
}

/// Wire operation codes understood by the board firmware.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    GetManufacturer = 1,
    GetName = 2,
    GetHardwareVersion = 3,
    GetFirmwareVersion = 4,
    GetId = 5,
    SetLed = 6,
    GetVoltage3V3 = 7,
    GetVoltage5V = 8,
    GetVoltage9V = 9,
    GetVoltageVcc = 10,
    SetAddress = 11,
    SetSensorType = 12,
    GetSensor1 = 13,
    GetSensor2 = 14,
    GetSensor3 = 15,
    GetSensor4 = 16,
    I2cTransact1 = 17,
    I2cTransact2 = 18,
    I2cTransact3 = 19,
    I2cTransact4 = 20,
    SetMotorPower = 21,
    SetMotorPosition = 22,
    SetMotorPositionKp = 23,
    SetMotorPositionKd = 24,
    SetMotorDps = 25,
    SetMotorDpsKp = 26,
    SetMotorDpsKd = 27,
    SetMotorLimits = 28,
    OffsetMotorEncoder = 29,
    GetMotorAEncoder = 30,
    GetMotorBEncoder = 31,
    GetMotorCEncoder = 32,
    GetMotorDEncoder = 33,
    GetMotorAStatus = 34,
    GetMotorBStatus = 35,
    GetMotorCStatus = 36,
    GetMotorDStatus = 37,
}

impl Opcode {
    pub const ALL: [Opcode; 37] = [
        Self::GetManufacturer,
        Self::GetName,
        Self::GetHardwareVersion,
        Self::GetFirmwareVersion,
        Self::GetId,
        Self::SetLed,
        Self::GetVoltage3V3,
        Self::GetVoltage5V,
        Self::GetVoltage9V,
        Self::GetVoltageVcc,
        Self::SetAddress,
        Self::SetSensorType,
        Self::GetSensor1,
        Self::GetSensor2,
        Self::GetSensor3,
        Self::GetSensor4,
        Self::I2cTransact1,
        Self::I2cTransact2,
        Self::I2cTransact3,
        Self::I2cTransact4,
        Self::SetMotorPower,
        Self::SetMotorPosition,
        Self::SetMotorPositionKp,
        Self::SetMotorPositionKd,
        Self::SetMotorDps,
        Self::SetMotorDpsKp,
        Self::SetMotorDpsKd,
        Self::SetMotorLimits,
        Self::OffsetMotorEncoder,
        Self::GetMotorAEncoder,
        Self::GetMotorBEncoder,
        Self::GetMotorCEncoder,
        Self::GetMotorDEncoder,
        Self::GetMotorAStatus,
        Self::GetMotorBStatus,
        Self::GetMotorCStatus,
        Self::GetMotorDStatus,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Fixed message shape for this opcode.
    ///
    /// Sensor reads depend on the attached sensor type; their entry here is the
    /// shortest read (one value byte), see [`MessageType::sensor_read`].
    /// I2C transactions and address assignment carry device-specific payloads
    /// and report a size of zero.
    pub fn message_type(self) -> MessageType {
        use Direction::{Command, Query};
        use Opcode::*;
        let (size, direction) = match self {
            GetManufacturer | GetName => (STRING_QUERY, Query),
            GetId => (ID_QUERY, Query),
            GetHardwareVersion | GetFirmwareVersion => (U32_QUERY, Query),
            GetVoltage3V3 | GetVoltage5V | GetVoltage9V | GetVoltageVcc => (U16_QUERY, Query),
            SetLed => (1, Command),
            SetAddress => (0, Command),
            SetSensorType => (2, Command),
            GetSensor1 | GetSensor2 | GetSensor3 | GetSensor4 => {
                (SensorType::Touch.reply_len() - REQUEST_HEADER, Query)
            }
            I2cTransact1 | I2cTransact2 | I2cTransact3 | I2cTransact4 => (0, Command),
            SetMotorPower => (2, Command),
            SetMotorPosition | OffsetMotorEncoder => (5, Command),
            SetMotorPositionKp | SetMotorPositionKd | SetMotorDps | SetMotorDpsKp
            | SetMotorDpsKd => (3, Command),
            SetMotorLimits => (4, Command),
            GetMotorAEncoder | GetMotorBEncoder | GetMotorCEncoder | GetMotorDEncoder => {
                (U32_QUERY, Query)
            }
            GetMotorAStatus | GetMotorBStatus | GetMotorCStatus | GetMotorDStatus => {
                (MOTOR_STATUS_QUERY, Query)
            }
        };
        MessageType::new(self, size, direction)
    }
}

/// Address and opcode bytes in front of every direct-framed payload.
pub const REQUEST_HEADER: usize = 2;
/// Offset of the first data byte in every reply.
pub const REPLY_DATA: usize = 4;

// Query payloads are zero filler sized so the reply can be clocked back in the
// same transfer: reply = 4 header bytes + data.
const STRING_QUERY: usize = REPLY_DATA + 20 - REQUEST_HEADER + 1;
const ID_QUERY: usize = REPLY_DATA + 16 - REQUEST_HEADER + 1;
const U32_QUERY: usize = REPLY_DATA + 4 - REQUEST_HEADER;
const U16_QUERY: usize = REPLY_DATA + 2 - REQUEST_HEADER;
const MOTOR_STATUS_QUERY: usize = REPLY_DATA + 8 - REQUEST_HEADER;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Reads data back; the payload is filler.
    Query,
    /// Changes board state; the payload carries arguments.
    Command,
}

/// Opcode plus the exact payload size it carries on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageType {
    pub opcode: Opcode,
    pub payload_size: usize,
    pub direction: Direction,
}

impl MessageType {
    pub const fn new(opcode: Opcode, payload_size: usize, direction: Direction) -> Self {
        Self {
            opcode,
            payload_size,
            direction,
        }
    }

    /// Read of `port` sized for the reply of `sensor`.
    pub fn sensor_read(port: SensorPort, sensor: SensorType) -> Self {
        Self::new(
            port.read_opcode(),
            sensor.reply_len() - REQUEST_HEADER,
            Direction::Query,
        )
    }

    /// Zero filler payload for a query.
    pub fn filler(&self) -> Vec<u8> {
        vec![0u8; self.payload_size]
    }
}

/// Sensor type codes accepted by SET_SENSOR_TYPE.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SensorType {
    None = 1,
    I2c = 2,
    Custom = 3,
    Touch = 4,
    NxtTouch = 5,
    Ev3Touch = 6,
    NxtLightOn = 7,
    NxtLightOff = 8,
    NxtColorRed = 9,
    NxtColorGreen = 10,
    NxtColorBlue = 11,
    NxtColorFull = 12,
    NxtColorOff = 13,
    NxtUltrasonic = 14,
    Ev3GyroAbs = 15,
    Ev3GyroDps = 16,
    Ev3GyroAbsDps = 17,
    Ev3ColorReflected = 18,
    Ev3ColorAmbient = 19,
    Ev3ColorColor = 20,
    Ev3ColorRawReflected = 21,
    Ev3ColorColorComponents = 22,
    Ev3UltrasonicCm = 23,
    Ev3UltrasonicInches = 24,
    Ev3UltrasonicListen = 25,
    Ev3InfraredProximity = 26,
    Ev3InfraredSeek = 27,
    Ev3InfraredRemote = 28,
}

impl SensorType {
    pub const ALL: [SensorType; 28] = [
        Self::None,
        Self::I2c,
        Self::Custom,
        Self::Touch,
        Self::NxtTouch,
        Self::Ev3Touch,
        Self::NxtLightOn,
        Self::NxtLightOff,
        Self::NxtColorRed,
        Self::NxtColorGreen,
        Self::NxtColorBlue,
        Self::NxtColorFull,
        Self::NxtColorOff,
        Self::NxtUltrasonic,
        Self::Ev3GyroAbs,
        Self::Ev3GyroDps,
        Self::Ev3GyroAbsDps,
        Self::Ev3ColorReflected,
        Self::Ev3ColorAmbient,
        Self::Ev3ColorColor,
        Self::Ev3ColorRawReflected,
        Self::Ev3ColorColorComponents,
        Self::Ev3UltrasonicCm,
        Self::Ev3UltrasonicInches,
        Self::Ev3UltrasonicListen,
        Self::Ev3InfraredProximity,
        Self::Ev3InfraredSeek,
        Self::Ev3InfraredRemote,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    /// Number of value bytes following the state byte in a sensor reply.
    /// `None` for types that cannot be read with GET_SENSOR.
    pub fn value_len(self) -> Option<usize> {
        use SensorType::*;
        let n = match self {
            None | I2c => return Option::None,
            Touch | NxtTouch | Ev3Touch | NxtUltrasonic | Ev3ColorReflected | Ev3ColorAmbient
            | Ev3ColorColor | Ev3UltrasonicListen | Ev3InfraredProximity => 1,
            NxtLightOn | NxtLightOff | NxtColorRed | NxtColorGreen | NxtColorBlue
            | NxtColorOff | Ev3GyroAbs | Ev3GyroDps | Ev3UltrasonicCm | Ev3UltrasonicInches => 2,
            Ev3GyroAbsDps | Ev3ColorRawReflected | Ev3InfraredRemote => 4,
            Custom | Ev3ColorColorComponents | Ev3InfraredSeek => 8,
            NxtColorFull => 9,
        };
        Some(n)
    }

    pub fn is_readable(self) -> bool {
        self.value_len().is_some()
    }

    /// Full reply length of a sensor read: header, status, echoed type, state
    /// and value bytes. Unreadable types report the header-only length.
    pub fn reply_len(self) -> usize {
        SENSOR_VALUE + self.value_len().unwrap_or(0)
    }
}

/// Offset of the echoed sensor type in a sensor reply.
pub const SENSOR_TYPE_ECHO: usize = REPLY_DATA;
/// Offset of the sensor state byte in a sensor reply.
pub const SENSOR_STATE: usize = REPLY_DATA + 1;
/// Offset of the first value byte in a sensor reply.
pub const SENSOR_VALUE: usize = REPLY_DATA + 2;

/// Accepts the snake_case names used in board configs; `-` may stand in for `_`.
impl FromStr for SensorType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        serde_json::from_value(serde_json::Value::String(name))
            .map_err(|_| ConfigError::UnknownSensorType(s.to_string()))
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-read state the board reports for a sensor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    ValidData,
    #[default]
    NotConfigured,
    Configuring,
    NoData,
    I2cError,
}

impl SensorState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::ValidData),
            1 => Some(Self::NotConfigured),
            2 => Some(Self::Configuring),
            3 => Some(Self::NoData),
            4 => Some(Self::I2cError),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::ValidData => 0,
            Self::NotConfigured => 1,
            Self::Configuring => 2,
            Self::NoData => 3,
            Self::I2cError => 4,
        }
    }
}

/// Supply rails the board can measure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    V3v3,
    V5,
    V9,
    Vcc,
}

impl Rail {
    pub const ALL: [Rail; 4] = [Self::V3v3, Self::V5, Self::V9, Self::Vcc];

    pub fn opcode(self) -> Opcode {
        match self {
            Self::V3v3 => Opcode::GetVoltage3V3,
            Self::V5 => Opcode::GetVoltage5V,
            Self::V9 => Opcode::GetVoltage9V,
            Self::Vcc => Opcode::GetVoltageVcc,
        }
    }
}
