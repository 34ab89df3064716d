//! Sensor descriptors and their reply decoders.
//!
//! Every sensor reply shares one layout: `[pad, pad, pad, status, echoed type,
//! state, value...]`. The state byte decides whether the value bytes are
//! meaningful; when they are not, the last good reading is kept.

use crate::decode::{decode_bits, read_i16, read_i8, read_u16, read_u8};
use crate::error::DecodeError;
use crate::types::{SensorPort, SensorState, SensorType, SENSOR_STATE, SENSOR_VALUE};
use serde::{Deserialize, Serialize};

/// Colors reported by the EV3 color sensor in color mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    None,
    Black,
    Blue,
    Green,
    Yellow,
    Red,
    White,
    Brown,
}

impl Color {
    fn from_code(code: u32) -> Self {
        match code {
            1 => Color::Black,
            2 => Color::Blue,
            3 => Color::Green,
            4 => Color::Yellow,
            5 => Color::Red,
            6 => Color::White,
            7 => Color::Brown,
            _ => Color::None,
        }
    }
}

/// Buttons held on one channel of the EV3 infrared remote.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RemoteButtons {
    /// Red up, red down, blue up, blue down.
    pub buttons: [bool; 4],
    pub beacon: bool,
}

impl RemoteButtons {
    /// Fan a remote code out to button flags. Codes outside 1..=11 mean
    /// nothing is pressed.
    pub fn from_code(code: u8) -> Self {
        let mut out = RemoteButtons::default();
        let pressed: &[usize] = match code {
            1 => &[0],
            2 => &[1],
            3 => &[2],
            4 => &[3],
            5 => &[0, 2],
            6 => &[0, 3],
            7 => &[1, 2],
            8 => &[1, 3],
            10 => &[0, 1],
            11 => &[2, 3],
            _ => &[],
        };
        for i in pressed {
            out.buttons[*i] = true;
        }
        out.beacon = code == 9;
        out
    }

    pub fn any(&self) -> bool {
        self.beacon || self.buttons.iter().any(|b| *b)
    }
}

/// Heading and distance of one beacon channel in seek mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BeaconFix {
    /// -25 (far left) to 25 (far right).
    pub heading: i8,
    /// Relative distance, -128 when the beacon is not detected.
    pub distance: i8,
}

/// Typed value decoded from a sensor reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SensorReading {
    Touch(bool),
    /// Raw 12-bit analog value (NXT light, single NXT color channel).
    Analog(u16),
    NxtColor { color: Color, components: [u16; 4] },
    /// Distance in centimeters.
    NxtUltrasonic(u8),
    GyroAngle(i16),
    GyroRate(i16),
    GyroAngleRate { angle: i16, rate: i16 },
    /// Percent 0..=100.
    Reflected(u8),
    /// Percent 0..=100.
    Ambient(u8),
    Color(Color),
    RawReflected([u16; 2]),
    ColorComponents([u16; 4]),
    UltrasonicCm(f32),
    UltrasonicInches(f32),
    /// Another ultrasonic sensor is transmitting nearby.
    UltrasonicPresence(bool),
    /// Percent 0..=100.
    Proximity(u8),
    Seek([BeaconFix; 4]),
    Remote(RemoteButtons),
    Custom([u16; 4]),
}

/// A sensor attached to a port: its type, the last state the board reported
/// and the last valid reading.
#[derive(Clone, Debug, PartialEq)]
pub struct Sensor {
    sensor_type: SensorType,
    state: SensorState,
    reading: Option<SensorReading>,
}

impl Sensor {
    pub fn new(sensor_type: SensorType) -> Self {
        Self {
            sensor_type,
            state: SensorState::NotConfigured,
            reading: None,
        }
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn reading(&self) -> Option<&SensorReading> {
        self.reading.as_ref()
    }

    /// Apply a verified reply. The state is always recorded; the reading only
    /// changes when the state is `ValidData`. Nothing changes on error.
    pub fn decode(&mut self, reply: &[u8]) -> Result<SensorState, DecodeError> {
        let code = read_u8(reply, SENSOR_STATE)?;
        let state = SensorState::from_code(code).ok_or(DecodeError::UnknownState(code))?;
        if state == SensorState::ValidData {
            self.reading = Some(decode_value(self.sensor_type, reply)?);
        }
        self.state = state;
        Ok(state)
    }
}

/// Outcome of one sensor read: the state the board reported and the most
/// recent valid reading, which may predate this read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub port: SensorPort,
    pub sensor_type: SensorType,
    pub state: SensorState,
    pub reading: Option<SensorReading>,
}

impl SensorSample {
    pub fn of(port: SensorPort, sensor: &Sensor) -> Self {
        Self {
            port,
            sensor_type: sensor.sensor_type(),
            state: sensor.state(),
            reading: sensor.reading().cloned(),
        }
    }

    /// True when this read produced fresh data.
    pub fn is_fresh(&self) -> bool {
        self.state == SensorState::ValidData
    }
}

/// Decode the value bytes of a reply for `sensor_type`.
pub fn decode_value(sensor_type: SensorType, reply: &[u8]) -> Result<SensorReading, DecodeError> {
    use SensorType as T;
    let v = SENSOR_VALUE;
    let reading = match sensor_type {
        T::Touch | T::NxtTouch | T::Ev3Touch => SensorReading::Touch(read_u8(reply, v)? != 0),
        T::NxtLightOn
        | T::NxtLightOff
        | T::NxtColorRed
        | T::NxtColorGreen
        | T::NxtColorBlue
        | T::NxtColorOff => SensorReading::Analog(read_u16(reply, v)?),
        T::NxtColorFull => SensorReading::NxtColor {
            color: Color::from_code(u32::from(read_u8(reply, v)?)),
            components: read_u16s(reply, v + 1)?,
        },
        T::NxtUltrasonic => SensorReading::NxtUltrasonic(read_u8(reply, v)?),
        T::Ev3GyroAbs => SensorReading::GyroAngle(read_i16(reply, v)?),
        T::Ev3GyroDps => SensorReading::GyroRate(read_i16(reply, v)?),
        T::Ev3GyroAbsDps => SensorReading::GyroAngleRate {
            angle: read_i16(reply, v)?,
            rate: read_i16(reply, v + 2)?,
        },
        T::Ev3ColorReflected => SensorReading::Reflected(read_u8(reply, v)?),
        T::Ev3ColorAmbient => SensorReading::Ambient(read_u8(reply, v)?),
        // Color codes 0..=7 occupy the low 3 bits
        T::Ev3ColorColor => SensorReading::Color(Color::from_code(decode_bits(3, reply, v * 8)?)),
        T::Ev3ColorRawReflected => SensorReading::RawReflected(read_u16s(reply, v)?),
        T::Ev3ColorColorComponents => SensorReading::ColorComponents(read_u16s(reply, v)?),
        T::Ev3UltrasonicCm => SensorReading::UltrasonicCm(f32::from(read_u16(reply, v)?) / 10.0),
        T::Ev3UltrasonicInches => {
            SensorReading::UltrasonicInches(f32::from(read_u16(reply, v)?) / 10.0)
        }
        T::Ev3UltrasonicListen => SensorReading::UltrasonicPresence(read_u8(reply, v)? != 0),
        T::Ev3InfraredProximity => SensorReading::Proximity(read_u8(reply, v)?),
        T::Ev3InfraredSeek => {
            let mut fixes = [BeaconFix::default(); 4];
            for (ch, fix) in fixes.iter_mut().enumerate() {
                fix.heading = read_i8(reply, v + ch * 2)?;
                fix.distance = read_i8(reply, v + ch * 2 + 1)?;
            }
            SensorReading::Seek(fixes)
        }
        // Channel 1 only; the remaining channel bytes are not interpreted
        T::Ev3InfraredRemote => SensorReading::Remote(RemoteButtons::from_code(read_u8(reply, v)?)),
        T::Custom => SensorReading::Custom(read_u16s(reply, v)?),
        T::None | T::I2c => return Err(DecodeError::NoValue(sensor_type)),
    };
    Ok(reading)
}

fn read_u16s<const N: usize>(reply: &[u8], offset: usize) -> Result<[u16; N], DecodeError> {
    let mut out = [0u16; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = read_u16(reply, offset + i * 2)?;
    }
    Ok(out)
}
