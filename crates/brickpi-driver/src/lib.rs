//! brickpi-driver: typed commands, decoding and polling for the BrickPi board
//!
//! A [`Brick`] turns sensor and motor operations into request packets, runs
//! them over a [`bus_transport::Transport`], checks the status byte and
//! decodes the reply. An [`UpdatePump`] re-reads every configured device in
//! the background and hands the results to a [`ListenerRegistry`].

mod types;
pub use types::*;

mod error;
pub use error::{BrickError, ConfigError, DecodeError, Operation, Result, VerificationError};

mod encode;
pub use encode::{body_checksum, encode, payload_of, Framing};

mod decode;
pub use decode::{
    decode_bits, encode_bits, hex, read_hex, read_i16, read_i32, read_i8, read_text, read_u16,
    read_u32, read_u8, status_of, verify, STATUS_ACCEPTED, STATUS_OFFSET,
};

mod sensors;
pub use sensors::{
    decode_value, BeaconFix, Color, RemoteButtons, Sensor, SensorReading, SensorSample,
};

mod motors;
pub use motors::{decode_encoder, MotorConfig, MotorStatus, Orientation, FLOAT_POWER};

mod registry;
pub use registry::{DeviceRef, DeviceRegistry};

mod config;
pub use config::{
    load_board_config, parse_board_config, BoardConfig, BrickSettings, MotorEntry, SensorEntry,
};

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};

mod brick;
pub use brick::{format_version, BoardInfo, Brick, BoxedTransport, Transaction};

mod listeners;
pub use listeners::{ListenerError, ListenerRegistry, UpdateListener};

mod pump;
pub use pump::{DeviceReading, DeviceUpdate, PumpStats, UpdatePump};
