//! Command dispatch for one board.
//!
//! Every operation runs encode, exchange, verify and decode as one unit under
//! the bus lock, so caller threads and the update pump never interleave on
//! the wire. When both locks are needed the bus lock is always taken first,
//! then the registry lock.

use crate::config::{BoardConfig, BrickSettings};
use crate::decode::{hex, read_hex, read_text, read_u16, read_u32, status_of, verify};
use crate::encode::{encode, Framing};
use crate::error::{ConfigError, DecodeError, Operation, Result, VerificationError};
use crate::metrics::DeviceMetrics;
use crate::motors::{decode_encoder, MotorConfig, MotorStatus, Orientation, FLOAT_POWER};
use crate::pump::{DeviceReading, Schedule};
use crate::registry::DeviceRegistry;
use crate::sensors::{Sensor, SensorSample};
use crate::types::{
    MessageType, MotorMask, MotorPort, Opcode, Port, Rail, SensorPort, SensorType, REPLY_DATA,
};
use bus_transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// A transport chosen at runtime.
pub type BoxedTransport = Box<dyn Transport + Send>;

/// One verified request/reply exchange.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub request: Vec<u8>,
    pub reply: Vec<u8>,
}

impl Transaction {
    pub fn is_success(&self) -> bool {
        verify(&self.reply)
    }
}

/// Identification strings and versions reported by the board.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub manufacturer: String,
    pub board_name: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub id: String,
}

/// Versions are packed as `major * 1_000_000 + minor * 1000 + patch`.
pub fn format_version(v: u32) -> String {
    format!("{}.{}.{}", v / 1_000_000, (v / 1000) % 1000, v % 1000)
}

struct Shared {
    address: u8,
    framing: Framing,
    timeout_ms: AtomicU64,
    bus: Mutex<BoxedTransport>,
    registry: Mutex<DeviceRegistry>,
    schedule: Arc<Schedule>,
    metrics: Option<DeviceMetrics>,
}

/// Handle to one board on one bus. Clones share the bus, the device registry
/// and the pump schedule.
#[derive(Clone)]
pub struct Brick {
    shared: Arc<Shared>,
}

impl fmt::Debug for Brick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Brick")
            .field("address", &self.shared.address)
            .field("framing", &self.shared.framing)
            .field("timeout_ms", &self.timeout_ms())
            .finish_non_exhaustive()
    }
}

impl Brick {
    pub fn new(transport: impl Transport + Send + 'static, settings: BrickSettings) -> Self {
        Self::from_boxed(Box::new(transport), settings, None)
    }

    pub fn with_metrics(
        transport: impl Transport + Send + 'static,
        settings: BrickSettings,
        metrics: DeviceMetrics,
    ) -> Self {
        Self::from_boxed(Box::new(transport), settings, Some(metrics))
    }

    /// Build from an already boxed transport, e.g. one picked at runtime.
    pub fn from_boxed(
        bus: BoxedTransport,
        settings: BrickSettings,
        metrics: Option<DeviceMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: settings.address,
                framing: settings.framing,
                timeout_ms: AtomicU64::new(settings.timeout_ms),
                bus: Mutex::new(bus),
                registry: Mutex::new(DeviceRegistry::default()),
                schedule: Arc::new(Schedule::new(settings.update_interval_ms)),
                metrics,
            }),
        }
    }

    /// Build with `config.settings` and attach every device it lists.
    pub fn from_config(
        bus: BoxedTransport,
        config: &BoardConfig,
        metrics: Option<DeviceMetrics>,
    ) -> Result<Self> {
        let brick = Self::from_boxed(bus, config.settings, metrics);
        brick.apply_config(config)?;
        Ok(brick)
    }

    pub fn address(&self) -> u8 {
        self.shared.address
    }

    pub fn framing(&self) -> Framing {
        self.shared.framing
    }

    pub fn timeout_ms(&self) -> u64 {
        self.shared.timeout_ms.load(Ordering::Relaxed)
    }

    pub fn set_timeout_ms(&self, timeout_ms: u64) {
        self.shared.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> Option<&DeviceMetrics> {
        self.shared.metrics.as_ref()
    }

    pub(crate) fn schedule(&self) -> Arc<Schedule> {
        Arc::clone(&self.shared.schedule)
    }

    pub fn update_interval_ms(&self) -> i64 {
        self.shared.schedule.interval_ms()
    }

    /// Zero or negative pauses the pump until a positive interval is set.
    pub fn set_update_interval_ms(&self, interval_ms: i64) {
        self.shared.schedule.set_interval_ms(interval_ms);
        info!(interval_ms, "update interval changed");
    }

    /// Wake the pump for an early tick without touching the interval.
    pub fn poke(&self) {
        self.shared.schedule.poke();
    }

    fn bus(&self) -> MutexGuard<'_, BoxedTransport> {
        self.shared.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the sensor attached to `port`, including its last reading.
    pub fn sensor(&self, port: SensorPort) -> Option<Sensor> {
        self.registry().sensor(port).cloned()
    }

    pub fn motor(&self, port: MotorPort) -> Option<MotorConfig> {
        self.registry().motor(port).copied()
    }

    pub fn configured_ports(&self) -> Vec<Port> {
        self.registry().ports()
    }

    fn record_device_count(&self, registry: &DeviceRegistry) {
        if let Some(m) = self.metrics() {
            m.devices_configured.set(registry.len() as i64);
        }
    }

    /// Encode, exchange and verify one request. The caller holds the bus lock.
    fn exchange(
        &self,
        bus: &mut BoxedTransport,
        operation: Operation,
        msg: &MessageType,
        payload: &[u8],
    ) -> Result<Transaction> {
        let request = encode(self.shared.framing, self.shared.address, msg, payload);
        if let Some(m) = self.metrics() {
            m.transactions.inc();
        }
        let reply = match bus.exchange(&request, Some(self.timeout_ms())) {
            Ok(reply) => reply,
            Err(e) => {
                if let Some(m) = self.metrics() {
                    m.transport_failures.inc();
                }
                debug!(%operation, tx = %hex(&request), error = %e, "exchange failed");
                return Err(e.into());
            }
        };
        debug!(%operation, tx = %hex(&request), rx = %hex(&reply), "exchange");
        let tx = Transaction { request, reply };
        if !tx.is_success() {
            if let Some(m) = self.metrics() {
                m.verification_failures.inc();
            }
            return Err(VerificationError {
                operation,
                status: status_of(&tx.reply),
            }
            .into());
        }
        Ok(tx)
    }

    fn decoded<T>(&self, result: core::result::Result<T, DecodeError>) -> Result<T> {
        result.map_err(|e| {
            if let Some(m) = self.metrics() {
                m.decode_failures.inc();
            }
            e.into()
        })
    }

    fn query(&self, operation: Operation, opcode: Opcode) -> Result<Vec<u8>> {
        let msg = opcode.message_type();
        let mut bus = self.bus();
        Ok(self.exchange(&mut bus, operation, &msg, &msg.filler())?.reply)
    }

    fn command(&self, operation: Operation, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let mut bus = self.bus();
        self.exchange(&mut bus, operation, &opcode.message_type(), payload)?;
        Ok(())
    }

    pub fn manufacturer(&self) -> Result<String> {
        let reply = self.query(Operation::Identify, Opcode::GetManufacturer)?;
        self.decoded(read_text(&reply))
    }

    pub fn board_name(&self) -> Result<String> {
        let reply = self.query(Operation::Identify, Opcode::GetName)?;
        self.decoded(read_text(&reply))
    }

    pub fn hardware_version(&self) -> Result<String> {
        let reply = self.query(Operation::ReadVersion, Opcode::GetHardwareVersion)?;
        self.decoded(read_u32(&reply, REPLY_DATA)).map(format_version)
    }

    pub fn firmware_version(&self) -> Result<String> {
        let reply = self.query(Operation::ReadVersion, Opcode::GetFirmwareVersion)?;
        self.decoded(read_u32(&reply, REPLY_DATA)).map(format_version)
    }

    /// 16-byte serial number as 32 hex digits.
    pub fn board_id(&self) -> Result<String> {
        let reply = self.query(Operation::Identify, Opcode::GetId)?;
        self.decoded(read_hex(&reply, 16))
    }

    pub fn identify(&self) -> Result<BoardInfo> {
        Ok(BoardInfo {
            manufacturer: self.manufacturer()?,
            board_name: self.board_name()?,
            hardware_version: self.hardware_version()?,
            firmware_version: self.firmware_version()?,
            id: self.board_id()?,
        })
    }

    /// Rail voltage in volts.
    pub fn voltage(&self, rail: Rail) -> Result<f32> {
        let reply = self.query(Operation::ReadVoltage, rail.opcode())?;
        let millivolts = self.decoded(read_u16(&reply, REPLY_DATA))?;
        Ok(f32::from(millivolts) / 1000.0)
    }

    /// Drive the LED at `percent` brightness (clamped to 100).
    pub fn set_led(&self, percent: u8) -> Result<()> {
        self.command(Operation::SetLed, Opcode::SetLed, &[percent.min(100)])
    }

    /// Hand the LED back to the firmware's own status display.
    pub fn release_led(&self) -> Result<()> {
        self.command(Operation::SetLed, Opcode::SetLed, &[0xFF])
    }

    /// Set the board's sensor type for `port`, then attach a fresh descriptor.
    /// The registry is left untouched when the board rejects the request.
    pub fn configure_sensor(&self, port: SensorPort, sensor_type: SensorType) -> Result<()> {
        let mut bus = self.bus();
        self.exchange(
            &mut bus,
            Operation::ConfigureSensor,
            &Opcode::SetSensorType.message_type(),
            &[port.mask(), sensor_type.code()],
        )?;
        let mut registry = self.registry();
        let replaced = registry.attach_sensor(port, Sensor::new(sensor_type));
        self.record_device_count(&registry);
        info!(
            %port,
            sensor = %sensor_type,
            replaced = ?replaced.map(|s| s.sensor_type()),
            "sensor configured"
        );
        Ok(())
    }

    /// Read `port` and fold the reply into its descriptor.
    ///
    /// When the board reports anything but valid data the returned sample
    /// carries the previous reading.
    pub fn read_sensor(&self, port: SensorPort) -> Result<SensorSample> {
        let mut bus = self.bus();
        let sensor_type = self.registry().require_sensor(port)?.sensor_type();
        if !sensor_type.is_readable() {
            return Err(ConfigError::UnreadableSensor(sensor_type).into());
        }
        let msg = MessageType::sensor_read(port, sensor_type);
        let tx = self.exchange(&mut bus, Operation::ReadSensor, &msg, &msg.filler())?;

        let mut registry = self.registry();
        let sensor = registry
            .sensor_mut(port)
            .ok_or(ConfigError::NotConfigured(Port::Sensor(port)))?;
        let state = self.decoded(sensor.decode(&tx.reply))?;
        debug!(%port, ?state, "sensor read");
        Ok(SensorSample::of(port, sensor))
    }

    /// Attach `config` and wake the pump so the motor is polled promptly.
    pub fn configure_motor(&self, config: MotorConfig) {
        {
            let mut registry = self.registry();
            registry.attach_motor(config);
            self.record_device_count(&registry);
        }
        info!(port = %config.port, orientation = ?config.orientation, "motor configured");
        self.poke();
    }

    fn require_motors(&self, ports: MotorMask) -> Result<()> {
        if ports.is_empty() {
            return Err(ConfigError::InvalidPort("no motor port selected".to_string()).into());
        }
        let registry = self.registry();
        for port in ports.ports() {
            registry.require_motor(port)?;
        }
        Ok(())
    }

    /// Send each `(opcode, args)` step to `ports` under one bus lock. Every
    /// payload starts with the port mask.
    fn motor_commands(
        &self,
        operation: Operation,
        ports: MotorMask,
        steps: &[(Opcode, &[u8])],
    ) -> Result<()> {
        let mut bus = self.bus();
        self.require_motors(ports)?;
        for (opcode, args) in steps {
            let mut payload = Vec::with_capacity(1 + args.len());
            payload.push(ports.bits());
            payload.extend_from_slice(args);
            self.exchange(&mut bus, operation, &opcode.message_type(), &payload)?;
        }
        Ok(())
    }

    /// Apply `power` (-100..=100, or [`FLOAT_POWER`]) to `ports`, each scaled
    /// by its motor's direction multiplier.
    ///
    /// Ports whose multipliers differ go out as one packet per orientation.
    pub fn set_motor_power(&self, ports: impl Into<MotorMask>, power: i8) -> Result<()> {
        let ports = ports.into();
        let mut bus = self.bus();
        self.require_motors(ports)?;
        let (mut forward, mut reversed) = (MotorMask::NONE, MotorMask::NONE);
        {
            let registry = self.registry();
            for motor in registry.motors().filter(|m| ports.contains(m.port)) {
                match motor.orientation {
                    Orientation::Forward => forward = forward | motor.port,
                    Orientation::Reversed => reversed = reversed | motor.port,
                }
            }
        }
        let msg = Opcode::SetMotorPower.message_type();
        for (group, orientation) in [
            (forward, Orientation::Forward),
            (reversed, Orientation::Reversed),
        ] {
            if group.is_empty() {
                continue;
            }
            let payload = [group.bits(), orientation.wire_power(power)];
            self.exchange(&mut bus, Operation::SetMotorPower, &msg, &payload)?;
        }
        Ok(())
    }

    /// Let `ports` coast.
    pub fn float_motors(&self, ports: impl Into<MotorMask>) -> Result<()> {
        self.set_motor_power(ports, FLOAT_POWER)
    }

    /// Drive `ports` to an absolute encoder target in degrees.
    pub fn set_motor_position(&self, ports: impl Into<MotorMask>, degrees: i32) -> Result<()> {
        self.motor_commands(
            Operation::SetMotorPosition,
            ports.into(),
            &[(Opcode::SetMotorPosition, &degrees.to_be_bytes()[..])],
        )
    }

    /// Read the encoder of `port` and target `current + delta`, holding the
    /// bus across both exchanges. Returns the target.
    pub fn set_motor_position_relative(&self, port: MotorPort, delta: i32) -> Result<i32> {
        let mut bus = self.bus();
        self.require_motors(port.into())?;
        let current = self.read_encoder(&mut bus, port)?;
        let target = current.wrapping_add(delta);
        let mut payload = vec![port.mask()];
        payload.extend_from_slice(&target.to_be_bytes());
        self.exchange(
            &mut bus,
            Operation::SetMotorPosition,
            &Opcode::SetMotorPosition.message_type(),
            &payload,
        )?;
        debug!(%port, current, target, "relative position set");
        Ok(target)
    }

    /// Subtract `offset` from the encoders of `ports`.
    pub fn offset_motor_encoder(&self, ports: impl Into<MotorMask>, offset: i32) -> Result<()> {
        self.motor_commands(
            Operation::OffsetEncoder,
            ports.into(),
            &[(Opcode::OffsetMotorEncoder, &offset.to_be_bytes()[..])],
        )
    }

    /// Zero the encoder of `port` by offsetting it by its current reading.
    /// Returns the offset applied.
    pub fn reset_motor_encoder(&self, port: MotorPort) -> Result<i32> {
        let mut bus = self.bus();
        self.require_motors(port.into())?;
        let current = self.read_encoder(&mut bus, port)?;
        let mut payload = vec![port.mask()];
        payload.extend_from_slice(&current.to_be_bytes());
        self.exchange(
            &mut bus,
            Operation::OffsetEncoder,
            &Opcode::OffsetMotorEncoder.message_type(),
            &payload,
        )?;
        Ok(current)
    }

    fn read_encoder(&self, bus: &mut BoxedTransport, port: MotorPort) -> Result<i32> {
        let msg = port.encoder_opcode().message_type();
        let tx = self.exchange(bus, Operation::ReadEncoder, &msg, &msg.filler())?;
        self.decoded(decode_encoder(&tx.reply))
    }

    /// Encoder position of `port` in degrees.
    pub fn motor_encoder(&self, port: MotorPort) -> Result<i32> {
        let mut bus = self.bus();
        self.require_motors(port.into())?;
        self.read_encoder(&mut bus, port)
    }

    pub fn motor_status(&self, port: MotorPort) -> Result<MotorStatus> {
        let mut bus = self.bus();
        self.require_motors(port.into())?;
        let msg = port.status_opcode().message_type();
        let tx = self.exchange(&mut bus, Operation::ReadMotorStatus, &msg, &msg.filler())?;
        self.decoded(MotorStatus::decode(&tx.reply))
    }

    /// Run `ports` at a constant speed in degrees per second.
    pub fn set_motor_dps(&self, ports: impl Into<MotorMask>, dps: i16) -> Result<()> {
        self.motor_commands(
            Operation::SetMotorDps,
            ports.into(),
            &[(Opcode::SetMotorDps, &dps.to_be_bytes()[..])],
        )
    }

    /// Cap power (percent, 0 = no limit) and speed (dps, 0 = no limit).
    pub fn set_motor_limits(
        &self,
        ports: impl Into<MotorMask>,
        power_percent: u8,
        dps: u16,
    ) -> Result<()> {
        let [hi, lo] = dps.to_be_bytes();
        self.motor_commands(
            Operation::SetMotorLimits,
            ports.into(),
            &[(Opcode::SetMotorLimits, &[power_percent, hi, lo][..])],
        )
    }

    pub fn set_motor_position_gains(
        &self,
        ports: impl Into<MotorMask>,
        kp: u16,
        kd: u16,
    ) -> Result<()> {
        self.motor_commands(
            Operation::SetMotorGains,
            ports.into(),
            &[
                (Opcode::SetMotorPositionKp, &kp.to_be_bytes()[..]),
                (Opcode::SetMotorPositionKd, &kd.to_be_bytes()[..]),
            ],
        )
    }

    pub fn set_motor_dps_gains(
        &self,
        ports: impl Into<MotorMask>,
        kp: u16,
        kd: u16,
    ) -> Result<()> {
        self.motor_commands(
            Operation::SetMotorGains,
            ports.into(),
            &[
                (Opcode::SetMotorDpsKp, &kp.to_be_bytes()[..]),
                (Opcode::SetMotorDpsKd, &kd.to_be_bytes()[..]),
            ],
        )
    }

    /// One read of `port`: a sensor read or a motor status read.
    pub fn read_device(&self, port: Port) -> Result<DeviceReading> {
        match port {
            Port::Sensor(p) => self.read_sensor(p).map(DeviceReading::Sensor),
            Port::Motor(p) => self
                .motor_status(p)
                .map(|status| DeviceReading::Motor { port: p, status }),
        }
    }

    /// Apply a board description: timeout, interval, then every device.
    pub fn apply_config(&self, config: &BoardConfig) -> Result<()> {
        self.set_timeout_ms(config.settings.timeout_ms);
        for entry in &config.sensors {
            self.configure_sensor(entry.port, entry.sensor_type)?;
        }
        for entry in &config.motors {
            self.configure_motor(MotorConfig::new(entry.port, entry.orientation));
        }
        self.set_update_interval_ms(config.settings.update_interval_ms);
        Ok(())
    }

    /// Float every configured motor and set every configured sensor back to
    /// NONE on the board. Descriptors stay in the registry. Every device is
    /// attempted; the first failure is returned.
    pub fn reset_all(&self) -> Result<()> {
        let (sensors, motors): (Vec<SensorPort>, MotorMask) = {
            let registry = self.registry();
            let sensors = registry
                .ports()
                .into_iter()
                .filter_map(|p| match p {
                    Port::Sensor(s) => Some(s),
                    Port::Motor(_) => None,
                })
                .collect();
            (sensors, registry.motors().map(|m| m.port).collect())
        };
        let mut first_err = None;
        if !motors.is_empty() {
            if let Err(e) = self.float_motors(motors) {
                warn!(error = %e, "failed to float motors");
                first_err.get_or_insert(e);
            }
        }
        for port in sensors {
            let result = self.command(
                Operation::ConfigureSensor,
                Opcode::SetSensorType,
                &[port.mask(), SensorType::None.code()],
            );
            if let Err(e) = result {
                warn!(%port, error = %e, "failed to reset sensor");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_board_config;
    use crate::error::BrickError;
    use crate::sensors::SensorReading;
    use crate::types::SensorState;
    use bus_transport::{MockHandle, MockTransport, TransportError};

    fn brick() -> (Brick, MockHandle) {
        let bus = MockTransport::new();
        let handle = bus.handle();
        (Brick::new(bus, BrickSettings::default()), handle)
    }

    fn accepted(data: &[u8]) -> Vec<u8> {
        let mut reply = vec![0, 0, 0, 0xA5];
        reply.extend_from_slice(data);
        reply
    }

    #[test]
    fn touch_sensor_keeps_last_value_on_no_data() {
        let (brick, handle) = brick();
        brick
            .configure_sensor(SensorPort::S1, SensorType::Touch)
            .unwrap();
        assert_eq!(handle.sent(), vec![vec![0x01, 12, 0x01, 4]]);

        handle.push_reply(accepted(&[4, SensorState::ValidData.code(), 1]));
        let sample = brick.read_sensor(SensorPort::S1).unwrap();
        assert_eq!(sample.state, SensorState::ValidData);
        assert_eq!(sample.reading, Some(SensorReading::Touch(true)));
        // Read is sized for the touch reply: header plus five filler bytes
        assert_eq!(handle.sent()[1], vec![0x01, 13, 0, 0, 0, 0, 0]);

        handle.push_reply(accepted(&[4, SensorState::NoData.code(), 0]));
        let sample = brick.read_sensor(SensorPort::S1).unwrap();
        assert_eq!(sample.state, SensorState::NoData);
        assert_eq!(sample.reading, Some(SensorReading::Touch(true)));
        assert_eq!(
            brick.sensor(SensorPort::S1).unwrap().state(),
            SensorState::NoData
        );
    }

    #[test]
    fn relative_position_reads_then_writes_the_sum() {
        let (brick, handle) = brick();
        brick.configure_motor(MotorConfig::new(MotorPort::A, Orientation::Forward));
        handle.push_reply(accepted(&500i32.to_be_bytes()));

        assert_eq!(brick.set_motor_position_relative(MotorPort::A, 90).unwrap(), 590);
        let sent = handle.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], vec![0x01, 30, 0, 0, 0, 0, 0, 0]);
        assert_eq!(sent[1], vec![0x01, 22, 0x01, 0x00, 0x00, 0x02, 0x4E]);
    }

    #[test]
    fn reversed_motor_power_is_negated() {
        let (brick, handle) = brick();
        brick.configure_motor(MotorConfig::new(MotorPort::B, Orientation::Reversed));
        brick.set_motor_power(MotorPort::B, 50).unwrap();
        assert_eq!(handle.sent(), vec![vec![0x01, 21, 0x02, (-50i8) as u8]]);
    }

    #[test]
    fn mixed_orientations_split_into_two_packets() {
        let (brick, handle) = brick();
        brick.configure_motor(MotorConfig::new(MotorPort::A, Orientation::Forward));
        brick.configure_motor(MotorConfig::new(MotorPort::B, Orientation::Reversed));
        brick.configure_motor(MotorConfig::new(MotorPort::C, Orientation::Forward));
        brick
            .set_motor_power(MotorPort::A | MotorPort::B | MotorPort::C, 20)
            .unwrap();
        assert_eq!(
            handle.sent(),
            vec![vec![0x01, 21, 0x05, 20], vec![0x01, 21, 0x02, 236]]
        );
    }

    #[test]
    fn rejected_configuration_leaves_registry_unchanged() {
        let (brick, handle) = brick();
        handle.push_reply(vec![0, 0, 0, 0x00]);
        let err = brick
            .configure_sensor(SensorPort::S2, SensorType::Ev3ColorColor)
            .unwrap_err();
        assert_eq!(
            err,
            BrickError::Verification(VerificationError {
                operation: Operation::ConfigureSensor,
                status: Some(0x00),
            })
        );
        assert_eq!(err.to_string(), "sensor configuration rejected by board (status 0x00)");
        assert!(brick.sensor(SensorPort::S2).is_none());
    }

    #[test]
    fn transport_failures_surface_once() {
        let (brick, handle) = brick();
        handle.push_failure(TransportError::Timeout);
        assert_eq!(
            brick.firmware_version(),
            Err(BrickError::Transport(TransportError::Timeout))
        );
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn unconfigured_ports_send_nothing() {
        let (brick, handle) = brick();
        assert_eq!(
            brick.read_sensor(SensorPort::S3),
            Err(ConfigError::NotConfigured(Port::Sensor(SensorPort::S3)).into())
        );
        assert_eq!(
            brick.motor_encoder(MotorPort::D),
            Err(ConfigError::NotConfigured(Port::Motor(MotorPort::D)).into())
        );
        assert!(brick.set_motor_power(MotorMask::NONE, 10).is_err());
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn none_sensor_is_not_readable() {
        let (brick, handle) = brick();
        brick
            .configure_sensor(SensorPort::S4, SensorType::None)
            .unwrap();
        handle.clear_sent();
        assert_eq!(
            brick.read_sensor(SensorPort::S4),
            Err(ConfigError::UnreadableSensor(SensorType::None).into())
        );
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn identify_collects_board_strings() {
        let (brick, handle) = brick();
        let mut name = b"Dexter Industries".to_vec();
        name.resize(20, 0);
        handle.push_reply(accepted(&name));
        let mut board = b"BrickPi3".to_vec();
        board.resize(20, 0);
        handle.push_reply(accepted(&board));
        handle.push_reply(accepted(&3_000_000u32.to_be_bytes()));
        handle.push_reply(accepted(&1_004_007u32.to_be_bytes()));
        handle.push_reply(accepted(&[0xAB; 16]));

        let info = brick.identify().unwrap();
        assert_eq!(info.manufacturer, "Dexter Industries");
        assert_eq!(info.board_name, "BrickPi3");
        assert_eq!(info.hardware_version, "3.0.0");
        assert_eq!(info.firmware_version, "1.4.7");
        assert_eq!(info.id, "AB".repeat(16));
        // Manufacturer query clocks out 20 characters plus padding
        assert_eq!(handle.sent()[0].len(), 25);
    }

    #[test]
    fn voltage_is_millivolts() {
        let (brick, handle) = brick();
        handle.push_reply(accepted(&9_120u16.to_be_bytes()));
        let volts = brick.voltage(Rail::V9).unwrap();
        assert!((volts - 9.12).abs() < 1e-4);
        assert_eq!(handle.sent()[0][1], 9);
    }

    #[test]
    fn led_percent_is_clamped() {
        let (brick, handle) = brick();
        brick.set_led(250).unwrap();
        brick.release_led().unwrap();
        assert_eq!(handle.sent(), vec![vec![0x01, 6, 100], vec![0x01, 6, 0xFF]]);
    }

    #[test]
    fn motor_status_reads_all_fields() {
        let (brick, handle) = brick();
        brick.configure_motor(MotorConfig::new(MotorPort::C, Orientation::Forward));
        handle.push_reply(accepted(&[0x01, 0x32, 0, 0, 0x01, 0x00, 0xFF, 0x10]));
        let status = brick.motor_status(MotorPort::C).unwrap();
        assert_eq!(status.power, 50);
        assert_eq!(status.position, 256);
        assert_eq!(status.dps, -240);
        assert!(status.is_low_voltage_float());
        assert_eq!(handle.sent()[0][1], 36);
    }

    #[test]
    fn gains_send_one_packet_per_term() {
        let (brick, handle) = brick();
        brick.configure_motor(MotorConfig::new(MotorPort::A, Orientation::Forward));
        brick.set_motor_position_gains(MotorPort::A, 25, 70).unwrap();
        assert_eq!(
            handle.sent(),
            vec![vec![0x01, 23, 0x01, 0, 25], vec![0x01, 24, 0x01, 0, 70]]
        );
    }

    #[test]
    fn checksummed_framing_is_used_end_to_end() {
        let bus = MockTransport::new();
        let handle = bus.handle();
        let settings = BrickSettings {
            framing: Framing::Checksummed,
            ..BrickSettings::default()
        };
        let brick = Brick::new(bus, settings);
        brick.configure_motor(MotorConfig::new(MotorPort::A, Orientation::Forward));
        brick.set_motor_power(MotorPort::A, 100).unwrap();
        assert_eq!(handle.sent(), vec![vec![0x01, 0x7E, 3, 21, 0x01, 0x64]]);
    }

    #[test]
    fn config_attaches_devices_and_sets_interval() {
        let (brick, handle) = brick();
        let config = parse_board_config(
            "update_interval_ms: 0\nsensors:\n  - port: S2\n    type: ev3_gyro_abs\nmotors:\n  - port: D\n    orientation: reversed\n",
        )
        .unwrap();
        brick.apply_config(&config).unwrap();
        assert_eq!(
            brick.configured_ports(),
            vec![Port::Sensor(SensorPort::S2), Port::Motor(MotorPort::D)]
        );
        assert_eq!(brick.motor(MotorPort::D).unwrap().multiplier(), -1);
        assert_eq!(handle.sent(), vec![vec![0x01, 12, 0x02, 15]]);
    }

    #[test]
    fn reset_all_floats_motors_and_clears_sensors() {
        let (brick, handle) = brick();
        brick
            .configure_sensor(SensorPort::S1, SensorType::Touch)
            .unwrap();
        brick.configure_motor(MotorConfig::new(MotorPort::B, Orientation::Reversed));
        handle.clear_sent();
        brick.reset_all().unwrap();
        assert_eq!(
            handle.sent(),
            vec![vec![0x01, 21, 0x02, 0x80], vec![0x01, 12, 0x01, 1]]
        );
        assert!(brick.sensor(SensorPort::S1).is_some());
    }

    #[test]
    fn metrics_count_failures() {
        let hub = crate::metrics::MetricsHub::new().unwrap();
        let bus = MockTransport::new();
        let handle = bus.handle();
        let brick = Brick::with_metrics(bus, BrickSettings::default(), hub.dev.clone());
        handle.push_reply(vec![0, 0, 0, 0x13]);
        assert!(brick.release_led().is_err());
        brick.release_led().unwrap();
        assert_eq!(hub.dev.transactions.get(), 2);
        assert_eq!(hub.dev.verification_failures.get(), 1);
    }
}
