use crate::error::ConfigError;
use crate::motors::MotorConfig;
use crate::sensors::Sensor;
use crate::types::{MotorPort, Port, SensorPort};

/// Borrowed view of whatever is attached to a port.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceRef<'a> {
    Sensor(&'a Sensor),
    Motor(&'a MotorConfig),
}

/// At most one sensor per sensor port and one motor config per motor port.
///
/// Descriptors live until replaced by another attach on the same port; there
/// is no implicit removal and no default device.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    sensors: [Option<Sensor>; 4],
    motors: [Option<MotorConfig>; 4],
}

impl DeviceRegistry {
    /// Attach `sensor` to `port`, returning the descriptor it replaces.
    pub fn attach_sensor(&mut self, port: SensorPort, sensor: Sensor) -> Option<Sensor> {
        self.sensors[port.index()].replace(sensor)
    }

    /// Attach `config` to its port, returning the config it replaces.
    pub fn attach_motor(&mut self, config: MotorConfig) -> Option<MotorConfig> {
        self.motors[config.port.index()].replace(config)
    }

    pub fn sensor(&self, port: SensorPort) -> Option<&Sensor> {
        self.sensors[port.index()].as_ref()
    }

    pub fn sensor_mut(&mut self, port: SensorPort) -> Option<&mut Sensor> {
        self.sensors[port.index()].as_mut()
    }

    pub fn motor(&self, port: MotorPort) -> Option<&MotorConfig> {
        self.motors[port.index()].as_ref()
    }

    pub fn require_sensor(&self, port: SensorPort) -> Result<&Sensor, ConfigError> {
        self.sensor(port)
            .ok_or(ConfigError::NotConfigured(Port::Sensor(port)))
    }

    pub fn require_motor(&self, port: MotorPort) -> Result<&MotorConfig, ConfigError> {
        self.motor(port)
            .ok_or(ConfigError::NotConfigured(Port::Motor(port)))
    }

    pub fn lookup(&self, port: Port) -> Option<DeviceRef<'_>> {
        match port {
            Port::Sensor(p) => self.sensor(p).map(DeviceRef::Sensor),
            Port::Motor(p) => self.motor(p).map(DeviceRef::Motor),
        }
    }

    /// Configured ports, sensors first, each in port order.
    pub fn ports(&self) -> Vec<Port> {
        let sensors = SensorPort::ALL
            .into_iter()
            .filter(|p| self.sensor(*p).is_some())
            .map(Port::Sensor);
        let motors = MotorPort::ALL
            .into_iter()
            .filter(|p| self.motor(*p).is_some())
            .map(Port::Motor);
        sensors.chain(motors).collect()
    }

    pub fn motors(&self) -> impl Iterator<Item = &MotorConfig> {
        self.motors.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.sensors.iter().flatten().count() + self.motors().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motors::Orientation;
    use crate::types::SensorType;

    #[test]
    fn empty_ports_read_back_as_no_device() {
        let reg = DeviceRegistry::default();
        assert!(reg.is_empty());
        assert!(reg.lookup(Port::Sensor(SensorPort::S1)).is_none());
        assert_eq!(
            reg.require_motor(MotorPort::B),
            Err(ConfigError::NotConfigured(Port::Motor(MotorPort::B)))
        );
    }

    #[test]
    fn attach_replaces_without_merging() {
        let mut reg = DeviceRegistry::default();
        assert!(reg
            .attach_sensor(SensorPort::S2, Sensor::new(SensorType::Touch))
            .is_none());
        let old = reg
            .attach_sensor(SensorPort::S2, Sensor::new(SensorType::Ev3ColorColor))
            .unwrap();
        assert_eq!(old.sensor_type(), SensorType::Touch);
        assert_eq!(
            reg.sensor(SensorPort::S2).unwrap().sensor_type(),
            SensorType::Ev3ColorColor
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn ports_list_sensors_then_motors() {
        let mut reg = DeviceRegistry::default();
        reg.attach_motor(MotorConfig::new(MotorPort::C, Orientation::Forward));
        reg.attach_sensor(SensorPort::S4, Sensor::new(SensorType::Touch));
        reg.attach_motor(MotorConfig::new(MotorPort::A, Orientation::Reversed));
        assert_eq!(
            reg.ports(),
            vec![
                Port::Sensor(SensorPort::S4),
                Port::Motor(MotorPort::A),
                Port::Motor(MotorPort::C)
            ]
        );
        assert!(matches!(
            reg.lookup(Port::Motor(MotorPort::A)),
            Some(DeviceRef::Motor(m)) if m.multiplier() == -1
        ));
    }
}
