use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use brickpi_driver as bp;
use brickpi_driver::{
    BoxedTransport, Brick, BrickSettings, DeviceUpdate, ListenerError, ListenerRegistry,
    MetricsHub, MotorConfig, MotorMask, MotorPort, Orientation, Rail, SensorPort, SensorType,
    UpdateListener, UpdatePump,
};
use bus_transport::{MockTransport, Transport};

#[derive(Parser, Debug)]
#[command(
    name = "bp",
    version,
    about = "BrickPi board CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Bus backend
    #[arg(long, value_enum, default_value_t = Backend::Mock, global = true)]
    backend: Backend,
    /// Bus endpoint, e.g. spi0.1 or /dev/ttyAMA0
    #[arg(long, default_value = "mock0", global = true)]
    device: String,
    /// Board address byte [default: 1, or the board config's]
    #[arg(long, global = true)]
    address: Option<u8>,
    /// Per-exchange timeout in milliseconds [default: 100, or the board config's]
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Packet framing used by the bus [default: direct, or the board config's]
    #[arg(long, value_enum, global = true)]
    framing: Option<FramingArg>,
    /// Print Prometheus metrics after the command
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn overrides(&self) -> LinkOverrides {
        LinkOverrides {
            address: self.address,
            framing: self.framing.map(Into::into),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Link flags given on the command line. They win over a board config.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct LinkOverrides {
    address: Option<u8>,
    framing: Option<bp::Framing>,
    timeout_ms: Option<u64>,
}

impl LinkOverrides {
    fn apply(self, mut settings: BrickSettings) -> BrickSettings {
        if let Some(address) = self.address {
            settings.address = address;
        }
        if let Some(framing) = self.framing {
            settings.framing = framing;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        settings
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    #[cfg(feature = "spi")]
    Spi,
    #[cfg(feature = "uart")]
    Uart,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum FramingArg {
    Direct,
    Checksummed,
}

impl From<FramingArg> for bp::Framing {
    fn from(f: FramingArg) -> Self {
        match f {
            FramingArg::Direct => bp::Framing::Direct,
            FramingArg::Checksummed => bp::Framing::Checksummed,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RailArg {
    #[value(name = "3v3")]
    V3v3,
    #[value(name = "5v")]
    V5,
    #[value(name = "9v")]
    V9,
    Vcc,
}

impl From<RailArg> for Rail {
    fn from(r: RailArg) -> Self {
        match r {
            RailArg::V3v3 => Rail::V3v3,
            RailArg::V5 => Rail::V5,
            RailArg::V9 => Rail::V9,
            RailArg::Vcc => Rail::Vcc,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List bus endpoints for the selected backend
    BusList,
    /// Identify the board (manufacturer, name, versions, id)
    Info {
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Read supply voltages (all rails unless one is given)
    Voltage {
        #[arg(long, value_enum)]
        rail: Option<RailArg>,
    },
    /// Set LED brightness, or hand it back to the firmware
    Led {
        /// Brightness percent (0-100)
        #[arg(conflicts_with = "release")]
        percent: Option<u8>,
        #[arg(long, action = ArgAction::SetTrue)]
        release: bool,
    },
    /// Configure a sensor port and read it
    SensorRead {
        /// Sensor port, S1..S4
        #[arg(long)]
        port: String,
        /// Sensor type, e.g. ev3_touch or ev3-color-color
        #[arg(long = "type")]
        sensor_type: String,
        /// Number of reads
        #[arg(long, default_value_t = 1u32)]
        count: u32,
        /// Delay between reads in milliseconds
        #[arg(long, default_value_t = 100u64)]
        interval_ms: u64,
    },
    /// Apply power to one or more motors (e.g. --ports AB)
    MotorPower {
        #[arg(long)]
        ports: String,
        /// -100..100; -128 floats
        #[arg(allow_hyphen_values = true)]
        power: i8,
        /// Motors are mounted reversed
        #[arg(long, action = ArgAction::SetTrue)]
        reversed: bool,
    },
    /// Drive a motor to an encoder target
    MotorPosition {
        #[arg(long)]
        port: String,
        #[arg(allow_hyphen_values = true)]
        degrees: i32,
        /// Treat degrees as relative to the current position
        #[arg(long, action = ArgAction::SetTrue)]
        relative: bool,
    },
    /// Offset motor encoders
    MotorOffset {
        #[arg(long)]
        ports: String,
        #[arg(allow_hyphen_values = true)]
        offset: i32,
    },
    /// Read a motor encoder
    MotorEncoder {
        #[arg(long)]
        port: String,
        /// Zero the encoder after reading
        #[arg(long, action = ArgAction::SetTrue)]
        reset: bool,
    },
    /// Read a motor's status
    MotorStatus {
        #[arg(long)]
        port: String,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Load a board config, start polling and print updates as JSON lines
    Watch {
        /// Board config YAML
        #[arg(long)]
        config: String,
        /// How long to watch, in seconds
        #[arg(long, default_value_t = 10u64)]
        duration_s: u64,
        /// Override the config's update interval
        #[arg(long)]
        interval_ms: Option<i64>,
    },
    /// Validate a board config YAML
    ConfigValidate {
        #[arg(long)]
        file: String,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let hub = if cli.metrics {
        Some(MetricsHub::new().map_err(anyhow::Error::msg)?)
    } else {
        None
    };
    let overrides = cli.overrides();
    let settings = overrides.apply(BrickSettings::default());
    let connect = || -> Result<Brick> {
        let bus = open_bus(cli.backend, &cli.device)?;
        Ok(Brick::from_boxed(
            bus,
            settings,
            hub.as_ref().map(|h| h.dev.clone()),
        ))
    };

    match cli.command {
        Commands::BusList => bus_list(cli.backend)?,
        Commands::Info { json } => info_cmd(&connect()?, json)?,
        Commands::Voltage { rail } => voltage_cmd(&connect()?, rail)?,
        Commands::Led { percent, release } => led_cmd(&connect()?, percent, release)?,
        Commands::SensorRead {
            port,
            sensor_type,
            count,
            interval_ms,
        } => sensor_read(&connect()?, &port, &sensor_type, count, interval_ms)?,
        Commands::MotorPower {
            ports,
            power,
            reversed,
        } => motor_power(&connect()?, &ports, power, reversed)?,
        Commands::MotorPosition {
            port,
            degrees,
            relative,
        } => motor_position(&connect()?, &port, degrees, relative)?,
        Commands::MotorOffset { ports, offset } => motor_offset(&connect()?, &ports, offset)?,
        Commands::MotorEncoder { port, reset } => motor_encoder(&connect()?, &port, reset)?,
        Commands::MotorStatus { port, json } => motor_status(&connect()?, &port, json)?,
        Commands::Watch {
            config,
            duration_s,
            interval_ms,
        } => watch(
            cli.backend,
            &cli.device,
            &config,
            duration_s,
            interval_ms,
            overrides,
            hub.as_ref(),
        )?,
        Commands::ConfigValidate { file, json } => config_validate(&file, json)?,
    }

    if let Some(hub) = &hub {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_bus(backend: Backend, device: &str) -> Result<BoxedTransport> {
    let bus: BoxedTransport = match backend {
        Backend::Mock => Box::new(MockTransport::open(device)?),
        #[cfg(feature = "spi")]
        Backend::Spi => Box::new(bus_transport::SpiTransport::open(device)?),
        #[cfg(feature = "uart")]
        Backend::Uart => Box::new(bus_transport::UartTransport::open(device)?),
    };
    info!(?backend, device, "bus open");
    Ok(bus)
}

fn bus_list(backend: Backend) -> Result<()> {
    let buses = match backend {
        Backend::Mock => MockTransport::list()?,
        #[cfg(feature = "spi")]
        Backend::Spi => bus_transport::SpiTransport::list()?,
        #[cfg(feature = "uart")]
        Backend::Uart => bus_transport::UartTransport::list()?,
    };
    for bus in buses {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

fn info_cmd(brick: &Brick, json: bool) -> Result<()> {
    let info = brick.identify().context("identify board")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("manufacturer: {}", info.manufacturer);
        println!("board:        {}", info.board_name);
        println!("hardware:     {}", info.hardware_version);
        println!("firmware:     {}", info.firmware_version);
        println!("id:           {}", info.id);
    }
    Ok(())
}

fn voltage_cmd(brick: &Brick, rail: Option<RailArg>) -> Result<()> {
    let rails: Vec<Rail> = match rail {
        Some(r) => vec![r.into()],
        None => Rail::ALL.to_vec(),
    };
    for rail in rails {
        let volts = brick.voltage(rail)?;
        println!("{rail:?}\t{volts:.3} V");
    }
    Ok(())
}

fn led_cmd(brick: &Brick, percent: Option<u8>, release: bool) -> Result<()> {
    match (percent, release) {
        (_, true) => brick.release_led()?,
        (Some(p), false) => brick.set_led(p)?,
        (None, false) => anyhow::bail!("provide a percent or --release"),
    }
    println!("led: ok");
    Ok(())
}

fn sensor_read(
    brick: &Brick,
    port: &str,
    sensor_type: &str,
    count: u32,
    interval_ms: u64,
) -> Result<()> {
    let port = SensorPort::parse(port)?;
    let sensor_type: SensorType = sensor_type.parse()?;
    brick
        .configure_sensor(port, sensor_type)
        .with_context(|| format!("configure {port} as {sensor_type}"))?;
    for i in 0..count {
        if i > 0 {
            thread::sleep(Duration::from_millis(interval_ms));
        }
        match brick.read_sensor(port) {
            Ok(sample) => println!("{}", serde_json::to_string(&sample)?),
            Err(e) => warn!(%port, error = %e, "sensor read failed"),
        }
    }
    Ok(())
}

/// `"AB"`, `"a,c"` or `"all"`.
fn parse_ports(list: &str) -> Result<MotorMask> {
    if list.eq_ignore_ascii_case("all") {
        return Ok(MotorMask::ALL);
    }
    let mut mask = MotorMask::NONE;
    for c in list.chars().filter(|c| !matches!(c, ',' | ' ')) {
        mask = mask | MotorPort::parse(c.encode_utf8(&mut [0; 4]))?;
    }
    if mask.is_empty() {
        anyhow::bail!("no motor ports in {list:?}");
    }
    Ok(mask)
}

fn attach_motors(brick: &Brick, ports: MotorMask, reversed: bool) {
    let orientation = if reversed {
        Orientation::Reversed
    } else {
        Orientation::Forward
    };
    for port in ports.ports() {
        brick.configure_motor(MotorConfig::new(port, orientation));
    }
}

fn motor_power(brick: &Brick, ports: &str, power: i8, reversed: bool) -> Result<()> {
    let mask = parse_ports(ports)?;
    attach_motors(brick, mask, reversed);
    brick.set_motor_power(mask, power)?;
    println!("power {power} -> {ports}: ok");
    Ok(())
}

fn motor_position(brick: &Brick, port: &str, degrees: i32, relative: bool) -> Result<()> {
    let port = MotorPort::parse(port)?;
    attach_motors(brick, port.into(), false);
    if relative {
        let target = brick.set_motor_position_relative(port, degrees)?;
        println!("{port}: target {target}");
    } else {
        brick.set_motor_position(port, degrees)?;
        println!("{port}: target {degrees}");
    }
    Ok(())
}

fn motor_offset(brick: &Brick, ports: &str, offset: i32) -> Result<()> {
    let mask = parse_ports(ports)?;
    attach_motors(brick, mask, false);
    brick.offset_motor_encoder(mask, offset)?;
    println!("offset {offset} -> {ports}: ok");
    Ok(())
}

fn motor_encoder(brick: &Brick, port: &str, reset: bool) -> Result<()> {
    let port = MotorPort::parse(port)?;
    attach_motors(brick, port.into(), false);
    if reset {
        let was = brick.reset_motor_encoder(port)?;
        println!("{port}: {was} (reset)");
    } else {
        println!("{port}: {}", brick.motor_encoder(port)?);
    }
    Ok(())
}

fn motor_status(brick: &Brick, port: &str, json: bool) -> Result<()> {
    let port = MotorPort::parse(port)?;
    attach_motors(brick, port.into(), false);
    let status = brick.motor_status(port)?;
    if json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        println!(
            "{port}: power={} position={} dps={} flags=0x{:02X}{}{}",
            status.power,
            status.position,
            status.dps,
            status.state,
            if status.is_low_voltage_float() {
                " low-voltage"
            } else {
                ""
            },
            if status.is_overloaded() {
                " overloaded"
            } else {
                ""
            },
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct UpdateLine<'a> {
    at: String,
    #[serde(flatten)]
    reading: &'a bp::DeviceReading,
}

fn print_update(update: &DeviceUpdate) -> Result<(), ListenerError> {
    let line = UpdateLine {
        at: update.timestamp(),
        reading: &update.reading,
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn watch(
    backend: Backend,
    device: &str,
    config_path: &str,
    duration_s: u64,
    interval_ms: Option<i64>,
    overrides: LinkOverrides,
    hub: Option<&MetricsHub>,
) -> Result<()> {
    let mut config = bp::load_board_config(config_path)?;
    config.settings = overrides.apply(config.settings);
    let bus = open_bus(backend, device)?;
    let brick = Brick::from_config(bus, &config, hub.map(|h| h.dev.clone()))
        .with_context(|| format!("applying {config_path}"))?;

    let listeners = ListenerRegistry::new();
    let printer: Arc<dyn UpdateListener> = Arc::new(print_update);
    listeners.add(printer);

    let mut pump = UpdatePump::new(brick.clone(), listeners);
    pump.start()?;
    if let Some(ms) = interval_ms {
        brick.set_update_interval_ms(ms);
    }
    if brick.update_interval_ms() <= 0 {
        warn!("update interval is not positive; the pump stays paused");
    }

    let deadline = Instant::now() + Duration::from_secs(duration_s);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    pump.stop();
    let stats = pump.stats();
    info!(
        ticks = stats.ticks,
        delivered = stats.delivered,
        skipped = stats.skipped,
        "watch finished"
    );
    if let Err(e) = brick.reset_all() {
        warn!(error = %e, "reset after watch failed");
    }
    Ok(())
}

fn config_validate(file: &str, json: bool) -> Result<()> {
    let config = bp::load_board_config(file)?;
    println!(
        "ok: {} sensors, {} motors (address=0x{:02X}, framing={:?}, interval={} ms)",
        config.sensors.len(),
        config.motors.len(),
        config.settings.address,
        config.settings.framing,
        config.settings.update_interval_ms
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }
    Ok(())
}
