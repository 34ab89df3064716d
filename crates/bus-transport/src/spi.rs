use crate::types::hex;
use crate::{BusInfo, Result, Transport, TransportError};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// Full-duplex SPI link on the Raspberry Pi header.
///
/// Every transfer clocks in as many bytes as it clocks out, so the reply always
/// has the request's length and no timeout applies.
pub struct SpiTransport {
    name: String,
    spi: Spi,
}

impl SpiTransport {
    pub const CLOCK_HZ: u32 = 500_000;

    pub fn open_with(bus: Bus, slave: SlaveSelect) -> Result<Self> {
        let spi = Spi::new(bus, slave, Self::CLOCK_HZ, Mode::Mode0)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self {
            name: format!("spi{}.{}", bus as u8, slave as u8),
            spi,
        })
    }
}

fn parse_name(name: &str) -> Option<(Bus, SlaveSelect)> {
    let rest = name.trim().strip_prefix("spi")?;
    let (bus, slave) = rest.split_once('.')?;
    let bus = match bus {
        "0" => Bus::Spi0,
        "1" => Bus::Spi1,
        "2" => Bus::Spi2,
        _ => return None,
    };
    let slave = match slave {
        "0" => SlaveSelect::Ss0,
        "1" => SlaveSelect::Ss1,
        "2" => SlaveSelect::Ss2,
        _ => return None,
    };
    Some((bus, slave))
}

impl Transport for SpiTransport {
    /// Open by name such as `spi0.1` (bus 0, chip select 1, where the board sits).
    fn open(name: &str) -> Result<Self> {
        let (bus, slave) =
            parse_name(name).ok_or_else(|| TransportError::InterfaceNotFound(name.to_string()))?;
        Self::open_with(bus, slave)
    }

    fn list() -> Result<Vec<BusInfo>> {
        let mut out = Vec::new();
        let entries = std::fs::read_dir("/dev").map_err(|e| TransportError::Io(e.to_string()))?;
        for entry in entries.flatten() {
            let file = entry.file_name().to_string_lossy().into_owned();
            if let Some(rest) = file.strip_prefix("spidev") {
                out.push(BusInfo {
                    name: format!("spi{rest}"),
                    driver: "spidev".to_string(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn exchange(&mut self, request: &[u8], _timeout_ms: Option<u64>) -> Result<Vec<u8>> {
        let mut reply = vec![0u8; request.len()];
        let n = self
            .spi
            .transfer(&mut reply, request)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if n < request.len() {
            return Err(TransportError::ShortReply {
                expected: request.len(),
                actual: n,
            });
        }
        tracing::trace!(bus = %self.name, tx = %hex(request), rx = %hex(&reply), "spi exchange");
        Ok(reply)
    }
}
