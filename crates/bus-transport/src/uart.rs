use crate::types::hex;
use crate::{BusInfo, Result, Transport, TransportError, DEFAULT_TIMEOUT_MS};
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Serial link to a board running the checksummed UART protocol.
///
/// The firmware pads every reply to the length of the request, so an exchange
/// writes the request and reads back exactly that many bytes.
pub struct UartTransport {
    path: String,
    port: Box<dyn SerialPort>,
}

impl UartTransport {
    pub const DEFAULT_BAUD: u32 = 500_000;

    pub fn open_with(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        // Stale bytes from a previous session would shift every reply
        let _ = port.clear(serialport::ClearBuffer::All);
        Ok(UartTransport {
            path: path.to_string(),
            port,
        })
    }

    fn read_exact_within(&mut self, len: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut acc: Vec<u8> = Vec::with_capacity(len);
        let mut buf = [0u8; 64];
        while acc.len() < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::ShortReply {
                    expected: len,
                    actual: acc.len(),
                });
            }
            self.port.set_timeout(remaining).ok();
            let want = (len - acc.len()).min(buf.len());
            match self.port.read(&mut buf[..want]) {
                Ok(n) if n > 0 => acc.extend_from_slice(&buf[..n]),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if acc.is_empty() {
                        return Err(TransportError::Timeout);
                    }
                    return Err(TransportError::ShortReply {
                        expected: len,
                        actual: acc.len(),
                    });
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
        Ok(acc)
    }
}

impl Transport for UartTransport {
    fn open(path: &str) -> Result<Self> {
        Self::open_with(path, Self::DEFAULT_BAUD)
    }

    fn list() -> Result<Vec<BusInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            let driver = match p.port_type {
                SerialPortType::UsbPort(_) => "uart-usb",
                _ => "uart",
            };
            out.push(BusInfo {
                name: p.port_name,
                driver: driver.to_string(),
            });
        }
        Ok(out)
    }

    fn exchange(&mut self, request: &[u8], timeout_ms: Option<u64>) -> Result<Vec<u8>> {
        let deadline =
            Instant::now() + Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        self.port
            .write_all(request)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let reply = self.read_exact_within(request.len(), deadline)?;
        tracing::trace!(port = %self.path, tx = %hex(request), rx = %hex(&reply), "uart exchange");
        Ok(reply)
    }
}
