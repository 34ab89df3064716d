use crate::{BusInfo, Result};

/// A minimal blocking request/reply bus.
///
/// Implementations exchange one outbound byte sequence for one inbound byte
/// sequence. Only one exchange may be in flight at a time; callers that share a
/// transport across threads serialize access themselves.
pub trait Transport {
    /// Open a bus endpoint by name (e.g., "spi0.1", "/dev/ttyAMA0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available endpoints for this backend.
    fn list() -> Result<Vec<BusInfo>>
    where
        Self: Sized;

    /// Send `request` and block until the reply arrives or `timeout_ms` elapses.
    ///
    /// A missing reply is `TransportError::Timeout`, never an empty reply.
    fn exchange(&mut self, request: &[u8], timeout_ms: Option<u64>) -> Result<Vec<u8>>;
}
