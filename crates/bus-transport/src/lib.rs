//! bus-transport: byte-exchange transports for the BrickPi companion board
//!
//! The board answers every request in the same transfer that carries it, so the
//! whole bus is modelled as a single blocking `exchange` of request bytes for
//! reply bytes. Backends are feature-gated; the default build enables a `mock`
//! backend so that binaries compile and run on any host without hardware.

mod types;
pub use types::{BusInfo, DEFAULT_TIMEOUT_MS};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Transport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockTransport};

#[cfg(feature = "spi")]
mod spi;

#[cfg(feature = "spi")]
pub use spi::SpiTransport;

#[cfg(feature = "uart")]
mod uart;

#[cfg(feature = "uart")]
pub use uart::UartTransport;
