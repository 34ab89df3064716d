use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// Failures of the byte exchange itself. A reply that arrives but carries a
/// bad status is not a transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("bus endpoint not found: {0}")]
    InterfaceNotFound(String),
    #[error("bus I/O: {0}")]
    Io(String),
    /// Nothing came back before the deadline.
    #[error("no reply within timeout")]
    Timeout,
    /// Part of the reply came back before the deadline.
    #[error("short reply: expected {expected} bytes, got {actual}")]
    ShortReply { expected: usize, actual: usize },
}
