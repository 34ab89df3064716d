/// Timeout applied to one exchange when the caller does not pass one.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// A bus endpoint discovered by a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

/// Render bytes as space-separated hex pairs for trace output.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
