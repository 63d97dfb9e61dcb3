use thiserror::Error;

/// An error from the Orchestrator Facade. Per-target failures never reach this level — they are
/// reported as entry statuses in an [`crate::ApplyResult`] — only the global, abort-the-whole-call
/// failures of §7 do: an empty configuration, an empty controller pool, or the daemon being lost
/// before even a snapshot could be taken.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),
    #[error("no usable Bluetooth controllers (pool is empty after excluding the reserved controller)")]
    NoControllers,
    #[error("{0} is not part of the current live audio topology")]
    NotFound(String),
    #[error("unrecoverable failure: {0}")]
    Fatal(String),
}

impl From<bluez_control::BluetoothError> for OrchestratorError {
    fn from(err: bluez_control::BluetoothError) -> Self {
        OrchestratorError::Fatal(err.to_string())
    }
}
