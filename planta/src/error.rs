//! Top-level error type of the line supervisor and workers.

use crate::persistence::PersistenceError;
use planta_common::config::ConfigError;
use planta_common::watchdog::WatchdogError;
use planta_shared_memory::IpcError;
use thiserror::Error;

/// Errors surfaced by [`ProductionLine`](crate::supervisor::ProductionLine)
/// and [`StationWorker`](crate::station::StationWorker).
#[derive(Debug, Error)]
pub enum LineError {
    /// Shared memory or semaphore failure.
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// Station process management failure.
    #[error("Station process error: {0}")]
    Watchdog(#[from] WatchdogError),

    /// State file failure.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation needs shared state that has not been created.
    #[error("Line is not initialized")]
    NotInitialized,

    /// Station index outside the line.
    #[error("Station {index} out of range")]
    StationOutOfRange {
        /// Offending zero-based index.
        index: usize,
    },
}

/// Result type for line operations.
pub type LineResult<T> = Result<T, LineError>;
