//! # Watchdog Trait
//!
//! Supervisor contract for station process lifecycle management.
//! The `planta` supervisor implements this trait to spawn, probe and shut
//! down the station worker processes.

/// Health of one station process, as returned by [`Watchdog::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationHealth {
    /// Process is alive.
    Running {
        /// OS process id.
        pid: u32,
    },
    /// Process has exited.
    Exited {
        /// Exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
    },
    /// Station was never started or is no longer tracked.
    NotStarted,
}

impl StationHealth {
    /// True if the process is alive.
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Error type for watchdog operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// Failed to spawn the worker for `station`.
    #[error("failed to spawn station {station}: {reason}")]
    SpawnFailed {
        /// Zero-based station index.
        station: usize,
        /// OS-level reason.
        reason: String,
    },

    /// Station index outside the line.
    #[error("station index {station} out of range")]
    UnknownStation {
        /// Offending index.
        station: usize,
    },

    /// Failure while signalling or reaping a worker.
    #[error("failed to terminate station {station}: {reason}")]
    TerminateFailed {
        /// Zero-based station index.
        station: usize,
        /// OS-level reason.
        reason: String,
    },
}

/// Supervisor contract for station process lifecycle management.
///
/// Implementors own the child processes: spawning, liveness probing and
/// the two-phase termination (SIGTERM, then SIGKILL after a timeout).
pub trait Watchdog {
    /// Spawn the worker for `station`.
    ///
    /// Returns the OS PID of the spawned process on success. A station
    /// that is already running is not spawned twice.
    fn spawn_station(&mut self, station: usize) -> Result<u32, WatchdogError>;

    /// Query the health of the worker for `station`.
    fn health_check(&mut self, station: usize) -> StationHealth;

    /// Terminate every worker and reap it.
    ///
    /// Expected sequence:
    /// 1. Send SIGTERM to each live child.
    /// 2. Wait up to a timeout for exit.
    /// 3. Escalate to SIGKILL for unresponsive processes.
    fn shutdown_all(&mut self) -> Result<(), WatchdogError>;
}
