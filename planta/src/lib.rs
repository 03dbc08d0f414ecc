//! # Planta
//!
//! A five-station production line simulated by cooperating processes.
//!
//! Products enter at station 1, are processed at each station in order and
//! leave after station 5. Every station runs in its own worker process; the
//! supervisor owns the shared state, spawns the workers, plays the role of
//! the external observer that acknowledges each station completion, and
//! persists the line across restarts.
//!
//! ```text
//!              ┌──────────────── planta (supervisor) ────────────────┐
//!              │ ProductionLine ── StateStore ── Observer ── console │
//!              └─────────┬──────────────────────────────┬────────────┘
//!            spawn/reap  │                  claim / ack │
//!   ┌──────────┐   ┌──────────┐         ┌──────────┐    │
//!   │station 1 │──►│station 2 │── ... ─►│station 5 │    │
//!   └────┬─────┘   └────┬─────┘         └────┬─────┘    │
//!        └──────────────┴─── /dev/shm/<ns>_line ◄───────┘
//! ```
//!
//! ## Modules
//!
//! - [`supervisor`]: [`ProductionLine`] lifecycle, pause control, shutdown.
//! - [`station`]: [`StationWorker`] state machine and its command line.
//! - [`observer`]: completion claiming and acknowledgement.
//! - [`persistence`]: [`LineSnapshot`] state file.
//! - [`command`]: operator console commands.

pub mod command;
pub mod error;
pub mod observer;
pub mod persistence;
pub mod station;
pub mod supervisor;

pub use command::{CommandError, LineCommand};
pub use error::{LineError, LineResult};
pub use observer::{Completion, Observer};
pub use persistence::{LineSnapshot, PersistenceError, StateStore};
pub use station::{AbandonReason, CycleOutcome, StationArgs, StationSettings, StationWorker};
pub use supervisor::{ProductionLine, StationProcesses};
