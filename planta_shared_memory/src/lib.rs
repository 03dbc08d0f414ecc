//! # Planta Shared Memory
//!
//! Cross-process state and signalling for the production line: one shared
//! [`LineState`] segment mapped by every process, plus the named POSIX
//! semaphores that order station handoffs.
//!
//! ## Architecture Overview
//!
//! ```text
//!   supervisor ──create/destroy──► ┌────────────────────────────┐
//!                                  │ /dev/shm/<ns>_line         │
//!   station 0..N-1 ──open────────► │   LineState (atomics)      │ ◄── observer
//!                                  └────────────────────────────┘
//!          stage[i] ──► station i wakes          ack[i] ◄── observer done
//!          transition: one mutex around every ownership change
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use planta_shared_memory::{IpcNames, LineIpc};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let names = IpcNames::new("demo")?;
//! let line = LineIpc::create(&names)?;
//!
//! {
//!     let guard = line.lock()?;
//!     let id = line.state().allocate_product_id(&guard).ok_or("ids exhausted")?;
//!     line.state().hold(0, id, &guard);
//! }
//!
//! line.stage(1)?.post()?;
//! LineIpc::destroy(&names);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use planta_shared_memory::{IpcError, IpcNames, LineIpc};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let names = IpcNames::new("demo")?;
//! match LineIpc::open(&names) {
//!     Ok(_line) => {}
//!     Err(IpcError::NotFound { name }) => {
//!         eprintln!("{name} not found - is the supervisor running?");
//!     }
//!     Err(e) => eprintln!("Unexpected error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ipc;
pub mod platform;
pub mod segment;
pub mod semaphore;
pub mod state;

pub use error::{IpcError, IpcResult};
pub use ipc::{IpcNames, LineIpc, TransitionGuard};
pub use segment::LineSegment;
pub use semaphore::NamedSemaphore;
pub use state::{CompletionState, LineState, LineStats, SlotState};

use planta_common::config::LogLevel;

/// Initialize process-wide logging.
///
/// `RUST_LOG` wins over `level` when set. With `json`, events are emitted as
/// one JSON object per line.
pub fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    // A second call (tests, embedded use) keeps the first subscriber.
    if json {
        let _ = tracing::subscriber::set_global_default(builder.json().finish());
    } else {
        let _ = tracing::subscriber::set_global_default(builder.finish());
    }
}
