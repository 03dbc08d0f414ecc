//! Prelude module for common re-exports.
//!
//! ```rust
//! use planta_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LineConfig, LogLevel, SharedConfig};

// ─── Line Constants ─────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_NAMESPACE, FIRST_PRODUCT_ID, LAST_STATION, NUM_STATIONS};

// ─── Products ───────────────────────────────────────────────────────
pub use crate::product::{InFlightProduct, ProductId};

// ─── Process Supervision ────────────────────────────────────────────
pub use crate::watchdog::{StationHealth, Watchdog, WatchdogError};
