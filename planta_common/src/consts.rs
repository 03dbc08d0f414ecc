//! Line-wide constants.
//!
//! Single source of truth for the line topology and default object names.
//! The station count is fixed at build time: every process mapping the shared
//! segment must be built with the same value.

/// Number of stations on the line (linear chain `0 → 1 → … → N-1`).
pub const NUM_STATIONS: usize = 5;

/// Index of the last station, the one that consumes finished products.
pub const LAST_STATION: usize = NUM_STATIONS - 1;

/// First product id handed out on a cold start.
pub const FIRST_PRODUCT_ID: u32 = 1;

/// Default namespace prefixed to every shared memory and semaphore name.
pub const DEFAULT_NAMESPACE: &str = "planta";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/planta/config.toml";

/// Default persisted state file name.
pub const DEFAULT_STATE_FILE: &str = "app_state.json";

/// Name of the station worker binary spawned by the supervisor.
pub const STATION_BINARY: &str = "planta_station";
