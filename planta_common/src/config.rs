//! Configuration loading traits and types.
//!
//! Every process of the line reads the same TOML layout. All sections are
//! optional and fall back to defaults, so an empty file (or no file at all)
//! yields a runnable line.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "debug"
//! service_name = "planta-line-01"
//!
//! [ipc]
//! namespace = "planta"
//!
//! [station]
//! work_min_ms = 800
//! work_max_ms = 1600
//!
//! [observer]
//! poll_interval_ms = 150
//! action_ms = 1000
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use planta_common::config::{ConfigError, ConfigLoader, LineConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = LineConfig::load(Path::new("config.toml"))?;
//!     config.validate()?;
//!     println!("Namespace: {}", config.ipc.namespace);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::consts::{DEFAULT_NAMESPACE, DEFAULT_STATE_FILE};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common fields shared by every process of the line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    /// Logging verbosity level.
    pub log_level: LogLevel,

    /// Line instance identifier, used in log output.
    pub service_name: String,

    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "planta-line".to_string(),
            log_json: false,
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Naming of the shared memory segment and semaphores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Prefix of every shared object name. Two lines with different
    /// namespaces never see each other's state.
    pub namespace: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Station worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Lower bound of the randomized processing time.
    pub work_min_ms: u64,
    /// Upper bound (inclusive) of the randomized processing time.
    pub work_max_ms: u64,
    /// Pacing delay before station 0 feeds itself a new product.
    pub feed_interval_ms: u64,
    /// Maximum ACQUIRE retries before the cycle is abandoned.
    pub acquire_retries: u32,
    /// Delay between ACQUIRE retries.
    pub acquire_backoff_ms: u64,
    /// Re-check period while a station is paused.
    pub pause_poll_ms: u64,
    /// Optional delay after waking the next station. Throughput knob only.
    pub settle_ms: u64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            work_min_ms: 800,
            work_max_ms: 1600,
            feed_interval_ms: 0,
            acquire_retries: 20,
            acquire_backoff_ms: 10,
            pause_poll_ms: 200,
            settle_ms: 0,
        }
    }
}

impl StationConfig {
    /// Processing time range in milliseconds.
    pub fn work_range_ms(&self) -> std::ops::RangeInclusive<u64> {
        self.work_min_ms..=self.work_max_ms
    }

    /// Pacing delay for the station 0 self-feed.
    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }

    /// Backoff between ACQUIRE retries.
    pub fn acquire_backoff(&self) -> Duration {
        Duration::from_millis(self.acquire_backoff_ms)
    }

    /// Pause re-check period.
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    /// Settle delay after handing off.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Supervisor process management.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Station worker executable. Defaults to `planta_station` next to the
    /// running supervisor binary.
    pub station_binary: Option<PathBuf>,
    /// Wait after the cooperative stop before SIGTERM is sent.
    pub stop_grace_ms: u64,
    /// Wait after SIGTERM before SIGKILL is sent.
    pub kill_timeout_ms: u64,
    /// Settle time between pausing all stations and taking a snapshot.
    pub quiesce_ms: u64,
    /// Base seed for the per-station random work durations. A fresh random
    /// seed is drawn when unset.
    pub seed: Option<u64>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            station_binary: None,
            stop_grace_ms: 400,
            kill_timeout_ms: 2000,
            quiesce_ms: 100,
            seed: None,
        }
    }
}

impl SupervisorConfig {
    /// Grace period after the cooperative stop.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Grace period after SIGTERM.
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    /// Quiesce delay before a snapshot.
    pub fn quiesce(&self) -> Duration {
        Duration::from_millis(self.quiesce_ms)
    }
}

/// Observer (completion consumer) timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Shared state polling period.
    pub poll_interval_ms: u64,
    /// Duration of the external action performed per completion.
    pub action_ms: u64,
    /// Period of the statistics report.
    pub report_interval_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150,
            action_ms: 1000,
            report_interval_ms: 5000,
        }
    }
}

impl ObserverConfig {
    /// Polling period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// External action duration.
    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    /// Statistics report period.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

/// Recovery persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Location of the JSON state file.
    pub state_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

/// Complete configuration of one production line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Common settings.
    pub shared: SharedConfig,
    /// Shared object naming.
    pub ipc: IpcConfig,
    /// Station worker timing.
    pub station: StationConfig,
    /// Process management.
    pub supervisor: SupervisorConfig,
    /// Observer timing.
    pub observer: ObserverConfig,
    /// State file.
    pub persistence: PersistenceConfig,
}

impl LineConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    /// - `namespace` is empty or contains characters other than ASCII
    ///   alphanumerics, `_` and `-`
    /// - `work_min_ms > work_max_ms`
    /// - `poll_interval_ms` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let ns = &self.ipc.namespace;
        if ns.is_empty() {
            return Err(ConfigError::ValidationError(
                "ipc.namespace cannot be empty".to_string(),
            ));
        }
        if !ns
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::ValidationError(format!(
                "ipc.namespace '{ns}' may only contain [A-Za-z0-9_-]"
            )));
        }

        if self.station.work_min_ms > self.station.work_max_ms {
            return Err(ConfigError::ValidationError(format!(
                "station.work_min_ms ({}) exceeds station.work_max_ms ({})",
                self.station.work_min_ms, self.station.work_max_ms
            )));
        }

        if self.observer.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "observer.poll_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation: any serde-deserializable struct can be loaded.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }

        let parsed: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Warn);
        assert!(toml::from_str::<Wrapper>("level = \"loud\"").is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = LineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.station.work_range_ms(), 800..=1600);
        assert_eq!(config.observer.poll_interval(), Duration::from_millis(150));
        assert_eq!(config.persistence.state_file, PathBuf::from(DEFAULT_STATE_FILE));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"[ipc]
namespace = "line_b"

[station]
work_min_ms = 5
work_max_ms = 10
"#,
        );

        let config = LineConfig::load(file.path()).unwrap();
        assert_eq!(config.ipc.namespace, "line_b");
        assert_eq!(config.station.work_min_ms, 5);
        assert_eq!(config.station.acquire_retries, 20);
        assert_eq!(config.supervisor.stop_grace_ms, 400);
        assert_eq!(config.shared.log_level, LogLevel::Info);
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let mut config = LineConfig::default();
        config.ipc.namespace = "bad/name".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.ipc.namespace.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_work_range_rejected() {
        let mut config = LineConfig::default();
        config.station.work_min_ms = 10;
        config.station.work_max_ms = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let mut config = LineConfig::default();
        config.shared.service_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = LineConfig::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_reports_parse_errors() {
        let file = write_config("invalid toml {{{{");
        assert!(matches!(
            LineConfig::load(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
