//! Recovery persistence.
//!
//! The supervisor writes a [`LineSnapshot`] on shutdown and reads it back on
//! startup to seed the shared state before any worker is spawned.
//!
//! ```json
//! {
//!   "total_completed": 12,
//!   "next_product_id": 17,
//!   "in_progress": [
//!     { "product_id": 15, "station_index": 2 },
//!     { "product_id": 16, "station_index": 0 }
//!   ],
//!   "last_closed": "2026-01-01T12:00:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use planta_common::consts::{FIRST_PRODUCT_ID, NUM_STATIONS};
use planta_common::product::InFlightProduct;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// State file errors. Only writes report them; reads fall back to a cold start.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// JSON encoding failure.
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything needed to resume the line after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSnapshot {
    /// Products that left the line in all previous sessions.
    pub total_completed: u32,
    /// Id the next new product receives.
    pub next_product_id: u32,
    /// Products that were inside a station.
    pub in_progress: Vec<InFlightProduct>,
    /// When the snapshot was taken.
    pub last_closed: Option<DateTime<Utc>>,
}

impl Default for LineSnapshot {
    fn default() -> Self {
        Self::cold()
    }
}

impl LineSnapshot {
    /// Cold start: nothing produced, nothing in flight.
    pub fn cold() -> Self {
        Self {
            total_completed: 0,
            next_product_id: FIRST_PRODUCT_ID,
            in_progress: Vec::new(),
            last_closed: None,
        }
    }

    /// True if restoring this snapshot is the same as a cold start.
    pub fn is_cold(&self) -> bool {
        self.total_completed == 0
            && self.next_product_id <= FIRST_PRODUCT_ID
            && self.in_progress.is_empty()
    }

    /// Repair a snapshot read from disk.
    ///
    /// Invalid in-flight entries are dropped (see [`valid_in_flight`]) and
    /// `next_product_id` is clamped upward so that it is at least
    /// [`FIRST_PRODUCT_ID`], above `total_completed` and above every
    /// in-flight id. A snapshot whose id counter would sit at `u32::MAX`
    /// cannot allocate again and is replaced by a cold start.
    pub fn normalized(mut self) -> Self {
        self.in_progress = valid_in_flight(&self.in_progress);

        let floor = self
            .in_progress
            .iter()
            .map(|p| p.product_id)
            .max()
            .unwrap_or(0)
            .max(self.total_completed)
            .saturating_add(1)
            .max(FIRST_PRODUCT_ID);

        if self.next_product_id < floor {
            warn!(
                "Stored next_product_id {} is behind history, clamping to {}",
                self.next_product_id, floor
            );
            self.next_product_id = floor;
        }
        if self.next_product_id == u32::MAX {
            warn!("Stored id counter is exhausted, treating state as corrupt");
            return Self::cold();
        }
        self
    }
}

/// In-flight entries that can be restored, in input order.
///
/// Drops entries with id 0 or a station outside the line, and later
/// entries that repeat a station or a product id (first one wins).
pub fn valid_in_flight(entries: &[InFlightProduct]) -> Vec<InFlightProduct> {
    let mut stations = [false; NUM_STATIONS];
    let mut ids = HashSet::new();
    let mut valid = Vec::with_capacity(entries.len().min(NUM_STATIONS));

    for entry in entries {
        let Some(product) = entry.product() else {
            warn!(
                "Dropping invalid in-flight entry: product {} at station {}",
                entry.product_id, entry.station_index
            );
            continue;
        };
        if stations[entry.station_index] || !ids.insert(product) {
            warn!(
                "Dropping duplicate in-flight entry: product {} at station {}",
                product, entry.station_index
            );
            continue;
        }
        stations[entry.station_index] = true;
        valid.push(*entry);
    }
    valid
}

/// JSON state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last snapshot. Never fails: a missing or unreadable file
    /// yields [`LineSnapshot::cold`].
    pub fn load(&self) -> LineSnapshot {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, cold start", self.path.display());
                return LineSnapshot::cold();
            }
            Err(e) => {
                warn!(
                    "Cannot read state file {}: {}. Cold start",
                    self.path.display(),
                    e
                );
                return LineSnapshot::cold();
            }
        };

        match serde_json::from_str::<LineSnapshot>(&content) {
            Ok(snapshot) => {
                let snapshot = snapshot.normalized();
                info!(
                    "Loaded state: next product {}, {} completed, {} in progress",
                    snapshot.next_product_id,
                    snapshot.total_completed,
                    snapshot.in_progress.len()
                );
                snapshot
            }
            Err(e) => {
                warn!(
                    "Corrupt state file {}: {}. Cold start",
                    self.path.display(),
                    e
                );
                LineSnapshot::cold()
            }
        }
    }

    /// Write `snapshot`, replacing the previous file atomically.
    pub fn save(&self, snapshot: &LineSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(snapshot)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| PersistenceError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        info!(
            "Saved state to {}: next product {}, {} completed, {} in progress",
            self.path.display(),
            snapshot.next_product_id,
            snapshot.total_completed,
            snapshot.in_progress.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn entry(product_id: u32, station_index: usize) -> InFlightProduct {
        InFlightProduct {
            product_id,
            station_index,
        }
    }

    #[test]
    fn test_missing_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load(), LineSnapshot::cold());
    }

    #[test]
    fn test_corrupt_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let snapshot = StateStore::new(&path).load();
        assert!(snapshot.is_cold());
        assert_eq!(snapshot.next_product_id, 1);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));
        let snapshot = LineSnapshot {
            total_completed: 4,
            next_product_id: 10,
            in_progress: vec![entry(7, 2), entry(9, 4)],
            last_closed: Some(Utc::now()),
        };

        store.save(&snapshot).unwrap();
        assert_eq!(store.load(), snapshot);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let snapshot: LineSnapshot = serde_json::from_str(r#"{"next_product_id": 5}"#).unwrap();
        assert_eq!(snapshot.next_product_id, 5);
        assert_eq!(snapshot.total_completed, 0);
        assert!(snapshot.in_progress.is_empty());
        assert!(snapshot.last_closed.is_none());
    }

    #[test]
    fn test_next_id_clamped_above_history() {
        let snapshot = LineSnapshot {
            total_completed: 20,
            next_product_id: 3,
            in_progress: vec![entry(25, 1)],
            last_closed: None,
        }
        .normalized();
        assert_eq!(snapshot.next_product_id, 26);

        let snapshot = LineSnapshot {
            next_product_id: 0,
            ..LineSnapshot::cold()
        }
        .normalized();
        assert_eq!(snapshot.next_product_id, FIRST_PRODUCT_ID);
    }

    #[test]
    fn test_exhausted_id_counter_is_a_cold_start() {
        let snapshot = LineSnapshot {
            total_completed: 3,
            next_product_id: u32::MAX,
            in_progress: vec![entry(2, 1)],
            last_closed: None,
        }
        .normalized();
        assert!(snapshot.is_cold());

        let snapshot = LineSnapshot {
            in_progress: vec![entry(u32::MAX, 0)],
            ..LineSnapshot::cold()
        }
        .normalized();
        assert!(snapshot.is_cold());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"next_product_id": 4294967295}"#).unwrap();
        assert_eq!(StateStore::new(&path).load(), LineSnapshot::cold());
    }

    #[test]
    fn test_invalid_entries_dropped_first_wins() {
        let kept = valid_in_flight(&[
            entry(0, 1),
            entry(8, NUM_STATIONS),
            entry(7, 2),
            entry(9, 2),
            entry(7, 3),
            entry(11, 4),
        ]);
        assert_eq!(kept, vec![entry(7, 2), entry(11, 4)]);
    }

    proptest! {
        #[test]
        fn prop_normalized_is_restorable(
            total in 0u32..1000,
            next in 0u32..1000,
            raw in proptest::collection::vec((0u32..50, 0usize..NUM_STATIONS + 2), 0..12),
        ) {
            let snapshot = LineSnapshot {
                total_completed: total,
                next_product_id: next,
                in_progress: raw.iter().map(|&(id, st)| entry(id, st)).collect(),
                last_closed: None,
            }
            .normalized();

            prop_assert!(snapshot.next_product_id >= FIRST_PRODUCT_ID);
            prop_assert!(snapshot.next_product_id > snapshot.total_completed);
            prop_assert!(snapshot.next_product_id >= next);
            prop_assert!(snapshot.in_progress.len() <= NUM_STATIONS);

            let mut stations = HashSet::new();
            let mut ids = HashSet::new();
            for p in &snapshot.in_progress {
                prop_assert!(p.product_id != 0);
                prop_assert!(p.product_id < snapshot.next_product_id);
                prop_assert!(stations.insert(p.station_index));
                prop_assert!(ids.insert(p.product_id));
            }

            prop_assert_eq!(snapshot.clone().normalized(), snapshot);
        }
    }
}
