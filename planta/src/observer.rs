//! Completion observer.
//!
//! Consumer side of the `station_done` handshake:
//!
//! ```text
//! worker:   Idle ──mark_ready──► ReadyForPickup
//! observer: ReadyForPickup ──claim──► Claimed ──(external action)──► Idle, post ack[i]
//! ```
//!
//! The observer never blocks on a semaphore. How long the external action
//! takes, and how it is scheduled, is up to the caller: [`Observer::claim_ready`]
//! starts it, [`Observer::acknowledge`] ends it.

use crate::error::{LineError, LineResult};
use planta_common::consts::{LAST_STATION, NUM_STATIONS};
use planta_common::product::ProductId;
use planta_shared_memory::LineIpc;
use std::sync::Arc;
use tracing::{debug, warn};

/// A claimed station completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Zero-based station index.
    pub station: usize,
    /// Product the station finished, if the slot still names one.
    pub product: Option<ProductId>,
}

impl Completion {
    /// True when acknowledging this completion consumes the product.
    pub fn is_final(&self) -> bool {
        self.station == LAST_STATION
    }
}

/// Polls shared state for completions and acknowledges them.
#[derive(Debug, Clone)]
pub struct Observer {
    ipc: Arc<LineIpc>,
}

impl Observer {
    /// Observer on an open line.
    pub fn new(ipc: Arc<LineIpc>) -> Self {
        Self { ipc }
    }

    /// Claim every station that is ready for pickup.
    ///
    /// Each completion is returned exactly once; a station already claimed is
    /// skipped until it is acknowledged and marked ready again.
    pub fn claim_ready(&self) -> Vec<Completion> {
        let state = self.ipc.state();
        (0..NUM_STATIONS)
            .filter(|&station| state.claim(station))
            .map(|station| {
                let completion = Completion {
                    station,
                    product: state.product_in(station),
                };
                debug!(station, product = ?completion.product, "Claimed completion");
                completion
            })
            .collect()
    }

    /// Finish the external action for `station`: reset its flag to idle,
    /// then post `ack[station]`.
    ///
    /// Returns `false` (and posts nothing) if the station was not claimed.
    pub fn acknowledge(&self, station: usize) -> LineResult<bool> {
        if station >= NUM_STATIONS {
            return Err(LineError::StationOutOfRange { index: station });
        }
        // Reset before post: the worker may mark its next completion as soon
        // as the ack lands.
        if !self.ipc.state().release(station) {
            warn!(station, "Acknowledge without a claimed completion ignored");
            return Ok(false);
        }
        self.ipc.ack(station)?.post()?;
        debug!(station, "Acknowledged");
        Ok(true)
    }
}
