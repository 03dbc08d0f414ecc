//! Station worker.
//!
//! One worker process runs per station index. Each pass of
//! [`StationWorker::run_cycle`] walks the handshake state machine once:
//!
//! ```text
//! WAIT_STAGE ─► ACQUIRE ─► PROCESS ─► MARK_DONE ─► WAIT_ACK ─► TRANSFER
//!     ▲            │ abandoned                                     │
//!     └────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! Every read-modify-write of slot ownership, the id counter and the
//! completed counter happens under the transition mutex. The only blocking
//! points are the `stage[i]` and `ack[i]` waits; `running == false` observed
//! after either wait ends the worker.

use crate::error::{LineError, LineResult};
use clap::Parser;
use planta_common::config::{ConfigError, StationConfig};
use planta_common::consts::{DEFAULT_NAMESPACE, LAST_STATION, NUM_STATIONS};
use planta_common::product::ProductId;
use planta_shared_memory::{IpcResult, LineIpc, SlotState, TransitionGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing knobs of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSettings {
    /// Randomized PROCESS duration, in milliseconds.
    pub work_range_ms: RangeInclusive<u64>,
    /// Station 0 pacing delay before feeding itself.
    pub feed_interval: Duration,
    /// ACQUIRE retries before abandoning the cycle.
    pub acquire_retries: u32,
    /// Delay between ACQUIRE retries.
    pub acquire_backoff: Duration,
    /// Re-check period while paused.
    pub pause_poll: Duration,
    /// Delay after waking the successor.
    pub settle: Duration,
}

impl From<&StationConfig> for StationSettings {
    fn from(config: &StationConfig) -> Self {
        Self {
            work_range_ms: config.work_range_ms(),
            feed_interval: config.feed_interval(),
            acquire_retries: config.acquire_retries,
            acquire_backoff: config.acquire_backoff(),
            pause_poll: config.pause_poll(),
            settle: config.settle(),
        }
    }
}

impl Default for StationSettings {
    fn default() -> Self {
        Self::from(&StationConfig::default())
    }
}

/// Command line of the `planta_station` worker.
///
/// The supervisor builds it with [`StationArgs::new`] and passes it on via
/// [`StationArgs::to_args`].
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "planta_station")]
#[command(version)]
#[command(about = "Production line station worker")]
#[command(long_about = None)]
pub struct StationArgs {
    /// Zero-based station index
    #[arg(long)]
    pub station: usize,

    /// Namespace of the shared line objects
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Seed for the randomized processing time
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Minimum processing time (ms)
    #[arg(long, default_value_t = StationConfig::default().work_min_ms)]
    pub work_min_ms: u64,

    /// Maximum processing time (ms)
    #[arg(long, default_value_t = StationConfig::default().work_max_ms)]
    pub work_max_ms: u64,

    /// Station 0 self-feed pacing (ms)
    #[arg(long, default_value_t = StationConfig::default().feed_interval_ms)]
    pub feed_interval_ms: u64,

    /// ACQUIRE retries before a cycle is abandoned
    #[arg(long, default_value_t = StationConfig::default().acquire_retries)]
    pub acquire_retries: u32,

    /// Delay between ACQUIRE retries (ms)
    #[arg(long, default_value_t = StationConfig::default().acquire_backoff_ms)]
    pub acquire_backoff_ms: u64,

    /// Pause re-check period (ms)
    #[arg(long, default_value_t = StationConfig::default().pause_poll_ms)]
    pub pause_poll_ms: u64,

    /// Delay after waking the next station (ms)
    #[arg(long, default_value_t = StationConfig::default().settle_ms)]
    pub settle_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json: bool,
}

impl StationArgs {
    /// Arguments for `station` with timing taken from `config`.
    pub fn new(station: usize, namespace: &str, seed: u64, config: &StationConfig) -> Self {
        Self {
            station,
            namespace: namespace.to_string(),
            seed,
            work_min_ms: config.work_min_ms,
            work_max_ms: config.work_max_ms,
            feed_interval_ms: config.feed_interval_ms,
            acquire_retries: config.acquire_retries,
            acquire_backoff_ms: config.acquire_backoff_ms,
            pause_poll_ms: config.pause_poll_ms,
            settle_ms: config.settle_ms,
            verbose: false,
            json: false,
        }
    }

    /// Render as a command line (without the program name).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--station".to_string(),
            self.station.to_string(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--seed".to_string(),
            self.seed.to_string(),
            "--work-min-ms".to_string(),
            self.work_min_ms.to_string(),
            "--work-max-ms".to_string(),
            self.work_max_ms.to_string(),
            "--feed-interval-ms".to_string(),
            self.feed_interval_ms.to_string(),
            "--acquire-retries".to_string(),
            self.acquire_retries.to_string(),
            "--acquire-backoff-ms".to_string(),
            self.acquire_backoff_ms.to_string(),
            "--pause-poll-ms".to_string(),
            self.pause_poll_ms.to_string(),
            "--settle-ms".to_string(),
            self.settle_ms.to_string(),
        ];
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if self.json {
            args.push("--json".to_string());
        }
        args
    }

    /// Worker timing.
    pub fn settings(&self) -> StationSettings {
        StationSettings {
            work_range_ms: self.work_min_ms..=self.work_max_ms,
            feed_interval: Duration::from_millis(self.feed_interval_ms),
            acquire_retries: self.acquire_retries,
            acquire_backoff: Duration::from_millis(self.acquire_backoff_ms),
            pause_poll: Duration::from_millis(self.pause_poll_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

/// Why a cycle ended without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// Woken, but the predecessor has nothing to hand over.
    PredecessorEmpty,
    /// Own slot still awaits pickup by the successor.
    OwnSlotOccupied,
    /// The slot no longer holds the product this cycle acquired.
    OwnershipLost,
    /// Station 0 was paused before allocating a new product.
    Paused,
    /// The product id counter reached its ceiling.
    IdsExhausted,
}

/// Result of one [`StationWorker::run_cycle`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Product processed, acknowledged and passed on (or consumed).
    Completed(ProductId),
    /// Nothing happened; the worker goes back to waiting.
    Abandoned(AbandonReason),
    /// `running` was cleared; the worker must exit.
    Terminated,
}

enum Acquisition {
    /// New product taken from the predecessor (or allocated by station 0).
    Acquired(ProductId),
    /// Product restored into this station's slot by the supervisor.
    Resumed(ProductId),
    Abandoned(AbandonReason),
    Stopped,
}

/// State machine of one station.
pub struct StationWorker {
    index: usize,
    ipc: LineIpc,
    settings: StationSettings,
    rng: StdRng,
}

impl StationWorker {
    /// Worker for station `index` on an opened line.
    pub fn new(
        index: usize,
        ipc: LineIpc,
        settings: StationSettings,
        seed: u64,
    ) -> LineResult<Self> {
        if index >= NUM_STATIONS {
            return Err(LineError::StationOutOfRange { index });
        }
        if settings.work_range_ms.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "empty work range {:?}",
                settings.work_range_ms
            ))
            .into());
        }
        Ok(Self {
            index,
            ipc,
            settings,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Run cycles until the line stops. Returns the number of completed
    /// cycles.
    pub fn run(&mut self) -> LineResult<u64> {
        info!(station = self.index, "🏭 Station {} started", self.index + 1);

        let mut completed = 0u64;
        loop {
            match self.run_cycle()? {
                CycleOutcome::Completed(_) => completed += 1,
                CycleOutcome::Abandoned(reason) => {
                    debug!(station = self.index, ?reason, "Cycle abandoned");
                }
                CycleOutcome::Terminated => break,
            }
        }

        info!(
            station = self.index,
            "🛑 Station {} stopped after {} products",
            self.index + 1,
            completed
        );
        Ok(completed)
    }

    /// One pass of the state machine.
    pub fn run_cycle(&mut self) -> LineResult<CycleOutcome> {
        let idx = self.index;

        // WAIT_STAGE
        self.ipc.stage(idx)?.wait()?;
        if !self.hold_while_paused() {
            return Ok(CycleOutcome::Terminated);
        }

        // ACQUIRE
        let product = match self.acquire()? {
            Acquisition::Acquired(product) => {
                debug!(station = idx, %product, "Acquired");
                product
            }
            Acquisition::Resumed(product) => {
                info!(station = idx, %product, "Resuming restored product");
                product
            }
            Acquisition::Abandoned(reason) => {
                self.rearm(reason)?;
                return Ok(CycleOutcome::Abandoned(reason));
            }
            Acquisition::Stopped => return Ok(CycleOutcome::Terminated),
        };

        // PROCESS
        let work = self.rng.gen_range(self.settings.work_range_ms.clone());
        thread::sleep(Duration::from_millis(work));
        if !self.hold_while_paused() {
            return Ok(CycleOutcome::Terminated);
        }

        // MARK_DONE
        if !self.mark_done(product)? {
            warn!(station = idx, %product, "Slot changed during processing, dropping cycle");
            return Ok(CycleOutcome::Abandoned(AbandonReason::OwnershipLost));
        }

        // WAIT_ACK
        self.ipc.ack(idx)?.wait()?;
        if !self.ipc.state().is_running() {
            return Ok(CycleOutcome::Terminated);
        }

        // TRANSFER
        if !self.transfer(product)? {
            warn!(station = idx, %product, "Slot changed before transfer, dropping cycle");
            return Ok(CycleOutcome::Abandoned(AbandonReason::OwnershipLost));
        }
        Ok(CycleOutcome::Completed(product))
    }

    /// Keep the consumed stage token while paused. Returns `false` once the
    /// line is stopping.
    fn hold_while_paused(&self) -> bool {
        let state = self.ipc.state();
        let mut announced = false;

        while state.is_running() && state.is_paused(self.index) {
            if !announced {
                info!(station = self.index, "⏸️ Station {} paused", self.index + 1);
                announced = true;
            }
            thread::sleep(self.settings.pause_poll);
        }

        let running = state.is_running();
        if announced && running {
            info!(station = self.index, "▶️ Station {} resumed", self.index + 1);
        }
        running
    }

    fn acquire(&self) -> IpcResult<Acquisition> {
        let state = self.ipc.state();
        let mut reason = AbandonReason::PredecessorEmpty;

        for attempt in 0..=self.settings.acquire_retries {
            if attempt > 0 {
                thread::sleep(self.settings.acquire_backoff);
            }
            if !state.is_running() {
                return Ok(Acquisition::Stopped);
            }

            let guard = self.ipc.lock()?;
            match self.try_acquire(&guard) {
                Ok(acquisition) => return Ok(acquisition),
                Err(r @ (AbandonReason::Paused | AbandonReason::IdsExhausted)) => {
                    return Ok(Acquisition::Abandoned(r));
                }
                Err(r) => reason = r,
            }
        }
        Ok(Acquisition::Abandoned(reason))
    }

    fn try_acquire(&self, guard: &TransitionGuard<'_>) -> Result<Acquisition, AbandonReason> {
        let state = self.ipc.state();
        let idx = self.index;

        match state.slot_state(idx) {
            SlotState::Holding => match state.product_in(idx) {
                Some(product) => return Ok(Acquisition::Resumed(product)),
                None => state.clear_slot(idx, guard),
            },
            SlotState::AwaitingPickup => return Err(AbandonReason::OwnSlotOccupied),
            SlotState::Empty => {}
        }

        if idx == 0 {
            // Checked under the mutex so a pause issued during the retry loop
            // stops the next allocation.
            if state.is_paused(0) {
                return Err(AbandonReason::Paused);
            }
            let product = state
                .allocate_product_id(guard)
                .ok_or(AbandonReason::IdsExhausted)?;
            state.hold(0, product, guard);
            return Ok(Acquisition::Acquired(product));
        }

        let prev = idx - 1;
        match (state.slot_state(prev), state.product_in(prev)) {
            (SlotState::AwaitingPickup, Some(product)) => {
                state.hold(idx, product, guard);
                state.clear_slot(prev, guard);
                Ok(Acquisition::Acquired(product))
            }
            _ => Err(AbandonReason::PredecessorEmpty),
        }
    }

    /// Re-post the wake that an abandoned cycle consumed, if a handoff is
    /// still pending. A spurious wake is simply dropped.
    fn rearm(&self, reason: AbandonReason) -> IpcResult<()> {
        match reason {
            AbandonReason::OwnSlotOccupied => {}
            AbandonReason::Paused => return self.post_or_park_feed(),
            AbandonReason::IdsExhausted => {
                error!(station = self.index, "Product ids exhausted, reset the line to continue");
                return Ok(());
            }
            AbandonReason::PredecessorEmpty | AbandonReason::OwnershipLost => return Ok(()),
        }

        thread::sleep(self.settings.acquire_backoff);
        if self.index == 0 {
            return self.feed();
        }
        if self.ipc.state().slot_state(self.index - 1) == SlotState::AwaitingPickup {
            self.ipc.stage(self.index)?.post()?;
        }
        Ok(())
    }

    fn mark_done(&self, product: ProductId) -> IpcResult<bool> {
        let state = self.ipc.state();
        let _guard = self.ipc.lock()?;

        let owned = state.product_in(self.index) == Some(product)
            && state.slot_state(self.index) == SlotState::Holding;
        if owned {
            state.mark_ready(self.index);
        }
        Ok(owned)
    }

    fn transfer(&self, product: ProductId) -> IpcResult<bool> {
        let state = self.ipc.state();
        let idx = self.index;

        let completed = {
            let guard = self.ipc.lock()?;
            if state.product_in(idx) != Some(product) {
                return Ok(false);
            }
            if idx == LAST_STATION {
                state.clear_slot(idx, &guard);
                Some(state.record_completion(&guard))
            } else {
                state.hand_off(idx, &guard);
                None
            }
        };

        match completed {
            Some(total) => {
                info!(station = idx, %product, total, "📦 Product {} left the line", product);
            }
            None => {
                self.ipc.stage(idx + 1)?.post()?;
                debug!(station = idx, %product, "Handed off to station {}", idx + 2);
                if !self.settings.settle.is_zero() {
                    thread::sleep(self.settings.settle);
                }
            }
        }

        if idx == 0 {
            self.feed()?;
        }
        Ok(true)
    }

    /// Station 0 self-feed. While paused the feed is parked instead, and
    /// `resume_station(0)` posts it.
    fn feed(&self) -> IpcResult<()> {
        let state = self.ipc.state();
        if !self.settings.feed_interval.is_zero() {
            thread::sleep(self.settings.feed_interval);
        }
        if !state.is_running() {
            return Ok(());
        }
        self.post_or_park_feed()
    }

    /// Post `stage[0]`, or park it while station 0 is paused. Exactly one of
    /// this worker and `resume_station(0)` posts a parked feed.
    fn post_or_park_feed(&self) -> IpcResult<()> {
        let state = self.ipc.state();
        if state.is_paused(0) {
            state.park_feed();
            // Either still paused, or a concurrent resume won the parked feed.
            if state.is_paused(0) || !state.unpark_feed() {
                debug!(station = 0, "Feed parked");
                return Ok(());
            }
        }
        self.ipc.stage(0)?.post()
    }
}
