//! Shared line state layout.
//!
//! One `LineState` lives at offset 0 of the line segment and is mapped by the
//! supervisor, every station worker and the observer. All fields are atomics
//! so the struct is only ever accessed through `&LineState`.
//!
//! ## Field ownership
//!
//! | Field                 | Written by                          | Discipline          |
//! |-----------------------|-------------------------------------|---------------------|
//! | `running`             | supervisor (true→false once)        | flag + wake posts   |
//! | `next_product_id`     | station 0 (ACQUIRE), supervisor seed| transition mutex    |
//! | `completed_count`     | last station (TRANSFER), seed       | transition mutex    |
//! | `product_in_station`  | owning station / successor          | transition mutex    |
//! | `slot_state`          | same as `product_in_station`        | transition mutex    |
//! | `station_paused[i]`   | supervisor                          | single writer       |
//! | `feed_parked`         | station 0 / `resume_station(0)`     | compare-exchange    |
//! | `station_done[i]`     | worker i (→Ready), observer (→Claimed→Idle) | compare-exchange |
//!
//! Mutators of mutex-guarded fields take a `&TransitionGuard` so they cannot
//! be called without holding the transition semaphore.

use crate::error::{IpcError, IpcResult};
use crate::ipc::TransitionGuard;
use planta_common::consts::{FIRST_PRODUCT_ID, NUM_STATIONS};
use planta_common::product::ProductId;
use static_assertions::const_assert;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Magic number identifying a line state segment: `"PLNTLINE"`.
pub const LINE_STATE_MAGIC: u64 = u64::from_le_bytes(*b"PLNTLINE");

/// Mapped size of the line segment (one page).
pub const SEGMENT_SIZE: usize = 4096;

/// Completion handshake between a station and the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompletionState {
    /// Nothing to pick up.
    Idle = 0,
    /// Worker finished processing; the observer may claim it.
    ReadyForPickup = 1,
    /// Observer claimed it and is performing its external action.
    Claimed = 2,
}

impl CompletionState {
    /// Decode a raw value. Unknown values read as `Idle`.
    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::ReadyForPickup,
            2 => Self::Claimed,
            _ => Self::Idle,
        }
    }
}

/// Ownership state of one station slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    /// No product.
    Empty = 0,
    /// The station owns the product and is processing it (or will resume it).
    Holding = 1,
    /// The station finished and handed off; waiting for the successor.
    AwaitingPickup = 2,
}

impl SlotState {
    /// Decode a raw value. Unknown values read as `Empty`.
    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Holding,
            2 => Self::AwaitingPickup,
            _ => Self::Empty,
        }
    }
}

/// Shared state of the whole line.
#[repr(C, align(64))]
pub struct LineState {
    magic: AtomicU64,
    layout_hash: AtomicU32,
    station_count: AtomicU32,
    running: AtomicU32,
    next_product_id: AtomicU32,
    completed_count: AtomicU32,
    feed_parked: AtomicU32,
    station_paused: [AtomicU32; NUM_STATIONS],
    station_done: [AtomicU32; NUM_STATIONS],
    slot_state: [AtomicU32; NUM_STATIONS],
    product_in_station: [AtomicU32; NUM_STATIONS],
}

const_assert!(core::mem::size_of::<LineState>() <= SEGMENT_SIZE);

/// Hash of the layout this build expects.
///
/// Mixes size, alignment and station count so that a worker built with a
/// different topology refuses to attach.
pub const fn layout_hash() -> u32 {
    let size = core::mem::size_of::<LineState>() as u32;
    let align = core::mem::align_of::<LineState>() as u32;
    size.wrapping_mul(0x9E3779B9)
        ^ align.wrapping_mul(0x517CC1B7)
        ^ (NUM_STATIONS as u32).wrapping_mul(0x85EBCA6B)
}

impl LineState {
    /// Write the header and reset every field.
    ///
    /// Called once by the creator before any other process can open the
    /// segment.
    pub(crate) fn format(&self) {
        self.running.store(0, Ordering::Relaxed);
        self.next_product_id
            .store(FIRST_PRODUCT_ID, Ordering::Relaxed);
        self.completed_count.store(0, Ordering::Relaxed);
        self.feed_parked.store(0, Ordering::Relaxed);
        for i in 0..NUM_STATIONS {
            self.station_paused[i].store(0, Ordering::Relaxed);
            self.station_done[i].store(CompletionState::Idle as u32, Ordering::Relaxed);
            self.slot_state[i].store(SlotState::Empty as u32, Ordering::Relaxed);
            self.product_in_station[i].store(0, Ordering::Relaxed);
        }
        self.station_count
            .store(NUM_STATIONS as u32, Ordering::Relaxed);
        self.layout_hash.store(layout_hash(), Ordering::Relaxed);
        // Magic last: a reader seeing it sees the rest.
        self.magic.store(LINE_STATE_MAGIC, Ordering::Release);
    }

    /// Check the header written by [`format`](Self::format).
    pub fn validate(&self, name: &str) -> IpcResult<()> {
        let mismatch = |reason: String| IpcError::LayoutMismatch {
            name: name.to_string(),
            reason,
        };

        let magic = self.magic.load(Ordering::Acquire);
        if magic != LINE_STATE_MAGIC {
            return Err(mismatch(format!("bad magic {magic:#018x}")));
        }
        let hash = self.layout_hash.load(Ordering::Relaxed);
        if hash != layout_hash() {
            return Err(mismatch(format!(
                "layout hash {hash:#010x}, expected {:#010x}",
                layout_hash()
            )));
        }
        let count = self.station_count.load(Ordering::Relaxed);
        if count as usize != NUM_STATIONS {
            return Err(mismatch(format!(
                "{count} stations, expected {NUM_STATIONS}"
            )));
        }
        Ok(())
    }

    // ─── Run flag ───────────────────────────────────────────────────

    /// Global kill switch.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) != 0
    }

    /// Set the kill switch. Only the supervisor calls this.
    #[inline]
    pub fn set_running(&self, running: bool) {
        self.running.store(running as u32, Ordering::SeqCst);
    }

    // ─── Product ids ────────────────────────────────────────────────

    /// Id the next product will receive.
    #[inline]
    pub fn next_product_id(&self) -> u32 {
        self.next_product_id.load(Ordering::Acquire)
    }

    /// Seed the id counter. Never lowers it.
    pub fn seed_next_product_id(&self, next: u32, _guard: &TransitionGuard<'_>) {
        let next = next.max(FIRST_PRODUCT_ID);
        self.next_product_id.fetch_max(next, Ordering::AcqRel);
    }

    /// Allocate a fresh product id (station 0, ACQUIRE).
    ///
    /// Returns `None` once the counter has reached `u32::MAX`; the counter
    /// is left unchanged so no id is ever handed out twice.
    pub fn allocate_product_id(&self, _guard: &TransitionGuard<'_>) -> Option<ProductId> {
        let raw = self.next_product_id.load(Ordering::Acquire).max(FIRST_PRODUCT_ID);
        let next = raw.checked_add(1)?;
        self.next_product_id.store(next, Ordering::Release);
        ProductId::new(raw)
    }

    /// Products that left the line.
    #[inline]
    pub fn completed_count(&self) -> u32 {
        self.completed_count.load(Ordering::Acquire)
    }

    /// Seed the completed counter from a snapshot.
    pub fn seed_completed_count(&self, completed: u32, _guard: &TransitionGuard<'_>) {
        self.completed_count.store(completed, Ordering::Release);
    }

    /// Count one product leaving the line (last station, TRANSFER).
    pub fn record_completion(&self, _guard: &TransitionGuard<'_>) -> u32 {
        self.completed_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    // ─── Slots ──────────────────────────────────────────────────────

    /// Product currently held by `station`.
    ///
    /// # Panics
    /// Panics if `station >= NUM_STATIONS`.
    #[inline]
    pub fn product_in(&self, station: usize) -> Option<ProductId> {
        ProductId::new(self.product_in_station[station].load(Ordering::Acquire))
    }

    /// Ownership state of `station`'s slot.
    #[inline]
    pub fn slot_state(&self, station: usize) -> SlotState {
        SlotState::from_u32(self.slot_state[station].load(Ordering::Acquire))
    }

    /// Put `product` into `station`'s slot as owned and in progress.
    pub fn hold(&self, station: usize, product: ProductId, _guard: &TransitionGuard<'_>) {
        self.product_in_station[station].store(product.get(), Ordering::Release);
        self.slot_state[station].store(SlotState::Holding as u32, Ordering::Release);
    }

    /// Mark `station`'s product as handed off to the successor.
    pub fn hand_off(&self, station: usize, _guard: &TransitionGuard<'_>) {
        self.slot_state[station].store(SlotState::AwaitingPickup as u32, Ordering::Release);
    }

    /// Empty `station`'s slot.
    pub fn clear_slot(&self, station: usize, _guard: &TransitionGuard<'_>) {
        self.product_in_station[station].store(0, Ordering::Release);
        self.slot_state[station].store(SlotState::Empty as u32, Ordering::Release);
    }

    /// Every slot, in station order.
    pub fn occupancy(&self) -> [Option<ProductId>; NUM_STATIONS] {
        std::array::from_fn(|i| self.product_in(i))
    }

    // ─── Pause ──────────────────────────────────────────────────────

    /// Soft-pause flag of `station`.
    #[inline]
    pub fn is_paused(&self, station: usize) -> bool {
        self.station_paused[station].load(Ordering::SeqCst) != 0
    }

    /// Set the soft-pause flag. Only the supervisor calls this.
    #[inline]
    pub fn set_paused(&self, station: usize, paused: bool) {
        self.station_paused[station].store(paused as u32, Ordering::SeqCst);
    }

    /// Record that station 0 skipped its self-feed because it is paused.
    #[inline]
    pub fn park_feed(&self) {
        self.feed_parked.store(1, Ordering::SeqCst);
    }

    /// Claim a parked feed. Exactly one caller wins and must post `stage[0]`.
    #[inline]
    pub fn unpark_feed(&self) -> bool {
        self.feed_parked
            .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// True while station 0's self-feed is parked.
    #[inline]
    pub fn is_feed_parked(&self) -> bool {
        self.feed_parked.load(Ordering::SeqCst) != 0
    }

    // ─── Completion handshake ───────────────────────────────────────

    /// Completion flag of `station`.
    #[inline]
    pub fn completion(&self, station: usize) -> CompletionState {
        CompletionState::from_u32(self.station_done[station].load(Ordering::Acquire))
    }

    /// Worker side: processing finished, ready for the observer.
    #[inline]
    pub fn mark_ready(&self, station: usize) {
        self.station_done[station].store(CompletionState::ReadyForPickup as u32, Ordering::Release);
    }

    /// Observer side: claim a ready completion. `false` if there was none or
    /// it was already claimed.
    #[inline]
    pub fn claim(&self, station: usize) -> bool {
        self.station_done[station]
            .compare_exchange(
                CompletionState::ReadyForPickup as u32,
                CompletionState::Claimed as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Observer side: release a claimed completion back to idle.
    #[inline]
    pub fn release(&self, station: usize) -> bool {
        self.station_done[station]
            .compare_exchange(
                CompletionState::Claimed as u32,
                CompletionState::Idle as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // ─── Reporting ──────────────────────────────────────────────────

    /// Read-only summary. Fields are loaded independently.
    pub fn stats(&self) -> LineStats {
        LineStats {
            running: self.is_running(),
            next_product_id: self.next_product_id(),
            completed: self.completed_count(),
            occupancy: self.occupancy(),
            paused: std::array::from_fn(|i| self.is_paused(i)),
        }
    }
}

/// Point-in-time view of the line for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineStats {
    /// Kill switch.
    pub running: bool,
    /// Next id station 0 will allocate.
    pub next_product_id: u32,
    /// Products that left the line.
    pub completed: u32,
    /// Product per station.
    pub occupancy: [Option<ProductId>; NUM_STATIONS],
    /// Pause flag per station.
    pub paused: [bool; NUM_STATIONS],
}

impl LineStats {
    /// Products ever allocated (`next_product_id - 1`).
    pub fn created(&self) -> u32 {
        self.next_product_id.saturating_sub(FIRST_PRODUCT_ID)
    }

    /// Products currently inside a station.
    pub fn in_progress(&self) -> usize {
        self.occupancy.iter().flatten().count()
    }
}

impl std::fmt::Display for LineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "in progress {}/{} | completed {} | created {} | slots [",
            self.in_progress(),
            NUM_STATIONS,
            self.completed,
            self.created(),
        )?;
        for (i, slot) in self.occupancy.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match slot {
                Some(id) => write!(f, "{id}")?,
                None => write!(f, "-")?,
            }
            if self.paused[i] {
                write!(f, "(p)")?;
            }
        }
        write!(f, "]")
    }
}
