//! Shared helpers for line integration tests.
#![allow(dead_code)]

use planta::{Completion, LineResult, Observer, ProductionLine, StationSettings, StationWorker};
use planta_common::config::LineConfig;
use planta_common::consts::NUM_STATIONS;
use planta_common::product::ProductId;
use planta_shared_memory::LineIpc;
use planta_shared_memory::platform::current_pid;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Fast timings and a namespace unique to this test.
pub fn test_config(tag: &str) -> LineConfig {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut config = LineConfig::default();
    config.ipc.namespace = format!("plt_it_{}_{id}_{tag}", current_pid());
    config.station.work_min_ms = 2;
    config.station.work_max_ms = 6;
    config.station.acquire_backoff_ms = 1;
    config.station.pause_poll_ms = 5;
    config.supervisor.station_binary = Some(PathBuf::from(env!("CARGO_BIN_EXE_planta_station")));
    config.supervisor.seed = Some(7);
    config.supervisor.stop_grace_ms = 50;
    config.supervisor.quiesce_ms = 20;
    config
}

/// Run every station as a thread of this process, each with its own
/// handle on the shared line.
pub fn spawn_worker_threads(line: &ProductionLine) -> Vec<JoinHandle<LineResult<u64>>> {
    let settings = StationSettings::from(&line.config().station);
    (0..NUM_STATIONS)
        .map(|station| {
            let names = line.names().clone();
            let settings = settings.clone();
            thread::spawn(move || -> LineResult<u64> {
                let ipc = LineIpc::open(&names)?;
                StationWorker::new(station, ipc, settings, station as u64)?.run()
            })
        })
        .collect()
}

/// Stop the line and check every worker thread ended cleanly.
pub fn stop_worker_threads(line: &mut ProductionLine, workers: Vec<JoinHandle<LineResult<u64>>>) {
    line.stop_all().unwrap();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }
}

/// Claim and immediately acknowledge every ready completion.
pub fn pump(observer: &Observer, log: &mut Vec<Completion>) {
    for completion in observer.claim_ready() {
        assert!(observer.acknowledge(completion.station).unwrap());
        log.push(completion);
    }
}

/// Pump until `done` holds or `timeout` passes. Returns whether `done` held.
pub fn pump_until(
    observer: &Observer,
    log: &mut Vec<Completion>,
    timeout: Duration,
    mut done: impl FnMut(&[Completion]) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        pump(observer, log);
        if done(log) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Pump for a fixed time.
pub fn pump_for(observer: &Observer, log: &mut Vec<Completion>, duration: Duration) {
    pump_until(observer, log, duration, |_| false);
}

/// Products that left the line, in order.
pub fn finished(log: &[Completion]) -> Vec<u32> {
    log.iter()
        .filter(|c| c.is_final())
        .filter_map(|c| c.product.map(ProductId::get))
        .collect()
}

/// Panics if two stations hold the same product. Sampled under the
/// transition mutex.
pub fn assert_unique_occupancy(ipc: &LineIpc) {
    let guard = ipc.lock().unwrap();
    let ids: Vec<_> = (0..NUM_STATIONS)
        .filter_map(|i| ipc.state().product_in(i))
        .collect();
    drop(guard);

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "product on two stations: {ids:?}");
}

/// Current value of every stage semaphore.
pub fn stage_values(ipc: &LineIpc) -> Vec<i32> {
    (0..NUM_STATIONS)
        .map(|i| ipc.stage(i).unwrap().value().unwrap())
        .collect()
}
