//! End-to-end tests with real `planta_station` worker processes.

mod common;

use common::*;
use planta::{LineSnapshot, ProductionLine, StateStore};
use planta_common::consts::NUM_STATIONS;
use planta_common::watchdog::StationHealth;
use planta_shared_memory::platform::{is_process_alive, segment_path};
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn test_line_runs_and_shuts_down_cleanly() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    let mut line = ProductionLine::new(test_config("e2e")).unwrap();
    let segment = segment_path(&line.names().segment());

    line.restore(&store.load()).unwrap();
    line.start_all().unwrap();
    let pids = line.station_pids();
    assert_eq!(pids.len(), NUM_STATIONS);
    assert!(line.health().iter().all(StationHealth::is_running));

    let observer = line.observer().unwrap();
    let mut log = Vec::new();
    assert!(pump_until(&observer, &mut log, TIMEOUT, |log| {
        finished(log).len() >= 3
    }));

    line.shutdown(&store).unwrap();

    assert!(!line.is_initialized());
    assert!(line.station_pids().is_empty());
    assert!(pids.iter().all(|&pid| !is_process_alive(pid)));
    assert!(!segment.exists());

    let saved = store.load();
    assert!(saved.total_completed >= 3);
    assert!(saved.next_product_id > saved.total_completed);
}

#[test]
fn test_restart_starts_a_fresh_lot() {
    let mut line = ProductionLine::new(test_config("reset")).unwrap();
    line.restore(&LineSnapshot {
        total_completed: 40,
        next_product_id: 50,
        ..LineSnapshot::cold()
    })
    .unwrap();
    line.start_all().unwrap();

    let observer = line.observer().unwrap();
    let mut log = Vec::new();
    assert!(pump_until(&observer, &mut log, TIMEOUT, |log| {
        !finished(log).is_empty()
    }));
    assert_eq!(finished(&log)[0], 50);
    let old_pids = line.station_pids();

    line.restart().unwrap();
    let stats = line.stats().unwrap();
    assert_eq!(stats.completed, 0);
    assert!(stats.next_product_id <= 2);
    assert!(old_pids.iter().all(|&pid| !is_process_alive(pid)));

    // Shared state was recreated: fetch a new observer.
    let observer = line.observer().unwrap();
    let mut log = Vec::new();
    assert!(pump_until(&observer, &mut log, TIMEOUT, |log| {
        !finished(log).is_empty()
    }));
    assert_eq!(finished(&log)[0], 1);

    line.stop_all().unwrap();
    line.destroy();
}

#[test]
fn test_killed_station_is_reported() {
    let mut line = ProductionLine::new(test_config("health")).unwrap();
    line.restore(&LineSnapshot::cold()).unwrap();
    line.start_all().unwrap();

    let pid = line.station_pids()[3];
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();

    let deadline = std::time::Instant::now() + TIMEOUT;
    let mut health = line.health();
    while health[3].is_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        health = line.health();
    }
    assert_eq!(health[3], StationHealth::Exited { exit_code: None });
    assert!(health[0].is_running());

    line.stop_all().unwrap();
    line.destroy();
}
