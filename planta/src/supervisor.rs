//! Pipeline supervisor.
//!
//! [`ProductionLine`] owns the shared line objects and the station worker
//! processes. It is the only party that creates or destroys IPC objects, and
//! the only writer of `running` and `station_paused`.
//!
//! Lifecycle:
//!
//! ```text
//! new ─► initialize / restore ─► start_all ─► (pause / resume)* ─► shutdown
//!                 ▲                                   │
//!                 └──────────── restart ◄─────────────┘
//! ```

use crate::error::{LineError, LineResult};
use crate::observer::Observer;
use crate::persistence::{LineSnapshot, StateStore, valid_in_flight};
use crate::station::StationArgs;
use chrono::Utc;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use planta_common::config::{LineConfig, LogLevel};
use planta_common::consts::{FIRST_PRODUCT_ID, NUM_STATIONS, STATION_BINARY};
use planta_common::product::InFlightProduct;
use planta_common::watchdog::{StationHealth, Watchdog, WatchdogError};
use planta_shared_memory::{IpcError, IpcNames, IpcResult, LineIpc, LineStats};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest wait for the transition mutex when taking a snapshot.
const SNAPSHOT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll period while reaping terminated workers.
const REAP_POLL: Duration = Duration::from_millis(20);

/// Station worker processes.
pub struct StationProcesses {
    binary: PathBuf,
    template: StationArgs,
    base_seed: u64,
    kill_timeout: Duration,
    children: Vec<Option<Child>>,
    reaped: Vec<StationHealth>,
}

impl StationProcesses {
    /// Process table for the line described by `config`.
    pub fn new(config: &LineConfig) -> Self {
        let binary = config
            .supervisor
            .station_binary
            .clone()
            .unwrap_or_else(default_station_binary);
        let base_seed = config.supervisor.seed.unwrap_or_else(rand::random);

        let mut template = StationArgs::new(0, &config.ipc.namespace, base_seed, &config.station);
        template.verbose = matches!(config.shared.log_level, LogLevel::Debug | LogLevel::Trace);
        template.json = config.shared.log_json;

        Self {
            binary,
            template,
            base_seed,
            kill_timeout: config.supervisor.kill_timeout(),
            children: (0..NUM_STATIONS).map(|_| None).collect(),
            reaped: vec![StationHealth::NotStarted; NUM_STATIONS],
        }
    }

    /// Command line for `station`. Seeds differ per station.
    pub fn args_for(&self, station: usize) -> StationArgs {
        let mut args = self.template.clone();
        args.station = station;
        args.seed = self.base_seed.wrapping_add(station as u64);
        args
    }

    /// True while any spawned worker has not been reaped.
    pub fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    /// PIDs of spawned, unreaped workers.
    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().flatten().map(Child::id).collect()
    }
}

impl Watchdog for StationProcesses {
    fn spawn_station(&mut self, station: usize) -> Result<u32, WatchdogError> {
        if station >= NUM_STATIONS {
            return Err(WatchdogError::UnknownStation { station });
        }
        if let Some(child) = self.children[station].as_mut() {
            if let Ok(None) = child.try_wait() {
                return Ok(child.id());
            }
        }

        let args = self.args_for(station);
        let child = Command::new(&self.binary)
            .args(args.to_args())
            .stdin(Stdio::null())
            // Own process group: a terminal Ctrl+C reaches only the supervisor.
            .process_group(0)
            .spawn()
            .map_err(|e| WatchdogError::SpawnFailed {
                station,
                reason: format!("{}: {e}", self.binary.display()),
            })?;

        let pid = child.id();
        self.children[station] = Some(child);
        self.reaped[station] = StationHealth::NotStarted;
        Ok(pid)
    }

    fn health_check(&mut self, station: usize) -> StationHealth {
        let Some(slot) = self.children.get_mut(station) else {
            return StationHealth::NotStarted;
        };

        if let Some(child) = slot.as_mut() {
            match child.try_wait() {
                Ok(None) => return StationHealth::Running { pid: child.id() },
                Ok(Some(status)) => {
                    self.reaped[station] = StationHealth::Exited {
                        exit_code: status.code(),
                    };
                }
                Err(e) => {
                    warn!(station, "Cannot probe station {}: {}", station + 1, e);
                    self.reaped[station] = StationHealth::Exited { exit_code: None };
                }
            }
            *slot = None;
        }
        self.reaped[station].clone()
    }

    fn shutdown_all(&mut self) -> Result<(), WatchdogError> {
        let mut first_error = None;

        for (station, slot) in self.children.iter_mut().enumerate() {
            let Some(child) = slot.as_mut() else { continue };
            if let Ok(None) = child.try_wait() {
                match kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                    Ok(()) | Err(nix::Error::ESRCH) => {}
                    Err(e) => warn!(station, "SIGTERM to station {} failed: {}", station + 1, e),
                }
            }
        }

        let deadline = Instant::now() + self.kill_timeout;
        loop {
            let mut pending = 0;
            for station in 0..NUM_STATIONS {
                let Some(child) = self.children[station].as_mut() else { continue };
                match child.try_wait() {
                    Ok(None) => {
                        pending += 1;
                        continue;
                    }
                    Ok(Some(status)) => {
                        debug!(station, ?status, "Station {} exited", station + 1);
                        self.reaped[station] = StationHealth::Exited {
                            exit_code: status.code(),
                        };
                    }
                    Err(e) => {
                        first_error.get_or_insert(WatchdogError::TerminateFailed {
                            station,
                            reason: e.to_string(),
                        });
                    }
                }
                self.children[station] = None;
            }
            if pending == 0 || Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_POLL);
        }

        for station in 0..NUM_STATIONS {
            let Some(mut child) = self.children[station].take() else { continue };
            warn!(
                station,
                pid = child.id(),
                "Station {} ignored SIGTERM, sending SIGKILL",
                station + 1
            );
            if let Err(e) = child.kill() {
                warn!(station, "SIGKILL to station {} failed: {}", station + 1, e);
            }
            match child.wait() {
                Ok(status) => {
                    self.reaped[station] = StationHealth::Exited {
                        exit_code: status.code(),
                    };
                }
                Err(e) => {
                    first_error.get_or_insert(WatchdogError::TerminateFailed {
                        station,
                        reason: e.to_string(),
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// `planta_station` next to the running executable, else looked up in `PATH`.
fn default_station_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(STATION_BINARY)))
        .unwrap_or_else(|| PathBuf::from(STATION_BINARY))
}

/// The production line: shared state, semaphores and station processes.
pub struct ProductionLine {
    config: LineConfig,
    names: IpcNames,
    ipc: Option<Arc<LineIpc>>,
    processes: StationProcesses,
}

impl ProductionLine {
    /// Line for `config`. Nothing is created until
    /// [`initialize`](Self::initialize) or [`restore`](Self::restore).
    pub fn new(config: LineConfig) -> LineResult<Self> {
        config.validate()?;
        let names = IpcNames::new(&config.ipc.namespace)?;
        let processes = StationProcesses::new(&config);

        Ok(Self {
            config,
            names,
            ipc: None,
            processes,
        })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    /// Shared object names.
    pub fn names(&self) -> &IpcNames {
        &self.names
    }

    /// True once shared state exists.
    pub fn is_initialized(&self) -> bool {
        self.ipc.is_some()
    }

    /// Shared line objects.
    pub fn ipc(&self) -> LineResult<&Arc<LineIpc>> {
        self.ipc.as_ref().ok_or(LineError::NotInitialized)
    }

    /// (Re)create shared state seeded with `next_product_id` and the
    /// products in `in_flight`, then wake the stations that must run.
    ///
    /// Each in-flight station is signalled once; station 0 is always
    /// signalled so production continues. Invalid or duplicate entries are
    /// dropped. On failure nothing is left behind.
    pub fn initialize(
        &mut self,
        next_product_id: u32,
        in_flight: &[InFlightProduct],
    ) -> LineResult<()> {
        self.seed(next_product_id, 0, in_flight)
    }

    /// [`initialize`](Self::initialize) from a persisted snapshot, including
    /// the completed counter.
    pub fn restore(&mut self, snapshot: &LineSnapshot) -> LineResult<()> {
        self.seed(
            snapshot.next_product_id,
            snapshot.total_completed,
            &snapshot.in_progress,
        )
    }

    fn seed(
        &mut self,
        next_product_id: u32,
        completed: u32,
        in_flight: &[InFlightProduct],
    ) -> LineResult<()> {
        if self.processes.has_children() {
            self.stop_all()?;
        }
        self.destroy();

        let in_flight = valid_in_flight(in_flight);
        match create_seeded(&self.names, next_product_id, completed, &in_flight) {
            Ok(ipc) => {
                info!(
                    "🔧 Line '{}' initialized: next product {}, {} completed, {} in flight",
                    self.names.namespace(),
                    ipc.state().next_product_id(),
                    completed,
                    in_flight.len()
                );
                self.ipc = Some(Arc::new(ipc));
                Ok(())
            }
            Err(e) => {
                LineIpc::destroy(&self.names);
                Err(e.into())
            }
        }
    }

    /// Spawn one worker per station.
    ///
    /// A spawn failure is logged and returned after every station has been
    /// attempted; workers already running keep running.
    pub fn start_all(&mut self) -> LineResult<()> {
        self.ipc()?;

        let mut first_error = None;
        let mut running = 0;
        for station in 0..NUM_STATIONS {
            match self.processes.spawn_station(station) {
                Ok(pid) => {
                    running += 1;
                    info!(station, pid, "🚀 Station {} running (pid {})", station + 1, pid);
                }
                Err(e) => {
                    error!(station, "{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => {
                warn!("Line degraded: {}/{} stations running", running, NUM_STATIONS);
                Err(e.into())
            }
        }
    }

    /// Two-phase stop: clear `running` and wake every wait point, give the
    /// workers a grace period, then SIGTERM (SIGKILL if ignored) and reap.
    pub fn stop_all(&mut self) -> LineResult<()> {
        if let Some(ipc) = &self.ipc {
            if let Err(e) = ipc.request_stop() {
                warn!("Cooperative stop incomplete: {}", e);
            }
        }
        if self.processes.has_children() {
            thread::sleep(self.config.supervisor.stop_grace());
            self.processes.shutdown_all()?;
            info!("🛑 All stations stopped");
        }
        Ok(())
    }

    /// Remove the shared segment and every semaphore. Safe to call at any
    /// time, including before `initialize`.
    pub fn destroy(&mut self) {
        self.ipc = None;
        LineIpc::destroy(&self.names);
    }

    /// Discard every product and start a fresh lot with ids from 1.
    pub fn restart(&mut self) -> LineResult<()> {
        info!("🔄 Resetting line '{}'", self.names.namespace());
        self.stop_all()?;
        self.destroy();
        self.initialize(FIRST_PRODUCT_ID, &[])?;
        self.start_all()
    }

    /// Soft-pause `station`.
    pub fn pause_station(&self, station: usize) -> LineResult<()> {
        let ipc = self.station_ipc(station)?;
        ipc.state().set_paused(station, true);
        info!(station, "⏸️ Pausing station {}", station + 1);
        Ok(())
    }

    /// Clear the pause flag of `station`. For station 0 this also releases a
    /// parked self-feed, so an idle line restarts.
    pub fn resume_station(&self, station: usize) -> LineResult<()> {
        let ipc = self.station_ipc(station)?;
        let state = ipc.state();
        state.set_paused(station, false);
        if station == 0 && state.unpark_feed() {
            ipc.stage(0)?.post()?;
            debug!(station, "Released parked feed");
        }
        info!(station, "▶️ Resuming station {}", station + 1);
        Ok(())
    }

    /// Pause every station (pre-shutdown quiesce).
    pub fn pause_all(&self) -> LineResult<()> {
        let ipc = self.ipc()?;
        for station in 0..NUM_STATIONS {
            ipc.state().set_paused(station, true);
        }
        info!("⏸️ All stations paused");
        Ok(())
    }

    /// Consistent read of the id counter, completed counter and slots.
    ///
    /// Taken under the transition mutex; if it cannot be acquired in time
    /// (a worker died holding it) an unlocked read is returned instead.
    pub fn snapshot(&self) -> LineResult<LineSnapshot> {
        let ipc = self.ipc()?;
        let state = ipc.state();

        let guard = match ipc.lock_timeout(SNAPSHOT_LOCK_TIMEOUT) {
            Ok(guard) => Some(guard),
            Err(IpcError::Timeout { .. }) => {
                warn!("Transition mutex busy, taking an unlocked snapshot");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let in_progress = (0..NUM_STATIONS)
            .filter_map(|i| state.product_in(i).map(|p| InFlightProduct::new(p, i)))
            .collect();
        let snapshot = LineSnapshot {
            total_completed: state.completed_count(),
            next_product_id: state.next_product_id(),
            in_progress,
            last_closed: Some(Utc::now()),
        };
        drop(guard);

        Ok(snapshot)
    }

    /// Ordered shutdown: pause all, quiesce, snapshot and save, stop all,
    /// destroy. A persistence failure is logged and does not stop the
    /// sequence; it is returned once the line is down.
    pub fn shutdown(&mut self, store: &StateStore) -> LineResult<()> {
        info!("🛑 Shutting down line '{}'", self.names.namespace());

        let mut saved = Ok(());
        if self.is_initialized() {
            self.pause_all()?;
            thread::sleep(self.config.supervisor.quiesce());
            saved = self
                .snapshot()
                .and_then(|snapshot| store.save(&snapshot).map_err(LineError::from));
            if let Err(e) = &saved {
                error!("Line state not saved: {}", e);
            }
        }

        let stopped = self.stop_all();
        self.destroy();
        info!("🏁 Line shutdown complete");
        stopped.and(saved)
    }

    /// Read-only counters and occupancy.
    pub fn stats(&self) -> LineResult<LineStats> {
        Ok(self.ipc()?.state().stats())
    }

    /// Health of every station process.
    pub fn health(&mut self) -> Vec<StationHealth> {
        (0..NUM_STATIONS)
            .map(|station| self.processes.health_check(station))
            .collect()
    }

    /// PIDs of spawned, unreaped workers.
    pub fn station_pids(&self) -> Vec<u32> {
        self.processes.pids()
    }

    /// Observer bound to the current shared state. A restart creates new
    /// state, so observers must be re-fetched after it.
    pub fn observer(&self) -> LineResult<Observer> {
        Ok(Observer::new(Arc::clone(self.ipc()?)))
    }

    fn station_ipc(&self, station: usize) -> LineResult<&Arc<LineIpc>> {
        if station >= NUM_STATIONS {
            return Err(LineError::StationOutOfRange { index: station });
        }
        self.ipc()
    }
}

/// Create fresh line objects, seed them and post the initial wakes.
fn create_seeded(
    names: &IpcNames,
    next_product_id: u32,
    completed: u32,
    in_flight: &[InFlightProduct],
) -> IpcResult<LineIpc> {
    let ipc = LineIpc::create(names)?;
    let state = ipc.state();
    let mut wake = [false; NUM_STATIONS];

    {
        let guard = ipc.lock()?;
        // Never hand out an id that is still on the line.
        let floor = in_flight
            .iter()
            .map(|p| p.product_id.saturating_add(1))
            .max()
            .unwrap_or(FIRST_PRODUCT_ID);
        state.seed_next_product_id(next_product_id.max(floor), &guard);
        state.seed_completed_count(completed, &guard);

        for entry in in_flight {
            if let Some(product) = entry.product() {
                state.hold(entry.station_index, product, &guard);
                wake[entry.station_index] = true;
                info!(
                    station = entry.station_index,
                    %product,
                    "Restored product {} at station {}",
                    product,
                    entry.station_index + 1
                );
            }
        }
    }

    state.set_running(true);
    wake[0] = true;
    for (station, _) in wake.iter().enumerate().filter(|(_, wake)| **wake) {
        ipc.stage(station)?.post()?;
    }
    Ok(ipc)
}

impl Drop for ProductionLine {
    fn drop(&mut self) {
        if self.ipc.is_none() && !self.processes.has_children() {
            return;
        }
        if let Err(e) = self.stop_all() {
            warn!("Stop during drop failed: {}", e);
        }
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planta_common::product::ProductId;
    use planta_shared_memory::platform::current_pid;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(tag: &str) -> LineConfig {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        let mut config = LineConfig::default();
        config.ipc.namespace = format!("plt_sup_{}_{id}_{tag}", current_pid());
        config.supervisor.station_binary = Some(PathBuf::from("/nonexistent/planta_station"));
        config.supervisor.seed = Some(100);
        config
    }

    #[test]
    fn test_operations_need_initialize() {
        let line = ProductionLine::new(test_config("uninit")).unwrap();
        assert!(matches!(line.pause_station(0), Err(LineError::NotInitialized)));
        assert!(matches!(line.snapshot(), Err(LineError::NotInitialized)));
        assert!(matches!(line.observer(), Err(LineError::NotInitialized)));
    }

    #[test]
    fn test_per_station_seeds_and_args() {
        let config = test_config("seeds");
        let processes = StationProcesses::new(&config);
        let a = processes.args_for(0);
        let b = processes.args_for(3);
        assert_eq!((a.seed, b.seed), (100, 103));
        assert_eq!(b.station, 3);
        assert_eq!(b.namespace, config.ipc.namespace);
    }

    #[test]
    fn test_spawn_failure_is_reported_not_fatal() {
        let mut line = ProductionLine::new(test_config("spawn")).unwrap();
        line.initialize(FIRST_PRODUCT_ID, &[]).unwrap();

        assert!(matches!(
            line.start_all(),
            Err(LineError::Watchdog(WatchdogError::SpawnFailed { .. }))
        ));
        assert!(line.health().iter().all(|h| *h == StationHealth::NotStarted));
        assert!(line.is_initialized());
        line.destroy();
    }

    #[test]
    fn test_resume_station_zero_posts_only_when_parked() {
        let mut line = ProductionLine::new(test_config("resume")).unwrap();
        line.initialize(FIRST_PRODUCT_ID, &[]).unwrap();
        let ipc = Arc::clone(line.ipc().unwrap());
        ipc.stage(0).unwrap().wait().unwrap();

        line.pause_station(0).unwrap();
        line.resume_station(0).unwrap();
        assert_eq!(ipc.stage(0).unwrap().value().unwrap(), 0);

        line.pause_station(0).unwrap();
        ipc.state().park_feed();
        line.resume_station(0).unwrap();
        assert_eq!(ipc.stage(0).unwrap().value().unwrap(), 1);
        assert!(!ipc.state().is_paused(0));

        assert!(matches!(
            line.resume_station(NUM_STATIONS),
            Err(LineError::StationOutOfRange { .. })
        ));
        line.destroy();
    }

    #[test]
    fn test_next_id_never_collides_with_in_flight() {
        let mut line = ProductionLine::new(test_config("floor")).unwrap();
        line.initialize(3, &[InFlightProduct::new(ProductId::new(8).unwrap(), 1)])
            .unwrap();
        assert_eq!(line.stats().unwrap().next_product_id, 9);
        line.destroy();
    }

    #[test]
    fn test_shutdown_reports_save_failure_after_cleanup() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "").unwrap();
        let store = StateStore::new(blocker.join("state.json"));

        let mut line = ProductionLine::new(test_config("save_fail")).unwrap();
        line.initialize(FIRST_PRODUCT_ID, &[]).unwrap();
        let segment = planta_shared_memory::platform::segment_path(&line.names().segment());

        assert!(matches!(
            line.shutdown(&store),
            Err(LineError::Persistence(_))
        ));
        assert!(!line.is_initialized());
        assert!(!segment.exists());
    }

    #[test]
    fn test_destroy_and_drop_are_safe_uninitialized() {
        let mut line = ProductionLine::new(test_config("drop")).unwrap();
        line.destroy();
        line.destroy();
        drop(line);
    }
}
