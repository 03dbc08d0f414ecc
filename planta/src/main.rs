//! # Planta Supervisor
//!
//! Restores the line from the state file, spawns the station workers and
//! acts as the completion observer until Ctrl+C, SIGTERM or `quit`.

use clap::Parser;
use parking_lot::Mutex;
use planta::command::HELP;
use planta::{LineCommand, LineResult, LineSnapshot, Observer, ProductionLine, StateStore};
use planta_common::config::{ConfigError, ConfigLoader, LineConfig, LogLevel};
use planta_common::consts::DEFAULT_CONFIG_PATH;
use planta_shared_memory::init_tracing;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "planta", version, about = "Five-station production line supervisor")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the IPC namespace.
    #[arg(long)]
    namespace: Option<String>,

    /// Override the state file.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Ignore the state file and start a fresh lot.
    #[arg(long)]
    fresh: bool,

    /// Debug logging for the supervisor and every station.
    #[arg(short, long)]
    verbose: bool,

    /// JSON log lines.
    #[arg(long)]
    json: bool,
}

type SharedLine = Arc<Mutex<ProductionLine>>;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logging comes up before config errors are reported.
    let loaded = LineConfig::load(&args.config);
    let (level, json) = loaded
        .as_ref()
        .map(|c| (c.shared.log_level, c.shared.log_json))
        .unwrap_or((LogLevel::default(), false));
    init_tracing(
        if args.verbose { LogLevel::Debug } else { level },
        args.json || json,
    );

    if let Err(e) = run(args, loaded).await {
        error!("❌ Supervisor failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(
    args: Args,
    loaded: Result<LineConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match loaded {
        Ok(config) => {
            info!("📄 Loaded configuration from {}", args.config.display());
            config
        }
        Err(ConfigError::FileNotFound) => {
            warn!(
                "No configuration at {}, using defaults",
                args.config.display()
            );
            LineConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(namespace) = args.namespace {
        config.ipc.namespace = namespace;
    }
    if let Some(state_file) = args.state_file {
        config.persistence.state_file = state_file;
    }
    if args.verbose {
        config.shared.log_level = LogLevel::Debug;
    }
    config.shared.log_json |= args.json;
    config.validate()?;

    info!(
        "🚀 Starting {} on namespace '{}'",
        config.shared.service_name, config.ipc.namespace
    );

    let store = StateStore::new(&config.persistence.state_file);
    let snapshot = if args.fresh {
        info!("Fresh start requested, ignoring {}", store.path().display());
        LineSnapshot::cold()
    } else {
        store.load()
    };

    let observer_config = config.observer.clone();
    let mut line = ProductionLine::new(config)?;
    line.restore(&snapshot)?;
    line.start_all()?;
    info!("✅ Line running");

    let line: SharedLine = Arc::new(Mutex::new(line));
    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel();
    spawn_console(Arc::clone(&line), quit_tx)?;

    let mut poll = interval(observer_config.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = interval(observer_config.report_interval());
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    report.tick().await;

    let mut terminate = signal(SignalKind::terminate())?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = poll.tick() => observe(&line, observer_config.action()),
            _ = report.tick() => report_status(&line),
            Some(()) = quit_rx.recv() => {
                info!("🛑 Quit requested from console");
                break;
            }
            _ = terminate.recv() => {
                info!("🛑 Received SIGTERM");
                break;
            }
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("🛑 Received shutdown signal (Ctrl+C)"),
                    Err(e) => error!("Unable to listen for shutdown signal: {}", e),
                }
                break;
            }
        }
    }

    tokio::task::block_in_place(|| line.lock().shutdown(&store))?;
    Ok(())
}

/// Claim ready completions and schedule their acknowledgement after the
/// simulated external action.
fn observe(line: &SharedLine, action: Duration) {
    // A console command holds the line; skip this tick.
    let Some(guard) = line.try_lock() else { return };
    let Ok(observer) = guard.observer() else { return };
    drop(guard);

    for completion in observer.claim_ready() {
        match (completion.is_final(), completion.product) {
            (true, Some(product)) => info!("📦 Product {} finished, releasing", product),
            (_, Some(product)) => debug!(
                station = completion.station,
                "Station {} done with product {}",
                completion.station + 1,
                product
            ),
            (_, None) => debug!(
                station = completion.station,
                "Station {} done with an empty slot",
                completion.station + 1
            ),
        }
        tokio::spawn(acknowledge_after(observer.clone(), completion.station, action));
    }
}

async fn acknowledge_after(observer: Observer, station: usize, action: Duration) {
    sleep(action).await;
    if let Err(e) = observer.acknowledge(station) {
        warn!(station, "Acknowledge for station {} failed: {}", station + 1, e);
    }
}

fn report_status(line: &SharedLine) {
    let Some(mut line) = line.try_lock() else { return };
    match line.stats() {
        Ok(stats) => info!("📊 {}", stats),
        Err(e) => warn!("No line stats: {}", e),
    }
    for (station, health) in line.health().into_iter().enumerate() {
        if !health.is_running() {
            warn!(station, ?health, "Station {} is not running", station + 1);
        }
    }
}

/// Read operator commands from stdin on a plain thread. Blocking reads never
/// hold up the runtime, and the thread dies with the process.
fn spawn_console(line: SharedLine, quit: mpsc::UnboundedSender<()>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            info!("⌨️ {}", HELP);
            for input in std::io::stdin().lock().lines() {
                let input = match input {
                    Ok(input) if input.trim().is_empty() => continue,
                    Ok(input) => input,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                match input.parse::<LineCommand>() {
                    Ok(LineCommand::Quit) => {
                        let _ = quit.send(());
                        break;
                    }
                    Ok(command) => {
                        if let Err(e) = execute(&mut line.lock(), command) {
                            error!("Command '{}' failed: {}", input.trim(), e);
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            debug!("Console closed");
        })?;
    Ok(())
}

fn execute(line: &mut ProductionLine, command: LineCommand) -> LineResult<()> {
    match command {
        LineCommand::Pause(station) => line.pause_station(station),
        LineCommand::Resume(station) => line.resume_station(station),
        LineCommand::PauseAll => line.pause_all(),
        LineCommand::Reset => line.restart(),
        LineCommand::Status => {
            info!("📊 {}", line.stats()?);
            for (station, health) in line.health().into_iter().enumerate() {
                info!(station, "Station {}: {:?}", station + 1, health);
            }
            Ok(())
        }
        LineCommand::Help => {
            info!("{}", HELP);
            Ok(())
        }
        LineCommand::Quit => Ok(()),
    }
}
