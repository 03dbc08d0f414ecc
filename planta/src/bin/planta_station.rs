//! Station worker process. Spawned by the `planta` supervisor, one per
//! station.

use clap::Parser;
use planta::{LineResult, StationArgs, StationWorker};
use planta_common::config::LogLevel;
use planta_shared_memory::{IpcNames, LineIpc, init_tracing};
use tracing::error;

fn run(args: StationArgs) -> LineResult<u64> {
    let names = IpcNames::new(&args.namespace)?;
    let ipc = LineIpc::open(&names)?;
    let mut worker = StationWorker::new(args.station, ipc, args.settings(), args.seed)?;
    worker.run()
}

fn main() {
    let args = StationArgs::parse();
    let level = if args.verbose { LogLevel::Debug } else { LogLevel::Info };
    init_tracing(level, args.json);

    let station = args.station;
    if let Err(e) = run(args) {
        error!(station, "❌ Station {} failed: {}", station + 1, e);
        std::process::exit(1);
    }
}
