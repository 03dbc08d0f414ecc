//! Operator console commands.
//!
//! Station numbers are 1-based on the console and converted to zero-based
//! indices when parsed.

use planta_common::consts::NUM_STATIONS;
use std::str::FromStr;
use thiserror::Error;

/// One operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCommand {
    /// Pause one station (zero-based index).
    Pause(usize),
    /// Resume one station (zero-based index).
    Resume(usize),
    /// Pause every station.
    PauseAll,
    /// Discard every product and start a fresh lot.
    Reset,
    /// Log counters and station health.
    Status,
    /// List the commands.
    Help,
    /// Save state and exit.
    Quit,
}

/// Console input that is not a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Blank line.
    #[error("empty command")]
    Empty,

    /// Unrecognized verb.
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    /// `pause`/`resume` without a station number.
    #[error("'{0}' needs a station number 1-{max}", max = NUM_STATIONS)]
    MissingStation(&'static str),

    /// Station number not on the line.
    #[error("invalid station '{0}', expected 1-{max}", max = NUM_STATIONS)]
    InvalidStation(String),
}

/// Console help text.
pub const HELP: &str = "commands: pause <n> | resume <n> | pause-all | reset | status | help | quit";

impl FromStr for LineCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();

        match verb.as_str() {
            "pause" => station_arg(words.next(), "pause").map(Self::Pause),
            "resume" => station_arg(words.next(), "resume").map(Self::Resume),
            "pause-all" | "pauseall" => Ok(Self::PauseAll),
            "reset" => Ok(Self::Reset),
            "status" | "stats" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            _ => Err(CommandError::Unknown(verb)),
        }
    }
}

fn station_arg(word: Option<&str>, verb: &'static str) -> Result<usize, CommandError> {
    let word = word.ok_or(CommandError::MissingStation(verb))?;
    match word.parse::<usize>() {
        Ok(n) if (1..=NUM_STATIONS).contains(&n) => Ok(n - 1),
        _ => Err(CommandError::InvalidStation(word.to_string())),
    }
}
