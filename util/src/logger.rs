//! # Logger
//!
//! Console and session log file output through `fern`.
//!
//! The console shows records at the level chosen on the command line. The session's log file
//! always receives `DEBUG` and above so a run can be investigated after the fact without having
//! been started verbose.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use colored::{ColoredString, Colorize};
use log::{info, Level, Record};
use std::fmt;
use thiserror::Error;

use crate::session::{self, Session};

pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Level of the session log file, unless the console is more verbose.
const FILE_LEVEL: LevelFilter = LevelFilter::Debug;

/// Targets which are limited to `INFO` whatever the chosen level.
const QUIET_TARGETS: [&str; 1] = ["zmq"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Unrecognised log level \"{0}\"")]
    UnknownLogLevel(String),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `console_level` must be `INFO` or more verbose, warnings alone are not enough to follow a run.
///
/// Can only succeed once per process.
pub fn logger_init(
    console_level: LevelFilter,
    session: &Session
) -> Result<(), LoggerInitError> {
    if console_level < LevelFilter::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(console_level))
    }

    let file_level = console_level.max(FILE_LEVEL);

    let console = fern::Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, true))
        .level(console_level)
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, false))
        .level(file_level)
        .chain(fern::log_file(&session.log_file_path)
            .map_err(LoggerInitError::LogFileInitError)?);

    let mut root = fern::Dispatch::new().level(file_level);
    for target in QUIET_TARGETS.iter() {
        root = root.level_for(*target, LevelFilter::Info);
    }

    root.chain(console)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    if let Some(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Console level: {:?}, file level: {:?}", console_level, file_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

/// Parse a log level name as given on the command line.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggerInitError> {
    level.parse::<LevelFilter>()
        .map_err(|_| LoggerInitError::UnknownLogLevel(level.to_string()))
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Format a record as `[elapsed LVL] target: message`.
///
/// The target is only shown for debug and trace records.
fn format_record(
    out: fern::FormatCallback,
    message: &fmt::Arguments,
    record: &Record,
    colour: bool
) {
    let level = match colour {
        true => level_tag(record.level()),
        false => level_str(record.level()).normal(),
    };
    let elapsed = session::get_elapsed_seconds();

    match record.level() > Level::Info {
        true => out.finish(format_args!(
            "[{:10.6} {}] {}: {}", elapsed, level, record.target(), message
        )),
        false => out.finish(format_args!("[{:10.6} {}] {}", elapsed, level, message))
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRC",
        Level::Debug => "DBG",
        Level::Info  => "INF",
        Level::Warn  => "WRN",
        Level::Error => "ERR"
    }
}

fn level_tag(level: Level) -> ColoredString {
    let s = level_str(level);
    match level {
        Level::Trace => s.dimmed().italic(),
        Level::Debug => s.dimmed(),
        Level::Info  => s.normal(),
        Level::Warn  => s.yellow(),
        Level::Error => s.red().bold()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace").unwrap(), LevelFilter::Trace);
        assert_eq!(parse_level("INFO").unwrap(), LevelFilter::Info);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_level_str() {
        assert_eq!(level_str(Level::Warn), "WRN");
        assert_eq!(level_str(Level::Trace), "TRC");
    }
}
