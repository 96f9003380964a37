//! Logging.
//!
//! Sets up the `log` crate façade according to the configuration:
//! stderr or a log file through a fern dispatch, or syslog on Unix.
//! Must be called once, early, before anything worth logging happens.

use std::io;
use chrono::Utc;
use log::LevelFilter;
use crate::config::{Config, LogTarget};
use crate::error::Failed;


/// Switches logging to the target selected in the configuration.
pub fn switch_logging(config: &Config) -> Result<(), Failed> {
    let res = match config.log_target {
        LogTarget::Stderr => {
            dispatch(config.log_level).chain(io::stderr()).apply()
        }
        LogTarget::File(ref path) => {
            let file = fern::log_file(path).map_err(|err| {
                eprintln!(
                    "Failed to open log file {}: {}", path.display(), err
                );
                Failed
            })?;
            dispatch(config.log_level).chain(file).apply()
        }
        LogTarget::Syslog => return switch_syslog(config),
    };
    res.map_err(|err| {
        eprintln!("Failed to initialize logging: {}", err);
        Failed
    })
}

/// Creates the fern dispatch shared by the stderr and file targets.
fn dispatch(level: LevelFilter) -> fern::Dispatch {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(level)
}

#[cfg(unix)]
fn switch_syslog(config: &Config) -> Result<(), Failed> {
    syslog::init(
        syslog::Facility::LOG_DAEMON,
        config.log_level,
        Some("srxd"),
    ).map_err(|err| {
        eprintln!("Failed to initialize syslog: {}", err);
        Failed
    })
}

#[cfg(not(unix))]
fn switch_syslog(_config: &Config) -> Result<(), Failed> {
    eprintln!("Syslog logging is only available on Unix systems.");
    Err(Failed)
}
