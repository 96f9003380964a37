//! Configuration.
//!
//! Options can be given on the command line or in an optional TOML
//! config file. Command line arguments win over file values which win
//! over the built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::{App, Arg, ArgMatches};
use log::LevelFilter;
use serde::Deserialize;
use crate::error::Failed;


//------------ Config --------------------------------------------------------

/// srxd configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The log level filter for setting up logging.
    pub log_level: LevelFilter,

    /// Where to log to.
    pub log_target: LogTarget,

    /// Seconds the server keeps update data after a delete.
    ///
    /// Handed to proxies in the hello response.
    pub keep_window: u16,

    /// How long change-queue producers wait for the queue lock.
    pub queue_lock_timeout: Duration,

    /// How long the notifier waits for queue events per round.
    pub poll_interval: Duration,

    /// Seconds before a lost RTR session reconnects.
    pub rtr_reconnect_delay: u64,
}

impl Config {
    /// Adds the basic command line arguments to a clap app.
    pub fn config_args<'a: 'b, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app
        .arg(Arg::with_name("config")
             .short("c")
             .long("config")
             .value_name("FILE")
             .help("read the configuration from FILE")
             .takes_value(true)
        )
        .arg(Arg::with_name("verbose")
             .short("v")
             .long("verbose")
             .multiple(true)
             .help("print more (and more) information")
        )
        .arg(Arg::with_name("logfile")
             .long("logfile")
             .value_name("PATH")
             .help("log to this file")
             .takes_value(true)
        )
        .arg(Arg::with_name("syslog")
             .long("syslog")
             .help("log to syslog")
        )
        .arg(Arg::with_name("keep-window")
             .long("keep-window")
             .value_name("SECONDS")
             .help("time to keep update data after a delete")
             .takes_value(true)
        )
        .arg(Arg::with_name("queue-timeout")
             .long("queue-timeout")
             .value_name("MILLIS")
             .help("give up queueing a change event after this long")
             .takes_value(true)
        )
        .arg(Arg::with_name("poll-interval")
             .long("poll-interval")
             .value_name("MILLIS")
             .help("notifier wakeup interval")
             .takes_value(true)
        )
        .arg(Arg::with_name("rtr-reconnect")
             .long("rtr-reconnect")
             .value_name("SECONDS")
             .help("delay before reconnecting a lost RTR session")
             .takes_value(true)
        )
    }

    /// Creates a configuration from the command line arguments.
    ///
    /// If a config file was given, it is read first and the remaining
    /// arguments are applied on top of it.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        let mut config = match matches.value_of("config") {
            Some(path) => Self::from_file(Path::new(path))?,
            None => Default::default()
        };

        match matches.occurrences_of("verbose") {
            0 => { }
            1 => config.log_level = LevelFilter::Info,
            _ => config.log_level = LevelFilter::Debug,
        }
        if let Some(path) = matches.value_of("logfile") {
            config.log_target = LogTarget::File(path.into());
        }
        else if matches.is_present("syslog") {
            config.log_target = LogTarget::Syslog;
        }
        if let Some(value) = matches.value_of("keep-window") {
            config.keep_window = parse_arg(value, "keep-window")?;
        }
        if let Some(value) = matches.value_of("queue-timeout") {
            config.queue_lock_timeout = Duration::from_millis(
                parse_arg(value, "queue-timeout")?
            );
        }
        if let Some(value) = matches.value_of("poll-interval") {
            config.poll_interval = Duration::from_millis(
                parse_arg(value, "poll-interval")?
            );
        }
        if let Some(value) = matches.value_of("rtr-reconnect") {
            config.rtr_reconnect_delay = parse_arg(value, "rtr-reconnect")?;
        }
        Ok(config)
    }

    /// Reads the configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, Failed> {
        let content = fs::read_to_string(path).map_err(|err| {
            eprintln!(
                "Failed to read config file {}: {}", path.display(), err
            );
            Failed
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|err| {
            eprintln!(
                "Failed to parse config file {}: {}", path.display(), err
            );
            Failed
        })?;
        let mut config = Config::default();
        if let Some(value) = file.log_level {
            config.log_level = match value.parse() {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Invalid log-level '{}' in config file.", value
                    );
                    return Err(Failed)
                }
            };
        }
        if let Some(path) = file.log_file {
            config.log_target = LogTarget::File(path);
        }
        else if file.syslog.unwrap_or(false) {
            config.log_target = LogTarget::Syslog;
        }
        if let Some(value) = file.keep_window {
            config.keep_window = value;
        }
        if let Some(value) = file.queue_timeout {
            config.queue_lock_timeout = Duration::from_millis(value);
        }
        if let Some(value) = file.poll_interval {
            config.poll_interval = Duration::from_millis(value);
        }
        if let Some(value) = file.rtr_reconnect_delay {
            config.rtr_reconnect_delay = value;
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LevelFilter::Warn,
            log_target: LogTarget::Stderr,
            keep_window: 900,
            queue_lock_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            rtr_reconnect_delay: 30,
        }
    }
}


//------------ LogTarget -----------------------------------------------------

/// Where the log output should go.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogTarget {
    /// Log to standard error.
    Stderr,

    /// Log to syslog. Unix only.
    Syslog,

    /// Log to the given file.
    File(PathBuf),
}


//------------ ConfigFile ----------------------------------------------------

/// The content of the optional TOML config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    /// The log level as a string, e.g. "debug".
    log_level: Option<String>,

    /// Log to this file.
    log_file: Option<PathBuf>,

    /// Log to syslog instead.
    syslog: Option<bool>,

    /// Seconds to keep update data after a delete.
    keep_window: Option<u16>,

    /// Milliseconds to wait for the change queue lock.
    queue_timeout: Option<u64>,

    /// Milliseconds between notifier wakeups.
    poll_interval: Option<u64>,

    /// Seconds before reconnecting a lost RTR session.
    rtr_reconnect_delay: Option<u64>,
}


//------------ Helpers -------------------------------------------------------

/// Parses a numeric command line value.
fn parse_arg<T: std::str::FromStr>(
    value: &str, name: &str
) -> Result<T, Failed> {
    value.parse().map_err(|_| {
        eprintln!("Invalid value '{}' for {} argument.", value, name);
        Failed
    })
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches<'static> {
        Config::config_args(App::new("test"))
            .get_matches_from_safe(
                std::iter::once("test").chain(args.iter().copied())
            )
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = Config::from_arg_matches(&matches(&[])).unwrap();
        assert_eq!(config.log_level, LevelFilter::Warn);
        assert_eq!(config.log_target, LogTarget::Stderr);
        assert_eq!(config.keep_window, 900);
    }

    #[test]
    fn verbose_levels() {
        let config = Config::from_arg_matches(&matches(&["-v"])).unwrap();
        assert_eq!(config.log_level, LevelFilter::Info);
        let config = Config::from_arg_matches(
            &matches(&["-vv"])
        ).unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn numeric_overrides() {
        let config = Config::from_arg_matches(&matches(&[
            "--keep-window", "60",
            "--queue-timeout", "100",
            "--poll-interval", "250",
            "--rtr-reconnect", "10",
        ])).unwrap();
        assert_eq!(config.keep_window, 60);
        assert_eq!(config.queue_lock_timeout, Duration::from_millis(100));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.rtr_reconnect_delay, 10);
        assert!(Config::from_arg_matches(
            &matches(&["--keep-window", "soon"])
        ).is_err());
    }

    #[test]
    fn file_values_and_overrides() {
        let dir = std::env::temp_dir();
        let path = dir.join("srxd-test-config.toml");
        fs::write(&path, concat!(
            "log_level = \"info\"\n",
            "keep_window = 120\n",
            "poll_interval = 100\n",
        )).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.keep_window, 120);
        assert_eq!(config.poll_interval, Duration::from_millis(100));

        let config = Config::from_arg_matches(&matches(&[
            "-c", path.to_str().unwrap(), "--keep-window", "60",
        ])).unwrap();
        assert_eq!(config.keep_window, 60);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        fs::remove_file(&path).unwrap();
    }
}
