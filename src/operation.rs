//! What srxd can do for you.
//!
//! This module contains the commands you can give to the executable.

use std::io::{self, Write};
use std::fs;
use std::sync::Arc;
use std::sync::mpsc;
use bytes::Bytes;
use clap::{App, Arg, ArgMatches, SubCommand};
use log::{error, info};
use crate::aspa::AspaStore;
use crate::config::Config;
use crate::coordinator::{
    AcceptAllVerifier, Coordinator, LoggingSink, NotFoundOracle,
};
use crate::error::{ExitError, Failed};
use crate::log::switch_logging;
use crate::pathlist::AsPathCache;
use crate::proxy::{SrxResult, VerifyFlags, VerifyNotify, VerifyRequest};
use crate::queue::ChangeQueue;
use crate::rtr::RtrIngest;
use crate::ski::SkiCache;
use crate::update::{Prefix, Verdict};


//------------ Operation -----------------------------------------------------

/// The command to run.
pub enum Operation {
    /// Run the validation service.
    Server,

    /// Validate a single update and print the result.
    Validate {
        /// The announced prefix.
        prefix: Prefix,

        /// The origin AS of the announcement.
        origin_as: u32,

        /// A file with the BGPsec_PATH attribute in hex, if any.
        bgpsec: Option<String>,
    },
}

impl Operation {
    /// Adds the command configuration to a clap app.
    pub fn config_args<'a: 'b, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app

        // server
        .subcommand(SubCommand::with_name("server")
            .about("Runs the validation service.")
        )

        // validate
        .subcommand(SubCommand::with_name("validate")
            .about("Validates a single route announcement.")
            .arg(Arg::with_name("prefix")
                .short("p")
                .long("prefix")
                .value_name("PREFIX")
                .help("the announced prefix")
                .takes_value(true)
                .required(true)
            )
            .arg(Arg::with_name("asn")
                .short("a")
                .long("asn")
                .value_name("NUMBER")
                .help("the origin AS of the announcement")
                .takes_value(true)
                .required(true)
            )
            .arg(Arg::with_name("bgpsec")
                .short("b")
                .long("bgpsec")
                .value_name("FILE")
                .help("file with the BGPsec_PATH attribute in hex")
                .takes_value(true)
            )
        )
    }

    /// Creates a command from clap matches.
    pub fn from_arg_matches(matches: &ArgMatches) -> Result<Self, Failed> {
        match matches.subcommand() {
            ("server", _) => Ok(Operation::Server),
            ("validate", Some(matches)) => {
                let prefix = match matches.value_of("prefix")
                    .expect("required argument").parse()
                {
                    Ok(prefix) => prefix,
                    Err(err) => {
                        eprintln!("Invalid prefix: {}", err);
                        return Err(Failed)
                    }
                };
                let origin_as = match matches.value_of("asn")
                    .expect("required argument").parse()
                {
                    Ok(asn) => asn,
                    Err(_) => {
                        eprintln!("Invalid AS number.");
                        return Err(Failed)
                    }
                };
                Ok(Operation::Validate {
                    prefix,
                    origin_as,
                    bgpsec: matches.value_of("bgpsec").map(Into::into),
                })
            }
            _ => {
                eprintln!(
                    "Expected a command. See 'srxd --help' for a list."
                );
                Err(Failed)
            }
        }
    }

    /// Runs the command.
    pub fn run(self, config: Config) -> Result<(), ExitError> {
        match self {
            Operation::Server => Self::server(config),
            Operation::Validate { prefix, origin_as, bgpsec } => {
                Self::validate(config, prefix, origin_as, bgpsec)
            }
        }
    }

    /// Runs the validation service.
    ///
    /// The proxy and RTR transports are external; this wires up the
    /// caches, the coordinator, and the worker threads they feed.
    fn server(config: Config) -> Result<(), ExitError> {
        switch_logging(&config)?;
        let (coordinator, ski, aspa) = build(&config);
        let notifier = coordinator.clone().spawn_notifier()?;
        let (_rtr_tx, rtr_rx) = mpsc::channel();
        let _ingest = RtrIngest::new(
            ski, aspa, coordinator, config.rtr_reconnect_delay
        ).spawn(rtr_rx)?;
        info!("srxd is running.");
        notifier.join().map_err(|_| {
            error!("The notifier thread panicked.");
            ExitError::Generic
        })
    }

    /// Validates a single announcement and prints the result.
    fn validate(
        config: Config, prefix: Prefix, origin_as: u32,
        bgpsec: Option<String>,
    ) -> Result<(), ExitError> {
        switch_logging(&config)?;
        let bgpsec = match bgpsec {
            Some(path) => Some(read_hex_file(&path)?),
            None => None
        };
        let (coordinator, _, _) = build(&config);
        let notify = coordinator.verify(0, VerifyRequest {
            local_id: 0,
            flags: VerifyFlags::ORIGIN | VerifyFlags::PATH,
            default_result: SrxResult::default(),
            prefix,
            origin_as,
            bgpsec,
            as_path: vec![origin_as],
        });
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        write_json(&mut stdout, &notify, origin_as, &prefix).map_err(
            |err| {
                error!("Failed to write result: {}", err);
                ExitError::Generic
            }
        )?;
        if notify.result.origin == Verdict::Invalid
            || notify.result.path == Verdict::Invalid
        {
            Err(ExitError::Invalid)
        }
        else {
            Ok(())
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Builds the cache stack with the built-in stand-in collaborators.
///
/// The binary has no external prefix cache or crypto module attached,
/// so it runs with an oracle that answers not-found and a verifier
/// that accepts everything. Library users inject real implementations.
fn build(
    config: &Config
) -> (Arc<Coordinator>, Arc<SkiCache>, Arc<AspaStore>) {
    let queue = Arc::new(ChangeQueue::new(config.queue_lock_timeout));
    let ski = Arc::new(SkiCache::new(queue.clone()));
    let aspa = Arc::new(AspaStore::new());
    let coordinator = Arc::new(Coordinator::new(
        ski.clone(),
        Arc::new(AsPathCache::new()),
        aspa.clone(),
        queue,
        Arc::new(NotFoundOracle),
        Arc::new(AcceptAllVerifier),
        Arc::new(LoggingSink),
        config.keep_window,
        config.poll_interval,
    ));
    (coordinator, ski, aspa)
}

/// Reads a file containing hex data, ignoring whitespace.
fn read_hex_file(path: &str) -> Result<Bytes, Failed> {
    let content = fs::read_to_string(path).map_err(|err| {
        error!("Failed to read {}: {}", path, err);
        Failed
    })?;
    decode_hex(&content).map(Into::into)
}

/// Decodes a hex string, ignoring whitespace.
fn decode_hex(data: &str) -> Result<Vec<u8>, Failed> {
    let data: String = data.chars().filter(
        |ch| !ch.is_whitespace()
    ).collect();
    if data.len() % 2 != 0 {
        error!("Hex data with an odd number of digits.");
        return Err(Failed)
    }
    (0..data.len()).step_by(2).map(|idx| {
        u8::from_str_radix(&data[idx..idx + 2], 16).map_err(|_| {
            error!("Invalid hex data.");
            Failed
        })
    }).collect()
}

/// Writes the validation result as JSON.
fn write_json<W: Write>(
    target: &mut W, notify: &VerifyNotify, origin_as: u32,
    prefix: &Prefix,
) -> Result<(), io::Error> {
    writeln!(target, "{{")?;
    writeln!(target, "  \"validated_update\": {{")?;
    writeln!(target, "    \"update_id\": \"{}\",", notify.update_id)?;
    writeln!(target, "    \"origin_asn\": \"AS{}\",", origin_as)?;
    writeln!(target, "    \"prefix\": \"{}\",", prefix)?;
    writeln!(target, "    \"validity\": {{")?;
    writeln!(
        target, "      \"origin\": \"{}\",", notify.result.origin
    )?;
    writeln!(target, "      \"path\": \"{}\",", notify.result.path)?;
    writeln!(target, "      \"aspa\": \"{}\"", notify.result.aspa)?;
    writeln!(target, "    }}")?;
    writeln!(target, "  }}")?;
    writeln!(target, "}}")
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_decoding() {
        assert_eq!(
            decode_hex("00 1A ff\n42").unwrap(),
            vec![0x00, 0x1A, 0xFF, 0x42]
        );
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn json_shape() {
        let config = Config::default();
        let (coordinator, _, _) = build(&config);
        let notify = coordinator.verify(0, VerifyRequest {
            local_id: 0,
            flags: VerifyFlags::ORIGIN,
            default_result: SrxResult::default(),
            prefix: "10.0.0.0/24".parse().unwrap(),
            origin_as: 64500,
            bgpsec: None,
            as_path: vec![64500],
        });
        let mut out = Vec::new();
        write_json(
            &mut out, &notify, 64500, &"10.0.0.0/24".parse().unwrap()
        ).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"origin\": \"not-found\""));
        assert!(text.contains("\"prefix\": \"10.0.0.0/24\""));
    }
}
