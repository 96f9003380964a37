//! Ingesting RPKI data deltas.
//!
//! The actual RPKI-to-Router client is an external collaborator. It
//! surfaces its callbacks as [`RtrEvent`] values which the ingest
//! thread applies to the caches: router keys go into the SKI cache,
//! ASPA objects into the ASPA store, and both prefix and ASPA events
//! make the coordinator queue re-validation for affected updates.
//!
//! The prefix payload itself lives in the external prefix cache behind
//! the coordinator’s origin oracle; only the change fan-out happens
//! here.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use bytes::Bytes;
use log::{debug, error, warn};
use crate::aspa::AspaStore;
use crate::coordinator::Coordinator;
use crate::error::Failed;
use crate::ski::{Ski, SkiCache};
use crate::update::Prefix;


//------------ RtrEvent ------------------------------------------------------

/// A data delta received from a validation cache.
#[derive(Clone, Debug)]
pub enum RtrEvent {
    /// A ROA prefix was announced or withdrawn.
    Prefix {
        /// The validation cache the event came from.
        cache_id: u32,

        /// The session of the cache connection.
        session_id: u16,

        /// Whether this is an announcement or a withdrawal.
        announce: bool,

        /// The authorized prefix.
        prefix: Prefix,

        /// The maximum length authorized for the prefix.
        max_len: u8,

        /// The authorized origin AS.
        origin_as: u32,
    },

    /// A router key was announced or withdrawn.
    Key {
        /// The validation cache the event came from.
        cache_id: u32,

        /// Whether this is an announcement or a withdrawal.
        announce: bool,

        /// The AS the key belongs to.
        asn: u32,

        /// The subject key identifier of the key.
        ski: Ski,

        /// The algorithm identifier of the key.
        algo_id: u8,

        /// The raw public key.
        ///
        /// The key bytes are the business of the cryptographic
        /// verifier; the caches only track the key’s existence.
        pubkey: Bytes,
    },

    /// The provider set of a customer AS changed.
    ///
    /// An empty provider list withdraws the attestation.
    Aspa {
        /// The validation cache the event came from.
        cache_id: u32,

        /// The customer AS.
        customer: u32,

        /// The attested providers.
        providers: Vec<u32>,
    },

    /// The cache asked for a session reset.
    Reset {
        /// The validation cache the event came from.
        cache_id: u32,
    },

    /// The RTR session reported an error.
    Error {
        /// The error code from the error PDU.
        code: u16,

        /// The message text from the error PDU.
        msg: String,
    },
}


//------------ RtrIngest -----------------------------------------------------

/// Applies RTR data deltas to the caches.
pub struct RtrIngest {
    /// The SKI cache receiving key events.
    ski: Arc<SkiCache>,

    /// The ASPA store receiving attestation events.
    aspa: Arc<AspaStore>,

    /// The coordinator fanning out change notifications.
    coordinator: Arc<Coordinator>,

    /// Seconds to wait before reconnecting a lost session.
    reconnect_delay: u64,
}

impl RtrIngest {
    /// Creates a new ingest for the given caches.
    pub fn new(
        ski: Arc<SkiCache>,
        aspa: Arc<AspaStore>,
        coordinator: Arc<Coordinator>,
        reconnect_delay: u64,
    ) -> Self {
        RtrIngest { ski, aspa, coordinator, reconnect_delay }
    }

    /// Returns the delay before a lost session should reconnect.
    pub fn reconnect_delay(&self) -> u64 {
        self.reconnect_delay
    }

    /// Applies a single event.
    pub fn apply(&self, event: RtrEvent) {
        match event {
            RtrEvent::Prefix {
                cache_id, session_id, announce, prefix, max_len, origin_as
            } => {
                debug!(
                    "ROA {} [origin AS{}, prefix {}, max-len {}, \
                     cache 0x{:08X}, session 0x{:04X}]",
                    if announce { "announce" } else { "withdraw" },
                    origin_as, prefix, max_len, cache_id, session_id
                );
                self.coordinator.roa_changed(&prefix);
            }
            RtrEvent::Key { announce, asn, ski, algo_id, pubkey, .. } => {
                debug!(
                    "router key {} [AS{}, algo {}, {} key bytes]",
                    if announce { "announce" } else { "withdraw" },
                    asn, algo_id, pubkey.len()
                );
                if announce {
                    self.ski.register_key(asn, &ski, algo_id);
                }
                else {
                    self.ski.unregister_key(asn, &ski, algo_id);
                }
            }
            RtrEvent::Aspa { customer, providers, .. } => {
                if providers.is_empty() {
                    self.aspa.withdraw(customer);
                }
                else {
                    self.aspa.announce(customer, providers);
                }
                self.coordinator.aspa_changed(customer);
            }
            RtrEvent::Reset { cache_id } => {
                // TODO: drop all data learned from this cache once
                // deltas are tagged with their cache of origin.
                warn!(
                    "Reset requested by cache 0x{:08X} not handled.",
                    cache_id
                );
            }
            RtrEvent::Error { code, msg } => {
                // Policy: keep the connection.
                error!("RTR session error {}: '{}'", code, msg);
            }
        }
    }

    /// Spawns the ingest thread draining `events`.
    ///
    /// The thread ends when the sending side of the channel goes away.
    pub fn spawn(
        self, events: Receiver<RtrEvent>
    ) -> Result<thread::JoinHandle<()>, Failed> {
        thread::Builder::new().name("rtr-ingest".into()).spawn(move || {
            while let Ok(event) = events.recv() {
                self.apply(event)
            }
            debug!("RTR ingest thread winding down.");
        }).map_err(|err| {
            error!("Failed to spawn the RTR ingest thread: {}", err);
            Failed
        })
    }
}


//============ Tests =========================================================
