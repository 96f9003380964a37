//! The proxy interface.
//!
//! Routers talk to the server through a proxy. The wire framing of that
//! protocol lives outside this crate; what lives here is the abstract
//! message set the coordinator consumes and produces, the protocol’s
//! error taxonomy, and the bookkeeping of connected proxies.

use std::fmt;
use std::collections::HashMap;
use bitflags::bitflags;
use bytes::Bytes;
use crate::update::{Prefix, UpdateId, Verdict};
use crate::utils::sync::Mutex;

/// The identifier a proxy picks for itself when connecting.
pub type ProxyId = u32;


bitflags! {
    /// What a verify request asks for.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct VerifyFlags: u8 {
        /// Perform origin validation.
        const ORIGIN = 0x01;

        /// Perform path validation.
        const PATH = 0x02;

        /// Send a receipt notification carrying the update ID.
        const RECEIPT = 0x80;
    }
}

bitflags! {
    /// Which result fields of a notification are meaningful.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ResultType: u8 {
        const ORIGIN = 0x01;
        const PATH = 0x02;
        const ASPA = 0x04;
    }
}


//------------ SrxResult -----------------------------------------------------

/// The verdict triple reported for an update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SrxResult {
    /// The origin validation verdict.
    pub origin: Verdict,

    /// The path validation verdict.
    pub path: Verdict,

    /// The ASPA verdict.
    pub aspa: Verdict,
}

impl SrxResult {
    /// Returns the result with internal sentinels scrubbed.
    ///
    /// The leave-alone sentinel must never cross the external
    /// interface; it degrades to undefined on the way out.
    pub fn publishable(self) -> Self {
        fn scrub(verdict: Verdict) -> Verdict {
            if verdict.is_public() {
                verdict
            }
            else {
                Verdict::Undefined
            }
        }
        SrxResult {
            origin: scrub(self.origin),
            path: scrub(self.path),
            aspa: scrub(self.aspa),
        }
    }
}

impl Default for SrxResult {
    fn default() -> Self {
        SrxResult {
            origin: Verdict::Undefined,
            path: Verdict::Undefined,
            aspa: Verdict::Undefined,
        }
    }
}


//------------ VerifyRequest -------------------------------------------------

/// A request to validate one route announcement.
#[derive(Clone, Debug)]
pub struct VerifyRequest {
    /// The router’s own identifier for the announcement.
    pub local_id: u32,

    /// What to validate and whether to send a receipt.
    pub flags: VerifyFlags,

    /// Verdicts to assume for anything not (yet) validated.
    pub default_result: SrxResult,

    /// The announced prefix.
    pub prefix: Prefix,

    /// The origin AS of the announcement.
    pub origin_as: u32,

    /// The raw BGPsec_PATH attribute, if the update carries one.
    pub bgpsec: Option<Bytes>,

    /// The plain AS path, origin last.
    ///
    /// Used for fingerprinting when no BGPsec_PATH attribute is
    /// present, and for ASPA evaluation.
    pub as_path: Vec<u32>,
}


//------------ ProxyMessage --------------------------------------------------

/// A message received from a proxy.
///
/// The wire framing lives outside this crate; a transport decodes into
/// this type and hands it to the coordinator.
#[derive(Clone, Debug)]
pub enum ProxyMessage {
    /// A proxy introduces itself.
    Hello {
        /// The AS of the proxy’s router.
        proxy_as: u32,

        /// The AS numbers of the router’s peers.
        peer_asns: Vec<u32>,
    },

    /// A request to validate an announcement.
    Verify(VerifyRequest),

    /// A request to sign an update towards a peer.
    Sign {
        /// The update to sign.
        update_id: u32,

        /// How often the own AS prepends itself.
        prepend_count: u8,

        /// The peer the update is sent to.
        peer_as: u32,
    },

    /// An update is no longer announced.
    Delete {
        /// Seconds the server may keep the update’s data around.
        keep_window: u16,

        /// The update to delete.
        update_id: u32,
    },

    /// The proxy disconnects.
    Goodbye {
        /// Seconds the server may keep the proxy’s data around.
        keep_window: u16,
    },
}


//------------ VerifyNotify --------------------------------------------------

/// A verification result pushed to a router.
///
/// The first notification for a request may carry the router’s local
/// ID as a receipt; subsequent notifications reference the update ID
/// alone. A notification is repeated whenever an RPKI change flips a
/// previously reported verdict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VerifyNotify {
    /// The update the results belong to.
    pub update_id: UpdateId,

    /// The router’s local ID, present in receipt notifications.
    pub local_id: Option<u32>,

    /// Which of the result fields carry requested results.
    pub result_type: ResultType,

    /// The verdicts.
    pub result: SrxResult,
}


//------------ ProxyReply ----------------------------------------------------

/// A message sent from the server to a proxy.
#[derive(Clone, Debug)]
pub enum ProxyReply {
    /// The answer to a successful hello.
    HelloResponse {
        /// Seconds the server keeps update data after a delete.
        keep_window: u16,
    },

    /// A verification result, possibly repeated on change.
    VerifyNotify(VerifyNotify),

    /// A freshly signed BGPsec_PATH attribute.
    SignNotify {
        /// The update the signature belongs to.
        update_id: UpdateId,

        /// The attribute including the new signature.
        attribute: Bytes,
    },

    /// Something went wrong.
    Error {
        /// The kind of error.
        code: ErrorCode,

        /// A sub-code, e.g. a transport errno. Zero if unused.
        sub: u16,
    },
}


//------------ ErrorCode -----------------------------------------------------

/// The error taxonomy of the proxy protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// An unspecified error.
    Unknown,

    /// A proxy tried to connect with an ID that is in use.
    DuplicateProxyId,

    /// A signature algorithm is not supported.
    UnknownAlgorithm,

    /// The referenced update is not known to the server.
    UnknownUpdate,

    /// The connection to the peer was lost.
    ConnectionLost,

    /// A message could not be sent.
    CouldNotSend,

    /// An internal server error.
    ServerError,
}

impl ErrorCode {
    /// Returns the numeric code of the error.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::Unknown => 0,
            ErrorCode::DuplicateProxyId => 1,
            ErrorCode::UnknownAlgorithm => 2,
            ErrorCode::UnknownUpdate => 3,
            ErrorCode::ConnectionLost => 4,
            ErrorCode::CouldNotSend => 5,
            ErrorCode::ServerError => 6,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            ErrorCode::Unknown => "unknown error",
            ErrorCode::DuplicateProxyId => "duplicate proxy id",
            ErrorCode::UnknownAlgorithm => "unknown algorithm",
            ErrorCode::UnknownUpdate => "unknown update",
            ErrorCode::ConnectionLost => "connection lost",
            ErrorCode::CouldNotSend => "could not send",
            ErrorCode::ServerError => "server error",
        })
    }
}


//------------ ProxyRegistry -------------------------------------------------

/// The proxies currently connected to the server.
#[derive(Debug)]
pub struct ProxyRegistry {
    /// The connected proxies by their self-chosen ID.
    table: Mutex<HashMap<ProxyId, ProxyEntry>>,

    /// The keep window handed out in hello responses, in seconds.
    keep_window: u16,
}

/// What the registry remembers about a proxy.
#[derive(Clone, Debug)]
struct ProxyEntry {
    /// The AS the proxy’s router belongs to.
    proxy_as: u32,

    /// The AS numbers of the router’s peers.
    peer_asns: Vec<u32>,
}

impl ProxyRegistry {
    /// Creates a new registry handing out the given keep window.
    pub fn new(keep_window: u16) -> Self {
        ProxyRegistry {
            table: Mutex::new(HashMap::new()),
            keep_window,
        }
    }

    /// Registers a proxy.
    ///
    /// Returns the keep window to report back, or an error if the ID
    /// is already taken.
    pub fn hello(
        &self, proxy_id: ProxyId, proxy_as: u32, peer_asns: Vec<u32>
    ) -> Result<u16, ErrorCode> {
        let mut table = self.table.lock();
        if table.contains_key(&proxy_id) {
            return Err(ErrorCode::DuplicateProxyId)
        }
        table.insert(proxy_id, ProxyEntry { proxy_as, peer_asns });
        Ok(self.keep_window)
    }

    /// Removes a proxy. Returns whether it was registered.
    pub fn goodbye(&self, proxy_id: ProxyId) -> bool {
        self.table.lock().remove(&proxy_id).is_some()
    }

    /// Returns whether a proxy is currently registered.
    pub fn is_connected(&self, proxy_id: ProxyId) -> bool {
        self.table.lock().contains_key(&proxy_id)
    }

    /// Returns the AS of a registered proxy.
    pub fn proxy_as(&self, proxy_id: ProxyId) -> Option<u32> {
        self.table.lock().get(&proxy_id).map(|entry| entry.proxy_as)
    }

    /// Returns whether `asn` is a known peer of the proxy.
    pub fn is_peer(&self, proxy_id: ProxyId, asn: u32) -> bool {
        self.table.lock().get(&proxy_id).map(|entry| {
            entry.peer_asns.contains(&asn)
        }).unwrap_or(false)
    }

    /// Returns the number of connected proxies.
    pub fn count(&self) -> usize {
        self.table.lock().len()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_rejects_duplicate_ids() {
        let registry = ProxyRegistry::new(900);
        assert_eq!(registry.hello(17, 64500, vec![64501]), Ok(900));
        assert_eq!(
            registry.hello(17, 64502, Vec::new()),
            Err(ErrorCode::DuplicateProxyId)
        );
        assert_eq!(registry.count(), 1);
        assert!(registry.is_connected(17));
        assert!(registry.is_peer(17, 64501));
        assert!(!registry.is_peer(17, 64502));
        assert_eq!(registry.proxy_as(17), Some(64500));

        assert!(registry.goodbye(17));
        assert!(!registry.goodbye(17));
        assert_eq!(registry.hello(17, 64502, Vec::new()), Ok(900));
    }

    #[test]
    fn sentinel_never_leaves() {
        let result = SrxResult {
            origin: Verdict::Valid,
            path: Verdict::DoNotUse,
            aspa: Verdict::DoNotUse,
        };
        let out = result.publishable();
        assert_eq!(out.origin, Verdict::Valid);
        assert_eq!(out.path, Verdict::Undefined);
        assert_eq!(out.aspa, Verdict::Undefined);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ErrorCode::Unknown.code(), 0);
        assert_eq!(ErrorCode::DuplicateProxyId.code(), 1);
        assert_eq!(ErrorCode::UnknownAlgorithm.code(), 2);
        assert_eq!(ErrorCode::UnknownUpdate.code(), 3);
        assert_eq!(ErrorCode::ConnectionLost.code(), 4);
        assert_eq!(ErrorCode::CouldNotSend.code(), 5);
        assert_eq!(ErrorCode::ServerError.code(), 6);
    }
}
