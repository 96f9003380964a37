//! SRx-style BGP path security validation.
//!
//! BGP routers that participate in path security need an answer to the
//! question “is this update valid?”: for the origin of the route, for
//! the cryptographic BGPsec path, and for the provider authorization of
//! the AS path. Answering it requires RPKI-derived data that changes
//! over time, so the answer can change after it was given.
//!
//! This crate implements the validation cache subsystem of such a
//! server: the index linking registered updates to the router keys they
//! depend on, the deduplicating cache of AS paths with their memoized
//! ASPA verdicts, the queue propagating RPKI changes to affected
//! updates, the parser for the BGPsec_PATH attribute feeding the index,
//! and the coordinator tying all of it together. The proxy wire
//! protocol towards routers, the RPKI-to-Router client, the prefix
//! cache, and the cryptographic primitives are external collaborators
//! behind the interfaces in [`coordinator`] and [`rtr`].

pub mod aspa;
pub mod bgpsec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod operation;
pub mod pathlist;
pub mod proxy;
pub mod queue;
pub mod rtr;
pub mod ski;
pub mod update;
pub mod utils;

pub use self::config::Config;
pub use self::coordinator::Coordinator;
pub use self::error::{ExitError, Failed};
pub use self::operation::Operation;
