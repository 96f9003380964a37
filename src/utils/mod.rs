//! Various useful things.

pub mod sync;
