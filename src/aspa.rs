//! The ASPA store.
//!
//! ASPA objects bind a customer AS to the set of its upstream
//! providers. The store keeps the current set of attestations as
//! received from the RPKI side and answers hop checks and upstream
//! chain walks over AS paths. The resulting verdicts are memoized per
//! path in the AS path cache.

use std::collections::HashMap;
use crate::pathlist::{AsRelDir, AsType};
use crate::update::Verdict;
use crate::utils::sync::RwLock;


//------------ AspaHop -------------------------------------------------------

/// The attestation state of a single customer-provider hop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AspaHop {
    /// The customer attests the AS as one of its providers.
    Provider,

    /// The customer has an attestation but the AS is not in it.
    NotProvider,

    /// The customer has not published an attestation.
    NoAttestation,
}


//------------ AspaStore -----------------------------------------------------

/// The set of current ASPA attestations.
#[derive(Debug, Default)]
pub struct AspaStore {
    /// Provider sets keyed by customer AS, each set ordered.
    table: RwLock<HashMap<u32, Vec<u32>>>,
}

impl AspaStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Announces the provider set of a customer.
    ///
    /// A previously announced set for the same customer is replaced.
    pub fn announce(&self, customer: u32, mut providers: Vec<u32>) {
        providers.sort_unstable();
        providers.dedup();
        self.table.write().insert(customer, providers);
    }

    /// Withdraws the attestation of a customer.
    pub fn withdraw(&self, customer: u32) -> bool {
        self.table.write().remove(&customer).is_some()
    }

    /// Returns the provider set of a customer if attested.
    pub fn providers(&self, customer: u32) -> Option<Vec<u32>> {
        self.table.read().get(&customer).cloned()
    }

    /// Returns the number of attestations in the store.
    pub fn count(&self) -> usize {
        self.table.read().len()
    }

    /// Checks a single customer-provider hop.
    pub fn hop(&self, customer: u32, provider: u32) -> AspaHop {
        match self.table.read().get(&customer) {
            Some(providers) => {
                if providers.binary_search(&provider).is_ok() {
                    AspaHop::Provider
                }
                else {
                    AspaHop::NotProvider
                }
            }
            None => AspaHop::NoAttestation
        }
    }

    /// Walks an AS path and derives its ASPA verdict.
    ///
    /// The path is given in path order, the origin AS last. Only paths
    /// received from a customer can be fully verified: every hop from
    /// the origin towards the receiver has to lead from a customer to
    /// one of its attested providers. Paths containing sets are
    /// unverifiable, as are paths received over other relationships.
    pub fn verify(
        &self, asns: &[u32], as_type: AsType, dir: AsRelDir
    ) -> Verdict {
        match as_type {
            AsType::Set | AsType::ConfedSet => {
                return Verdict::Unverifiable
            }
            AsType::Sequence | AsType::ConfedSequence => { }
        }
        match dir {
            AsRelDir::Up => { }
            AsRelDir::Down | AsRelDir::Peer | AsRelDir::Unknown => {
                return Verdict::Unverifiable
            }
        }
        if asns.len() < 2 {
            return Verdict::Valid
        }
        let mut unattested = false;
        for pair in asns.windows(2) {
            // pair[1] is the customer, pair[0] the AS it forwarded to.
            match self.hop(pair[1], pair[0]) {
                AspaHop::Provider => { }
                AspaHop::NotProvider => return Verdict::Invalid,
                AspaHop::NoAttestation => unattested = true,
            }
        }
        if unattested {
            Verdict::Unknown
        }
        else {
            Verdict::Valid
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn announce_hop_withdraw() {
        let store = AspaStore::new();
        store.announce(64500, vec![64496, 64497]);
        assert_eq!(store.hop(64500, 64496), AspaHop::Provider);
        assert_eq!(store.hop(64500, 64499), AspaHop::NotProvider);
        assert_eq!(store.hop(64501, 64496), AspaHop::NoAttestation);
        assert_eq!(store.count(), 1);

        store.announce(64500, vec![64499]);
        assert_eq!(store.hop(64500, 64496), AspaHop::NotProvider);
        assert_eq!(store.hop(64500, 64499), AspaHop::Provider);

        assert!(store.withdraw(64500));
        assert!(!store.withdraw(64500));
        assert_eq!(store.hop(64500, 64499), AspaHop::NoAttestation);
    }

    #[test]
    fn verify_chain() {
        let store = AspaStore::new();
        // 64502 is the origin; its provider is 64501 whose provider
        // is 64500.
        store.announce(64502, vec![64501]);
        store.announce(64501, vec![64500]);

        let path = [64500, 64501, 64502];
        assert_eq!(
            store.verify(&path, AsType::Sequence, AsRelDir::Up),
            Verdict::Valid
        );

        // A hop outside the attested provider set invalidates the path.
        store.announce(64501, vec![64499]);
        assert_eq!(
            store.verify(&path, AsType::Sequence, AsRelDir::Up),
            Verdict::Invalid
        );

        // A missing attestation leaves the path unknown.
        assert!(store.withdraw(64501));
        assert_eq!(
            store.verify(&path, AsType::Sequence, AsRelDir::Up),
            Verdict::Unknown
        );
    }

    #[test]
    fn verify_edge_cases() {
        let store = AspaStore::new();
        assert_eq!(
            store.verify(&[64500], AsType::Sequence, AsRelDir::Up),
            Verdict::Valid
        );
        assert_eq!(
            store.verify(
                &[64500, 64501], AsType::Set, AsRelDir::Up
            ),
            Verdict::Unverifiable
        );
        assert_eq!(
            store.verify(
                &[64500, 64501], AsType::Sequence, AsRelDir::Down
            ),
            Verdict::Unverifiable
        );
    }
}
