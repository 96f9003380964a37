//! The AS path cache.
//!
//! Many updates share the same AS path. The cache deduplicates paths by
//! a content-derived path ID and memoizes the ASPA verdict for each
//! distinct path, so a change in ASPA data has to be re-evaluated once
//! per path rather than once per update.
//!
//! The path ID is a function of the AS sequence and the path type only.
//! Two insertions deriving the same ID collapse into a single record.

use std::collections::HashMap;
use std::fmt;
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{error, info, warn};
use crate::update::Verdict;
use crate::utils::sync::RwLock;

/// The CRC32 flavor used for path IDs, same as for update IDs.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);


//------------ AsType --------------------------------------------------------

/// The type of an AS path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsType {
    /// An unordered set of AS numbers.
    Set,

    /// An ordered sequence of AS numbers.
    Sequence,

    /// An ordered sequence inside a confederation.
    ConfedSequence,

    /// An unordered set inside a confederation.
    ConfedSet,
}

impl AsType {
    /// The path segment type code as used in BGP.
    pub fn code(self) -> u8 {
        match self {
            AsType::Set => 1,
            AsType::Sequence => 2,
            AsType::ConfedSequence => 3,
            AsType::ConfedSet => 4,
        }
    }
}


//------------ AsRelDir ------------------------------------------------------

/// The relationship direction of a path towards its neighbor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsRelDir {
    /// The update was received from a customer.
    Up,

    /// The update was received from a provider.
    Down,

    /// The update was received from a lateral peer.
    Peer,

    /// The relationship is not known.
    Unknown,
}


//------------ path_id -------------------------------------------------------

/// Derives the path ID for an AS sequence and path type.
///
/// The ID is the CRC32 checksum over an uppercase hex rendering of the
/// AS numbers followed by the type code. It depends on nothing else.
pub fn path_id(asns: &[u32], as_type: AsType) -> u32 {
    let mut text = String::with_capacity(asns.len() * 8 + 1);
    for asn in asns {
        text.push_str(&format!("{:08X}", asn));
    }
    text.push_str(&format!("{:X}", as_type.code()));
    CRC32.checksum(text.as_bytes())
}


//------------ AsPathList ----------------------------------------------------

/// A deduplicated AS path and its memoized ASPA verdict.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsPathList {
    /// The content-derived ID of the path.
    pub path_id: u32,

    /// The AS numbers of the path in path order.
    pub asns: Vec<u32>,

    /// The type of the path.
    pub as_type: AsType,

    /// The relationship direction the path was received over.
    pub as_rel_dir: AsRelDir,

    /// The address family of the covered prefix.
    pub afi: u16,

    /// The memoized ASPA verdict for the path.
    pub aspa_result: Verdict,

    /// When the record was last modified, in Unix seconds.
    pub last_modified: i64,
}

impl AsPathList {
    /// Creates a new path list with an undefined ASPA verdict.
    pub fn new(
        asns: Vec<u32>, as_type: AsType, as_rel_dir: AsRelDir, afi: u16
    ) -> Self {
        AsPathList {
            path_id: path_id(&asns, as_type),
            asns,
            as_type,
            as_rel_dir,
            afi,
            aspa_result: Verdict::Undefined,
            last_modified: 0,
        }
    }
}


//------------ InsertOutcome -------------------------------------------------

/// The outcome of inserting a path into the cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// The path was not known and a record was created.
    Created,

    /// A record for the path ID already exists. It was left alone.
    Exists,

    /// The path could not be stored.
    Error,
}


//------------ AsPathCache ---------------------------------------------------

/// The AS path cache proper.
///
/// Lookups take the read lock; insertion, deletion, and verdict updates
/// take the write lock.
#[derive(Debug, Default)]
pub struct AsPathCache {
    /// The records keyed by path ID.
    table: RwLock<HashMap<u32, AsPathList>>,
}

impl AsPathCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores a path list in the cache.
    ///
    /// The stored record starts out with `default_result` as its ASPA
    /// verdict. If a record with the same path ID already exists, it is
    /// left untouched and [`InsertOutcome::Exists`] is returned.
    pub fn insert(
        &self, default_result: Verdict, mut entry: AsPathList
    ) -> InsertOutcome {
        if entry.asns.is_empty() {
            error!("Refusing to store an AS path without any hops.");
            return InsertOutcome::Error
        }
        let mut table = self.table.write();
        if table.contains_key(&entry.path_id) {
            return InsertOutcome::Exists
        }
        entry.aspa_result = default_result;
        table.insert(entry.path_id, entry);
        InsertOutcome::Created
    }

    /// Looks up a path by its ID.
    ///
    /// As a side effect, `aspa_result` receives the memoized verdict of
    /// the record, or [`Verdict::Undefined`] if there is no record.
    pub fn lookup(
        &self, path_id: u32, aspa_result: &mut Verdict
    ) -> Option<AsPathList> {
        let table = self.table.read();
        match table.get(&path_id) {
            Some(entry) => {
                *aspa_result = entry.aspa_result;
                Some(entry.clone())
            }
            None => {
                *aspa_result = Verdict::Undefined;
                None
            }
        }
    }

    /// Updates the memoized ASPA verdict of a record.
    ///
    /// The modification time is always refreshed. The verdict itself
    /// only changes if the new one differs and is not the internal
    /// leave-alone sentinel. Returns whether a record existed.
    pub fn update_aspa_result(
        &self, path_id: u32, result: Verdict, timestamp: i64
    ) -> bool {
        let mut table = self.table.write();
        let entry = match table.get_mut(&path_id) {
            Some(entry) => entry,
            None => {
                error!(
                    "No AS path record 0x{:08X}, cannot modify it.",
                    path_id
                );
                return false
            }
        };
        entry.last_modified = timestamp;
        if result != Verdict::DoNotUse && result != entry.aspa_result {
            info!(
                "AS path record 0x{:08X} changed to {}.", path_id, result
            );
            entry.aspa_result = result;
        }
        true
    }

    /// Removes the record for a path ID.
    pub fn delete(&self, path_id: u32) -> bool {
        let mut table = self.table.write();
        if table.remove(&path_id).is_some() {
            true
        }
        else {
            warn!(
                "Attempt to delete unknown AS path record 0x{:08X}.",
                path_id
            );
            false
        }
    }

    /// Returns the number of cached records.
    pub fn count(&self) -> usize {
        self.table.read().len()
    }

    /// Returns all path IDs in ascending order.
    pub fn sorted_ids(&self) -> Vec<u32> {
        let mut res: Vec<u32> = self.table.read().keys().copied().collect();
        res.sort_unstable();
        res
    }

    /// Applies `op` to every record whose path contains `asn`.
    pub fn for_paths_with_asn<F: FnMut(&AsPathList)>(
        &self, asn: u32, mut op: F
    ) {
        let table = self.table.read();
        for entry in table.values() {
            if entry.asns.contains(&asn) {
                op(entry)
            }
        }
    }

    /// Writes all records in path ID order, for diagnostics.
    pub fn write_dump<W: fmt::Write>(
        &self, target: &mut W
    ) -> Result<(), fmt::Error> {
        let table = self.table.read();
        let mut ids: Vec<u32> = table.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let entry = &table[&id];
            writeln!(target, "path 0x{:08X}:", entry.path_id)?;
            writeln!(target, "  hops:          {}", entry.asns.len())?;
            writeln!(target, "  aspa result:   {}", entry.aspa_result)?;
            writeln!(target, "  type:          {:?}", entry.as_type)?;
            writeln!(target, "  direction:     {:?}", entry.as_rel_dir)?;
            writeln!(target, "  afi:           {}", entry.afi)?;
            writeln!(target, "  last modified: {}", entry.last_modified)?;
            for (idx, asn) in entry.asns.iter().enumerate() {
                writeln!(target, "  - hop {}: AS{}", idx, asn)?;
            }
        }
        Ok(())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> AsPathList {
        AsPathList::new(
            vec![64500, 64501], AsType::Sequence, AsRelDir::Up, 1
        )
    }

    #[test]
    fn path_id_depends_on_asns_and_type_only() {
        let base = sample();
        let mut other = AsPathList::new(
            vec![64500, 64501], AsType::Sequence, AsRelDir::Down, 2
        );
        other.aspa_result = Verdict::Valid;
        assert_eq!(base.path_id, other.path_id);

        assert_ne!(
            path_id(&[64500, 64501], AsType::Sequence),
            path_id(&[64500, 64501], AsType::Set),
        );
        assert_ne!(
            path_id(&[64500, 64501], AsType::Sequence),
            path_id(&[64501, 64500], AsType::Sequence),
        );
    }

    #[test]
    fn insert_deduplicates() {
        let cache = AsPathCache::new();
        assert_eq!(
            cache.insert(Verdict::Undefined, sample()),
            InsertOutcome::Created
        );
        assert_eq!(
            cache.insert(Verdict::Undefined, sample()),
            InsertOutcome::Exists
        );
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn insert_then_lookup() {
        let cache = AsPathCache::new();
        let entry = sample();
        cache.insert(Verdict::Undefined, entry.clone());
        let mut aspa = Verdict::DoNotUse;
        let found = cache.lookup(entry.path_id, &mut aspa).unwrap();
        assert_eq!(found.asns, entry.asns);
        assert_eq!(found.as_type, entry.as_type);
        assert_eq!(aspa, Verdict::Undefined);
    }

    #[test]
    fn lookup_miss_sets_undefined() {
        let cache = AsPathCache::new();
        let mut aspa = Verdict::Valid;
        assert!(cache.lookup(0xDEAD_BEEF, &mut aspa).is_none());
        assert_eq!(aspa, Verdict::Undefined);
    }

    #[test]
    fn update_aspa_result() {
        let cache = AsPathCache::new();
        let entry = sample();
        let id = entry.path_id;
        cache.insert(Verdict::Undefined, entry);

        assert!(cache.update_aspa_result(id, Verdict::Valid, 100));
        let mut aspa = Verdict::Undefined;
        let found = cache.lookup(id, &mut aspa).unwrap();
        assert_eq!(aspa, Verdict::Valid);
        assert_eq!(found.last_modified, 100);

        // The sentinel refreshes the timestamp but keeps the verdict.
        assert!(cache.update_aspa_result(id, Verdict::DoNotUse, 200));
        let found = cache.lookup(id, &mut aspa).unwrap();
        assert_eq!(found.aspa_result, Verdict::Valid);
        assert_eq!(found.last_modified, 200);

        assert!(!cache.update_aspa_result(0xDEAD_BEEF, Verdict::Valid, 1));
    }

    #[test]
    fn delete_and_count() {
        let cache = AsPathCache::new();
        let entry = sample();
        let id = entry.path_id;
        cache.insert(Verdict::Undefined, entry);
        assert_eq!(cache.count(), 1);
        assert!(cache.delete(id));
        assert!(!cache.delete(id));
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn rejects_empty_path() {
        let cache = AsPathCache::new();
        let entry = AsPathList::new(
            Vec::new(), AsType::Sequence, AsRelDir::Unknown, 1
        );
        assert_eq!(
            cache.insert(Verdict::Undefined, entry), InsertOutcome::Error
        );
    }

    #[test]
    fn sorted_ids_ascend() {
        let cache = AsPathCache::new();
        for asn in [64496u32, 64500, 64510, 65000] {
            cache.insert(Verdict::Undefined, AsPathList::new(
                vec![asn, asn + 1], AsType::Sequence, AsRelDir::Up, 1
            ));
        }
        let ids = cache.sorted_ids();
        assert_eq!(ids.len(), 4);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
