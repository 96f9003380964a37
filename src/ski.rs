//! The SKI cache.
//!
//! The cache links BGPsec updates to the router keys their signatures
//! depend on. It is keyed by the triple of AS number, subject key
//! identifier, and algorithm identifier. For each triple it keeps a
//! count of registered router keys plus the set of updates whose
//! signature blocks reference the triple. When keys for a triple appear
//! or disappear, every attached update lands in the change queue so the
//! coordinator can re-validate it.
//!
//! Since the AS number space is sparsely populated at the top, the index
//! splits the AS number into its upper and lower sixteen bits. The outer
//! level is an ordered list of nodes, one per occupied upper half. Each
//! node carries a directly indexed array of 65 536 slots over the lower
//! half. A slot holds an ordered list of buckets by algorithm
//! identifier, and each bucket an ordered list of entries by SKI.
//!
//! All public operations take the single cache-level lock. Change
//! events are queued only after the lock has been released again.

use std::fmt;
use std::sync::Arc;
use log::warn;
use crate::bgpsec::{BgpsecPath, SKI_LENGTH};
use crate::queue::{ChangeQueue, ChangeReason};
use crate::update::{CompareMode, UpdateId};
use crate::utils::sync::Mutex;

/// A subject key identifier.
pub type Ski = [u8; SKI_LENGTH];

/// The number of directly indexed slots over the lower half of an ASN.
const AS2_SLOTS: usize = 65536;


//------------ RegisterOutcome -----------------------------------------------

/// The outcome of registering an update with the cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterOutcome {
    /// At least one key is missing in every signature block.
    ///
    /// Cryptographic validation cannot possibly succeed, so the path
    /// verdict is invalid without running the crypto.
    Invalid,

    /// At least one signature block has all its keys registered.
    ///
    /// The actual verdict can only be determined by a full
    /// cryptographic path validation.
    Unknown,
}


//------------ CacheInfo -----------------------------------------------------

/// Statistics about the content of the SKI cache.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheInfo {
    /// The number of nodes, one per occupied upper ASN half.
    pub nodes: u32,

    /// The number of occupied lower-half slots.
    pub as2_slots: u32,

    /// The number of algorithm buckets.
    pub algo_buckets: u32,

    /// The number of cache entries, i.e., distinct key triples.
    pub entries: u32,

    /// The number of unique update references across all entries.
    pub update_refs: u32,

    /// The sum of all key counters.
    pub total_keys: u32,

    /// The sum of all update registration counters.
    pub total_updates: u32,
}


//------------ CleanMode -----------------------------------------------------

/// What to remove when cleaning the cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CleanMode {
    /// Drop all key registrations.
    Keys,

    /// Drop all update registrations.
    Updates,

    /// Truncate the complete cache.
    All,

    /// Only remove empty shell structures.
    Gc,
}


//------------ UpdateRef -----------------------------------------------------

/// A reference from a cache entry to a registered update.
#[derive(Clone, Copy, Debug)]
struct UpdateRef {
    /// The ID of the update.
    id: UpdateId,

    /// How often the update has been registered.
    ///
    /// An update announced several times has to be unregistered just as
    /// often before the reference disappears.
    counter: u16,
}


//------------ Entry ---------------------------------------------------------

/// The cache entry for one key triple.
#[derive(Clone, Debug)]
struct Entry {
    /// The full AS number of the triple.
    asn: u32,

    /// The subject key identifier of the triple.
    ski: Ski,

    /// The number of router keys registered for the triple.
    ///
    /// A value above one means colliding keys: each candidate key has
    /// to be tried during cryptographic validation.
    key_count: u16,

    /// The updates whose signatures reference the triple.
    ///
    /// Ordered by the path scope of the update ID.
    updates: Vec<UpdateRef>,
}

impl Entry {
    fn new(asn: u32, ski: Ski) -> Self {
        Entry { asn, ski, key_count: 0, updates: Vec::new() }
    }

    /// An entry with neither keys nor updates must be removed.
    fn is_empty(&self) -> bool {
        self.key_count == 0 && self.updates.is_empty()
    }

    /// Attaches an update, counting repeated registrations.
    fn attach(&mut self, update_id: UpdateId) {
        match self.find(&update_id) {
            Ok(idx) => self.updates[idx].counter += 1,
            Err(idx) => {
                self.updates.insert(
                    idx, UpdateRef { id: update_id, counter: 1 }
                )
            }
        }
    }

    /// Looks up an update reference in path scope.
    fn find(&self, update_id: &UpdateId) -> Result<usize, usize> {
        self.updates.binary_search_by(|item| {
            item.id.compare(update_id, CompareMode::Path)
        })
    }
}


//------------ AlgoBucket ----------------------------------------------------

/// The entries of one algorithm identifier under one AS number.
#[derive(Clone, Debug)]
struct AlgoBucket {
    /// The algorithm identifier.
    algo_id: u8,

    /// The entries of the bucket, ordered by SKI.
    entries: Vec<Entry>,
}


//------------ Node ----------------------------------------------------------

/// The cache node for one upper ASN half.
#[derive(Clone, Debug)]
struct Node {
    /// The upper sixteen bits of all AS numbers below this node.
    upper: u16,

    /// One slot per lower half value, ordered by algorithm identifier.
    slots: Vec<Vec<AlgoBucket>>,
}

impl Node {
    fn new(upper: u16) -> Self {
        Node { upper, slots: vec![Vec::new(); AS2_SLOTS] }
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_empty())
    }
}


//------------ SkiCache ------------------------------------------------------

/// The SKI cache proper.
#[derive(Debug)]
pub struct SkiCache {
    /// The queue receiving change events for attached updates.
    queue: Arc<ChangeQueue>,

    /// The ordered list of cache nodes.
    nodes: Mutex<Vec<Node>>,
}

impl SkiCache {
    /// Creates a new cache queueing change events into `queue`.
    pub fn new(queue: Arc<ChangeQueue>) -> Self {
        SkiCache { queue, nodes: Mutex::new(Vec::new()) }
    }

    /// Registers a router key for the given triple.
    ///
    /// If updates are attached to the triple, a key change event is
    /// queued for each of them. This happens not only for the first
    /// key: with colliding keys every additional candidate could switch
    /// a previously invalid validation to valid.
    pub fn register_key(&self, asn: u32, ski: &Ski, algo_id: u8) {
        let mut notify = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            let entry = get_or_create(&mut nodes, asn, ski, algo_id);
            entry.key_count += 1;
            notify.extend(entry.updates.iter().map(|item| item.id));
        }
        for id in notify {
            self.queue.enqueue(ChangeReason::KEY, id);
        }
    }

    /// Removes one key registration from the given triple.
    ///
    /// Attached updates receive a key change event. If the triple ends
    /// up without keys and without updates, its entry is removed.
    pub fn unregister_key(&self, asn: u32, ski: &Ski, algo_id: u8) {
        let mut notify = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            let remove = match get(&mut nodes, asn, ski, algo_id) {
                Some(entry) if entry.key_count > 0 => {
                    entry.key_count -= 1;
                    if entry.updates.is_empty() {
                        entry.key_count == 0
                    }
                    else {
                        notify.extend(
                            entry.updates.iter().map(|item| item.id)
                        );
                        false
                    }
                }
                _ => {
                    warn!(
                        "Attempt to unregister a key for AS{} that was \
                         not previously registered.",
                        asn
                    );
                    false
                }
            };
            if remove {
                remove_entry(&mut nodes, asn, ski, algo_id);
            }
        }
        for id in notify {
            self.queue.enqueue(ChangeReason::KEY, id);
        }
    }

    /// Registers an update with every key triple its signatures use.
    ///
    /// Returns [`RegisterOutcome::Unknown`] if at least one signature
    /// block has keys registered for all its triples, i.e., the verdict
    /// needs full cryptographic validation. Returns
    /// [`RegisterOutcome::Invalid`] otherwise, in particular for an
    /// attribute without signature blocks. No change events are queued.
    pub fn register_update(
        &self, update_id: UpdateId, path: &BgpsecPath
    ) -> RegisterOutcome {
        let mut nodes = self.nodes.lock();
        let mut keyed_block = false;
        for block in path.blocks() {
            let mut all_keys = true;
            for (asn, ski, algo_id) in path.block_keys(block) {
                let entry = get_or_create(&mut nodes, asn, ski, algo_id);
                if entry.key_count == 0 {
                    all_keys = false;
                }
                entry.attach(update_id);
            }
            if all_keys {
                keyed_block = true;
            }
        }
        if path.blocks().is_empty() || !keyed_block {
            RegisterOutcome::Invalid
        }
        else {
            RegisterOutcome::Unknown
        }
    }

    /// Checks key presence for a path without registering anything.
    ///
    /// This is the read-only variant of
    /// [`register_update`][Self::register_update], used when an already
    /// registered update needs to be re-validated after a key change.
    pub fn verify_keys(&self, path: &BgpsecPath) -> RegisterOutcome {
        let mut nodes = self.nodes.lock();
        let mut keyed_block = false;
        for block in path.blocks() {
            let mut all_keys = true;
            for (asn, ski, algo_id) in path.block_keys(block) {
                match get(&mut nodes, asn, ski, algo_id) {
                    Some(entry) if entry.key_count > 0 => { }
                    _ => all_keys = false
                }
            }
            if all_keys {
                keyed_block = true;
            }
        }
        if path.blocks().is_empty() || !keyed_block {
            RegisterOutcome::Invalid
        }
        else {
            RegisterOutcome::Unknown
        }
    }

    /// Removes an update registration made with the same path.
    ///
    /// The per-entry registration counter is decremented; the reference
    /// disappears when it reaches zero. Entries left with neither keys
    /// nor updates are removed. Returns whether every triple of the
    /// path actually had a matching registration.
    pub fn unregister_update(
        &self, update_id: UpdateId, path: &BgpsecPath
    ) -> bool {
        let mut nodes = self.nodes.lock();
        let mut complete = true;
        for block in path.blocks() {
            for (asn, ski, algo_id) in path.block_keys(block) {
                let mut remove = false;
                match get(&mut nodes, asn, ski, algo_id) {
                    Some(entry) => {
                        match entry.find(&update_id) {
                            Ok(idx) => {
                                entry.updates[idx].counter -= 1;
                                if entry.updates[idx].counter == 0 {
                                    entry.updates.remove(idx);
                                }
                                remove = entry.is_empty();
                            }
                            Err(_) => {
                                warn!(
                                    "No registration of update {} for \
                                     a key of AS{}.",
                                    update_id, asn
                                );
                                complete = false;
                            }
                        }
                    }
                    None => {
                        warn!(
                            "No key entry for AS{} while unregistering \
                             update {}.",
                            asn, update_id
                        );
                        complete = false;
                    }
                }
                if remove {
                    remove_entry(&mut nodes, asn, ski, algo_id);
                }
            }
        }
        complete
    }

    /// Cleans the cache.
    ///
    /// Depending on the mode this drops all key registrations, all
    /// update registrations, or everything. [`CleanMode::Gc`] only
    /// removes empty shell structures left behind by earlier removals.
    ///
    /// Cleaning never queues change events. Use with caution.
    pub fn clean(&self, mode: CleanMode) {
        let mut nodes = self.nodes.lock();
        match mode {
            CleanMode::All => {
                nodes.clear();
                return
            }
            CleanMode::Keys => {
                for_each_entry(&mut nodes, |entry| entry.key_count = 0);
            }
            CleanMode::Updates => {
                for_each_entry(&mut nodes, |entry| entry.updates.clear());
            }
            CleanMode::Gc => { }
        }
        sweep(&mut nodes);
    }

    /// Collects statistics about the cache content.
    pub fn examine(&self) -> CacheInfo {
        let nodes = self.nodes.lock();
        let mut info = CacheInfo::default();
        for node in nodes.iter() {
            info.nodes += 1;
            for slot in node.slots.iter().filter(|slot| !slot.is_empty()) {
                info.as2_slots += 1;
                for bucket in slot {
                    info.algo_buckets += 1;
                    for entry in &bucket.entries {
                        info.entries += 1;
                        info.total_keys += u32::from(entry.key_count);
                        for item in &entry.updates {
                            info.update_refs += 1;
                            info.total_updates += u32::from(item.counter);
                        }
                    }
                }
            }
        }
        info
    }

    /// Writes an XML-shaped dump of the cache content.
    ///
    /// Useful for diagnostics and integration-style tests.
    pub fn write_xml<W: fmt::Write>(
        &self, target: &mut W
    ) -> Result<(), fmt::Error> {
        let nodes = self.nodes.lock();
        writeln!(target, "<ski-cache>")?;
        for node in nodes.iter() {
            writeln!(
                target, "  <node upper=\"0x{:04X}\">", node.upper
            )?;
            for (as2, slot) in node.slots.iter().enumerate() {
                if slot.is_empty() {
                    continue
                }
                writeln!(target, "    <as2 lower=\"0x{:04X}\">", as2)?;
                for bucket in slot {
                    writeln!(
                        target,
                        "      <algo id=\"{}\">", bucket.algo_id
                    )?;
                    for entry in &bucket.entries {
                        writeln!(
                            target,
                            "        <entry asn=\"{}\" keys=\"{}\">",
                            entry.asn, entry.key_count
                        )?;
                        write!(target, "          <ski>")?;
                        for byte in &entry.ski {
                            write!(target, "{:02X}", byte)?;
                        }
                        writeln!(target, "</ski>")?;
                        for item in &entry.updates {
                            writeln!(
                                target,
                                "          <update id=\"{}\" \
                                 counter=\"{}\"/>",
                                item.id, item.counter
                            )?;
                        }
                        writeln!(target, "        </entry>")?;
                    }
                    writeln!(target, "      </algo>")?;
                }
                writeln!(target, "    </as2>")?;
            }
            writeln!(target, "  </node>")?;
        }
        writeln!(target, "</ski-cache>")
    }
}


//------------ Index plumbing ------------------------------------------------

/// Returns the entry for a triple, creating the path to it if needed.
fn get_or_create<'a>(
    nodes: &'a mut Vec<Node>, asn: u32, ski: &Ski, algo_id: u8
) -> &'a mut Entry {
    let upper = (asn >> 16) as u16;
    let as2 = (asn & 0xFFFF) as usize;
    let node_idx = match nodes.binary_search_by_key(
        &upper, |node| node.upper
    ) {
        Ok(idx) => idx,
        Err(idx) => {
            nodes.insert(idx, Node::new(upper));
            idx
        }
    };
    let slot = &mut nodes[node_idx].slots[as2];
    let bucket_idx = match slot.binary_search_by_key(
        &algo_id, |bucket| bucket.algo_id
    ) {
        Ok(idx) => idx,
        Err(idx) => {
            slot.insert(
                idx, AlgoBucket { algo_id, entries: Vec::new() }
            );
            idx
        }
    };
    let entries = &mut slot[bucket_idx].entries;
    let entry_idx = match entries.binary_search_by(
        |entry| entry.ski.cmp(ski)
    ) {
        Ok(idx) => idx,
        Err(idx) => {
            entries.insert(idx, Entry::new(asn, *ski));
            idx
        }
    };
    &mut entries[entry_idx]
}

/// Returns the entry for a triple if it exists.
fn get<'a>(
    nodes: &'a mut Vec<Node>, asn: u32, ski: &Ski, algo_id: u8
) -> Option<&'a mut Entry> {
    let upper = (asn >> 16) as u16;
    let as2 = (asn & 0xFFFF) as usize;
    let node_idx = nodes.binary_search_by_key(
        &upper, |node| node.upper
    ).ok()?;
    let slot = &mut nodes[node_idx].slots[as2];
    let bucket_idx = slot.binary_search_by_key(
        &algo_id, |bucket| bucket.algo_id
    ).ok()?;
    let entries = &mut slot[bucket_idx].entries;
    let entry_idx = entries.binary_search_by(
        |entry| entry.ski.cmp(ski)
    ).ok()?;
    Some(&mut entries[entry_idx])
}

/// Removes the entry for a triple.
///
/// Empty buckets, slots, and nodes are left behind as shells; they are
/// collected by [`SkiCache::clean`].
fn remove_entry(
    nodes: &mut Vec<Node>, asn: u32, ski: &Ski, algo_id: u8
) {
    let upper = (asn >> 16) as u16;
    let as2 = (asn & 0xFFFF) as usize;
    let node_idx = match nodes.binary_search_by_key(
        &upper, |node| node.upper
    ) {
        Ok(idx) => idx,
        Err(_) => return
    };
    let slot = &mut nodes[node_idx].slots[as2];
    let bucket_idx = match slot.binary_search_by_key(
        &algo_id, |bucket| bucket.algo_id
    ) {
        Ok(idx) => idx,
        Err(_) => return
    };
    let entries = &mut slot[bucket_idx].entries;
    if let Ok(idx) = entries.binary_search_by(
        |entry| entry.ski.cmp(ski)
    ) {
        entries.remove(idx);
    }
}

/// Applies `op` to every entry of the cache.
fn for_each_entry<F: FnMut(&mut Entry)>(nodes: &mut Vec<Node>, mut op: F) {
    for node in nodes.iter_mut() {
        for slot in node.slots.iter_mut() {
            for bucket in slot.iter_mut() {
                for entry in bucket.entries.iter_mut() {
                    op(entry)
                }
            }
        }
    }
}

/// Drops empty entries, buckets, and nodes.
fn sweep(nodes: &mut Vec<Node>) {
    for node in nodes.iter_mut() {
        for slot in node.slots.iter_mut() {
            for bucket in slot.iter_mut() {
                bucket.entries.retain(|entry| !entry.is_empty());
            }
            slot.retain(|bucket| !bucket.entries.is_empty());
        }
    }
    nodes.retain(|node| !node.is_empty());
}


//============ Tests =========================================================
