//! The change queue.
//!
//! Whenever an RPKI-derived input changes in a way that may affect the
//! verdict of a registered update, the responsible cache drops the
//! update’s ID into this queue together with the reason for the change.
//! A single consumer, the coordinator’s notifier thread, drains the
//! queue and re-validates whatever the reason indicates.
//!
//! Each update appears in the queue at most once. Queueing an update
//! that is already present merges the new reason into the stored one,
//! so a consumer sees one notification carrying the union of all events
//! that happened since the last drain.

use std::collections::VecDeque;
use std::sync::Condvar;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use bitflags::bitflags;
use log::error;
use crate::update::{CompareMode, UpdateId};
use crate::utils::sync::Mutex;


bitflags! {
    /// The kind of RPKI change that affects an update.
    ///
    /// Reasons form a bit set; merged queue entries carry the union.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ChangeReason: u8 {
        /// A ROA was announced or withdrawn.
        const ROA = 0x01;

        /// A router key was announced or withdrawn.
        const KEY = 0x02;

        /// An ASPA object changed.
        const ASPA = 0x04;
    }
}


//------------ ChangeEvent ---------------------------------------------------

/// A queued change affecting one update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChangeEvent {
    /// The affected update.
    pub update_id: UpdateId,

    /// What happened. Possibly several things.
    pub reason: ChangeReason,
}


//------------ ChangeQueue ---------------------------------------------------

/// A FIFO of change events with per-update uniqueness.
#[derive(Debug)]
pub struct ChangeQueue {
    /// The queued events, head at the front.
    entries: Mutex<VecDeque<ChangeEvent>>,

    /// Signalled whenever an event is appended.
    more: Condvar,

    /// The current number of entries.
    ///
    /// Kept outside the lock so [`len`][Self::len] is a point-in-time
    /// read that does not synchronize with concurrent producers.
    len: AtomicUsize,

    /// How long a producer may wait for the lock before giving up.
    lock_timeout: Duration,
}

impl ChangeQueue {
    /// Creates a new, empty queue.
    ///
    /// Producers that cannot acquire the queue lock within
    /// `lock_timeout` log an error and drop the event instead of
    /// blocking indefinitely behind a stalled consumer.
    pub fn new(lock_timeout: Duration) -> Self {
        ChangeQueue {
            entries: Mutex::new(VecDeque::new()),
            more: Condvar::new(),
            len: AtomicUsize::new(0),
            lock_timeout,
        }
    }

    /// Queues a change event for an update.
    ///
    /// If the update is already queued, the reasons are merged and the
    /// entry keeps its queue position. The comparison happens in path
    /// scope since path validation events are what flip verdicts.
    /// Returns whether the event was accepted.
    pub fn enqueue(
        &self, reason: ChangeReason, update_id: UpdateId
    ) -> bool {
        let mut entries = match self.entries.lock_timeout(self.lock_timeout) {
            Some(entries) => entries,
            None => {
                error!(
                    "change queue: dropping event for update {} \
                     (lock timeout)",
                    update_id
                );
                return false
            }
        };
        for entry in entries.iter_mut() {
            if entry.update_id.matches(&update_id, CompareMode::Path) {
                entry.reason |= reason;
                return true
            }
        }
        entries.push_back(ChangeEvent { update_id, reason });
        self.len.fetch_add(1, Ordering::Relaxed);
        self.more.notify_one();
        true
    }

    /// Removes and returns the head of the queue.
    pub fn dequeue(&self) -> Option<ChangeEvent> {
        let mut entries = self.entries.lock();
        let res = entries.pop_front();
        if res.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        res
    }

    /// Waits for an event, up to the given duration.
    ///
    /// Returns the head of the queue or `None` if the queue stayed
    /// empty for the whole duration.
    pub fn wait(&self, timeout: Duration) -> Option<ChangeEvent> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            let (guard, _) = self.more.wait_timeout(
                entries, timeout
            ).expect("waiting on a poisoned queue lock");
            entries = guard;
        }
        let res = entries.pop_front();
        if res.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        res
    }

    /// Returns the number of queued events.
    ///
    /// This is a point-in-time value. It may be stale by the time the
    /// caller looks at it, which is fine since it can change right after
    /// retrieval anyway.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all queued events.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.len.store(0, Ordering::Relaxed);
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use crate::update::Prefix;
    use super::*;

    fn queue() -> ChangeQueue {
        ChangeQueue::new(Duration::from_millis(100))
    }

    fn update(origin: u32, blob: &[u8]) -> UpdateId {
        let prefix: Prefix = "192.0.2.0/24".parse().unwrap();
        UpdateId::fingerprint(origin, &prefix, blob)
    }

    #[test]
    fn merges_reasons_for_same_update() {
        let queue = queue();
        let u7 = update(64507, b"update seven");
        assert!(queue.enqueue(ChangeReason::ROA, u7));
        assert!(queue.enqueue(ChangeReason::KEY, u7));
        assert!(queue.enqueue(ChangeReason::ASPA, u7));
        assert_eq!(queue.len(), 1);
        let event = queue.dequeue().unwrap();
        assert_eq!(event.update_id, u7);
        assert_eq!(
            event.reason,
            ChangeReason::ROA | ChangeReason::KEY | ChangeReason::ASPA
        );
        assert_eq!(event.reason.bits(), 7);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn fifo_between_distinct_updates() {
        let queue = queue();
        let first = update(64500, b"first");
        let second = update(64501, b"second");
        let third = update(64502, b"third");
        queue.enqueue(ChangeReason::KEY, first);
        queue.enqueue(ChangeReason::ROA, second);
        queue.enqueue(ChangeReason::ROA, first);
        queue.enqueue(ChangeReason::ASPA, third);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().unwrap().update_id, first);
        assert_eq!(queue.dequeue().unwrap().update_id, second);
        assert_eq!(queue.dequeue().unwrap().update_id, third);
    }

    #[test]
    fn size_bounded_by_distinct_updates() {
        let queue = queue();
        let updates = [
            update(64500, b"a"), update(64501, b"b"), update(64502, b"c"),
        ];
        for round in 0..5 {
            for update in &updates {
                let reason = if round % 2 == 0 {
                    ChangeReason::ROA
                }
                else {
                    ChangeReason::KEY
                };
                queue.enqueue(reason, *update);
            }
        }
        assert!(queue.len() <= updates.len());
        for update in &updates {
            let event = queue.dequeue().unwrap();
            assert_eq!(event.update_id, *update);
            assert_eq!(event.reason, ChangeReason::ROA | ChangeReason::KEY);
        }
    }

    #[test]
    fn clear_empties_the_queue() {
        let queue = queue();
        queue.enqueue(ChangeReason::ROA, update(64500, b"a"));
        queue.enqueue(ChangeReason::ROA, update(64501, b"b"));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn wait_sees_concurrent_enqueue() {
        let queue = Arc::new(queue());
        let producer = queue.clone();
        let id = update(64500, b"late");
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.enqueue(ChangeReason::KEY, id);
        });
        let event = queue.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(event.update_id, id);
        handle.join().unwrap();
    }
}
