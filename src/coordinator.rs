//! The validation coordinator.
//!
//! The coordinator ties the caches together. It ingests verify requests
//! from proxies, consults the origin oracle, the SKI cache, the AS path
//! cache, and the ASPA store, reports the initial verdicts, and keeps
//! the update subscribed for change notifications. It also hosts the
//! notifier thread that drains the change queue and pushes fresh
//! verdicts to the routers that announced an affected update.
//!
//! The cryptographic verifier and the prefix-origin oracle are external
//! collaborators. They are injected at construction time and the
//! coordinator never looks them up anywhere else.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, error, info, warn};
use crate::aspa::AspaStore;
use crate::bgpsec::BgpsecPath;
use crate::error::Failed;
use crate::pathlist::{AsPathCache, AsPathList, AsRelDir, AsType};
use crate::proxy::{
    ErrorCode, ProxyId, ProxyMessage, ProxyRegistry, ProxyReply,
    ResultType, SrxResult, VerifyFlags, VerifyNotify, VerifyRequest,
};
use crate::queue::{ChangeEvent, ChangeQueue, ChangeReason};
use crate::ski::{RegisterOutcome, SkiCache};
use crate::update::{Prefix, UpdateId, Verdict};
use crate::utils::sync::Mutex;


//------------ OriginOracle --------------------------------------------------

/// Looks up prefix-origin authorization.
///
/// This is the interface to the prefix cache fed from the RPKI side.
pub trait OriginOracle: Send + Sync {
    /// Returns the origin validation verdict for an announcement.
    ///
    /// The result is one of valid, not-found, or invalid.
    fn prefix_lookup(&self, origin_as: u32, prefix: &Prefix) -> Verdict;
}


//------------ PathVerifier --------------------------------------------------

/// Performs the actual BGPsec cryptography.
///
/// The verifier owns its key material; the SKI cache only tracks which
/// keys exist, not their bytes.
pub trait PathVerifier: Send + Sync {
    /// Cryptographically validates a path. Returns valid or invalid.
    fn verify(&self, path: &BgpsecPath) -> Verdict;

    /// Signs a path towards a peer, returning the new attribute.
    fn sign(
        &self, path: &BgpsecPath, peer_as: u32, prepend_count: u8
    ) -> Option<Vec<u8>>;
}


//------------ NotificationSink ----------------------------------------------

/// Receives replies destined for a proxy.
///
/// The transport that frames and sends them is outside this crate.
pub trait NotificationSink: Send + Sync {
    /// Delivers a reply to the given proxy.
    fn notify(&self, proxy: ProxyId, reply: ProxyReply);
}


//------------ UpdateEntry ---------------------------------------------------

/// Everything the coordinator remembers about a registered update.
#[derive(Clone, Debug)]
struct UpdateEntry {
    /// The fingerprint of the update.
    update_id: UpdateId,

    /// The announced prefix.
    prefix: Prefix,

    /// The origin AS.
    origin_as: u32,

    /// The raw BGPsec_PATH attribute, if any.
    bgpsec: Option<Bytes>,

    /// The ID of the update’s path in the AS path cache.
    path_id: Option<u32>,

    /// The verdicts last reported for the update.
    result: SrxResult,

    /// The proxies that announced the update.
    proxies: Vec<ProxyId>,
}


//------------ Coordinator ---------------------------------------------------

/// The validation coordinator proper.
pub struct Coordinator {
    /// The SKI cache.
    ski: Arc<SkiCache>,

    /// The AS path cache.
    paths: Arc<AsPathCache>,

    /// The ASPA store.
    aspa: Arc<AspaStore>,

    /// The change queue drained by the notifier.
    queue: Arc<ChangeQueue>,

    /// The prefix-origin oracle.
    origins: Arc<dyn OriginOracle>,

    /// The cryptographic verifier.
    crypto: Arc<dyn PathVerifier>,

    /// Where replies to proxies go.
    sink: Arc<dyn NotificationSink>,

    /// The connected proxies.
    proxies: ProxyRegistry,

    /// The registered updates by their full fingerprint.
    updates: Mutex<HashMap<u32, UpdateEntry>>,

    /// How long the notifier waits for queue events per round.
    poll_interval: Duration,

    /// Cleared to make the notifier thread wind down.
    running: AtomicBool,
}

impl Coordinator {
    /// Creates a coordinator from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ski: Arc<SkiCache>,
        paths: Arc<AsPathCache>,
        aspa: Arc<AspaStore>,
        queue: Arc<ChangeQueue>,
        origins: Arc<dyn OriginOracle>,
        crypto: Arc<dyn PathVerifier>,
        sink: Arc<dyn NotificationSink>,
        keep_window: u16,
        poll_interval: Duration,
    ) -> Self {
        Coordinator {
            ski, paths, aspa, queue, origins, crypto, sink,
            proxies: ProxyRegistry::new(keep_window),
            updates: Mutex::new(HashMap::new()),
            poll_interval,
            running: AtomicBool::new(true),
        }
    }

    /// Returns the change queue used by the coordinator.
    pub fn queue(&self) -> &Arc<ChangeQueue> {
        &self.queue
    }

    /// Dispatches a decoded proxy message.
    ///
    /// Anything the message produces beyond the hello response and the
    /// verify receipt arrives through the notification sink.
    pub fn handle(&self, proxy_id: ProxyId, message: ProxyMessage) {
        match message {
            ProxyMessage::Hello { proxy_as, peer_asns } => {
                let reply = self.hello(proxy_id, proxy_as, peer_asns);
                self.sink.notify(proxy_id, reply);
            }
            ProxyMessage::Verify(request) => {
                self.verify(proxy_id, request);
            }
            ProxyMessage::Sign { update_id, prepend_count, peer_as } => {
                self.sign(proxy_id, update_id, prepend_count, peer_as);
            }
            ProxyMessage::Delete { keep_window, update_id } => {
                self.delete_update(proxy_id, keep_window, update_id);
            }
            ProxyMessage::Goodbye { keep_window } => {
                self.goodbye(proxy_id, keep_window);
            }
        }
    }

    /// Handles a proxy hello.
    pub fn hello(
        &self, proxy_id: ProxyId, proxy_as: u32, peer_asns: Vec<u32>
    ) -> ProxyReply {
        match self.proxies.hello(proxy_id, proxy_as, peer_asns) {
            Ok(keep_window) => {
                info!("Proxy {} connected for AS{}.", proxy_id, proxy_as);
                ProxyReply::HelloResponse { keep_window }
            }
            Err(code) => {
                warn!("Proxy {} rejected: {}.", proxy_id, code);
                ProxyReply::Error { code, sub: 0 }
            }
        }
    }

    /// Handles a proxy goodbye.
    ///
    /// The proxy’s subscriptions are dropped. Update registrations stay
    /// around until they are explicitly deleted.
    pub fn goodbye(&self, proxy_id: ProxyId, _keep_window: u16) {
        if !self.proxies.goodbye(proxy_id) {
            warn!("Goodbye from unknown proxy {}.", proxy_id);
            return
        }
        let mut updates = self.updates.lock();
        for entry in updates.values_mut() {
            entry.proxies.retain(|id| *id != proxy_id);
        }
        info!("Proxy {} disconnected.", proxy_id);
    }

    /// Handles a verify request.
    ///
    /// Computes the update fingerprint, performs whatever validation
    /// the request flags ask for, subscribes the update for change
    /// notifications, and returns the initial verdicts. The same
    /// notification is pushed through the sink; if the request asks for
    /// a receipt it carries the router’s local ID so the router learns
    /// the update ID.
    pub fn verify(
        &self, proxy_id: ProxyId, request: VerifyRequest
    ) -> VerifyNotify {
        let update_id = Self::fingerprint(&request);
        let mut result = request.default_result;
        let mut result_type = ResultType::empty();
        let mut path_id = None;

        if request.flags.contains(VerifyFlags::ORIGIN) {
            result.origin = self.origins.prefix_lookup(
                request.origin_as, &request.prefix
            );
            result_type |= ResultType::ORIGIN;
        }

        if request.flags.contains(VerifyFlags::PATH) {
            result_type |= ResultType::PATH | ResultType::ASPA;
            match request.bgpsec.as_ref() {
                Some(attr) => match BgpsecPath::parse(attr) {
                    Ok(path) => {
                        result.path = match self.ski.register_update(
                            update_id, &path
                        ) {
                            RegisterOutcome::Invalid => Verdict::Invalid,
                            RegisterOutcome::Unknown => {
                                self.crypto.verify(&path)
                            }
                        };
                        path_id = Some(self.evaluate_aspa(
                            &path.asns(), &request, &mut result
                        ));
                    }
                    Err(err) => {
                        warn!("Update {}: {}", update_id, err);
                        result.path = Verdict::Invalid;
                    }
                }
                None => {
                    // A plain BGP4 update. There is no path to verify
                    // cryptographically but ASPA can still run over the
                    // AS path.
                    result.path = Verdict::Undefined;
                    if !request.as_path.is_empty() {
                        path_id = Some(self.evaluate_aspa(
                            &request.as_path, &request, &mut result
                        ));
                    }
                }
            }
        }

        {
            let mut updates = self.updates.lock();
            let entry = updates.entry(update_id.as_u32()).or_insert_with(
                || {
                    UpdateEntry {
                        update_id,
                        prefix: request.prefix,
                        origin_as: request.origin_as,
                        bgpsec: None,
                        path_id: None,
                        result,
                        proxies: Vec::new(),
                    }
                }
            );
            if let Some(attr) = request.bgpsec.as_ref() {
                entry.bgpsec = Some(attr.clone());
            }
            if path_id.is_some() {
                entry.path_id = path_id;
            }
            entry.result = result;
            if !entry.proxies.contains(&proxy_id) {
                entry.proxies.push(proxy_id);
            }
        }

        let notify = VerifyNotify {
            update_id,
            local_id: if request.flags.contains(VerifyFlags::RECEIPT) {
                Some(request.local_id)
            }
            else {
                None
            },
            result_type,
            result: result.publishable(),
        };
        self.sink.notify(proxy_id, ProxyReply::VerifyNotify(notify));
        notify
    }

    /// Handles a delete request for an update.
    ///
    /// Removes one registration from the SKI cache, mirroring the
    /// registration done by the verify that announced it, and drops
    /// the proxy’s subscription. The keep window has no effect on the
    /// in-memory caches.
    pub fn delete_update(
        &self, proxy_id: ProxyId, _keep_window: u16, update_id: u32
    ) {
        let removed = {
            let mut updates = self.updates.lock();
            let found = match updates.get_mut(&update_id) {
                Some(entry) => {
                    entry.proxies.retain(|id| *id != proxy_id);
                    Some((
                        entry.update_id,
                        entry.bgpsec.clone(),
                        entry.proxies.is_empty(),
                    ))
                }
                None => None
            };
            if let Some((_, _, true)) = found {
                updates.remove(&update_id);
            }
            found.map(|(update_id, bgpsec, _)| (update_id, bgpsec))
        };
        match removed {
            Some((update_id, bgpsec)) => {
                if let Some(attr) = bgpsec {
                    match BgpsecPath::parse(&attr) {
                        Ok(path) => {
                            self.ski.unregister_update(update_id, &path);
                        }
                        Err(err) => {
                            error!(
                                "Stored attribute of update {} no longer \
                                 parses: {}",
                                update_id, err
                            );
                        }
                    }
                }
                debug!("Update {} deleted by proxy {}.", update_id, proxy_id);
            }
            None => {
                warn!(
                    "Proxy {} deleted unknown update 0x{:08X}.",
                    proxy_id, update_id
                );
                self.sink.notify(proxy_id, ProxyReply::Error {
                    code: ErrorCode::UnknownUpdate, sub: 0
                });
            }
        }
    }

    /// Handles a sign request.
    ///
    /// The signed attribute is delivered through the sink.
    pub fn sign(
        &self, proxy_id: ProxyId, update_id: u32, prepend_count: u8,
        peer_as: u32,
    ) {
        let stored = {
            let updates = self.updates.lock();
            updates.get(&update_id).map(|entry| {
                (entry.update_id, entry.bgpsec.clone())
            })
        };
        let (update_id, attr) = match stored {
            Some((update_id, Some(attr))) => (update_id, attr),
            _ => {
                self.sink.notify(proxy_id, ProxyReply::Error {
                    code: ErrorCode::UnknownUpdate, sub: 0
                });
                return
            }
        };
        let path = match BgpsecPath::parse(&attr) {
            Ok(path) => path,
            Err(err) => {
                error!(
                    "Stored attribute of update {} no longer parses: {}",
                    update_id, err
                );
                self.sink.notify(proxy_id, ProxyReply::Error {
                    code: ErrorCode::ServerError, sub: 0
                });
                return
            }
        };
        match self.crypto.sign(&path, peer_as, prepend_count) {
            Some(attribute) => {
                self.sink.notify(proxy_id, ProxyReply::SignNotify {
                    update_id, attribute: attribute.into()
                });
            }
            None => {
                self.sink.notify(proxy_id, ProxyReply::Error {
                    code: ErrorCode::UnknownAlgorithm, sub: 0
                });
            }
        }
    }

    /// Reacts to a ROA announcement or withdrawal.
    ///
    /// Every registered update whose prefix is covered by the ROA
    /// prefix may see its origin verdict change and is queued for
    /// re-validation.
    pub fn roa_changed(&self, prefix: &Prefix) {
        let mut affected = Vec::new();
        {
            let updates = self.updates.lock();
            for entry in updates.values() {
                if prefix.covers(&entry.prefix) {
                    affected.push(entry.update_id);
                }
            }
        }
        for update_id in affected {
            self.queue.enqueue(ChangeReason::ROA, update_id);
        }
    }

    /// Reacts to an ASPA change for a customer AS.
    ///
    /// Every registered update whose path contains the customer is
    /// queued for ASPA re-evaluation.
    pub fn aspa_changed(&self, customer: u32) {
        let mut path_ids = Vec::new();
        self.paths.for_paths_with_asn(customer, |entry| {
            path_ids.push(entry.path_id)
        });
        if path_ids.is_empty() {
            return
        }
        let mut affected = Vec::new();
        {
            let updates = self.updates.lock();
            for entry in updates.values() {
                if let Some(path_id) = entry.path_id {
                    if path_ids.contains(&path_id) {
                        affected.push(entry.update_id);
                    }
                }
            }
        }
        for update_id in affected {
            self.queue.enqueue(ChangeReason::ASPA, update_id);
        }
    }

    /// Spawns the notifier thread.
    ///
    /// The thread drains the change queue, re-validates whatever each
    /// event’s reason indicates, and pushes notifications for changed
    /// verdicts. It winds down after [`shutdown`][Self::shutdown] has
    /// been called.
    pub fn spawn_notifier(
        self: Arc<Self>
    ) -> Result<thread::JoinHandle<()>, Failed> {
        thread::Builder::new().name("notifier".into()).spawn(move || {
            while self.running.load(Ordering::Relaxed) {
                if let Some(event) = self.queue.wait(self.poll_interval) {
                    self.process_event(event)
                }
            }
            debug!("Notifier thread winding down.");
        }).map_err(|err| {
            error!("Failed to spawn the notifier thread: {}", err);
            Failed
        })
    }

    /// Makes the notifier thread wind down.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Derives the fingerprint of a verify request.
    fn fingerprint(request: &VerifyRequest) -> UpdateId {
        match request.bgpsec.as_ref() {
            Some(attr) => UpdateId::fingerprint(
                request.origin_as, &request.prefix, attr
            ),
            None => {
                let mut blob = Vec::with_capacity(
                    request.as_path.len() * 4
                );
                for asn in &request.as_path {
                    blob.extend_from_slice(&asn.to_be_bytes());
                }
                UpdateId::fingerprint(
                    request.origin_as, &request.prefix, &blob
                )
            }
        }
    }

    /// Feeds a path into the AS path cache and fills the ASPA verdict.
    ///
    /// Returns the path ID the update is bound to.
    fn evaluate_aspa(
        &self, asns: &[u32], request: &VerifyRequest,
        result: &mut SrxResult,
    ) -> u32 {
        let afi = match request.prefix.addr() {
            IpAddr::V4(_) => 1,
            IpAddr::V6(_) => 2,
        };
        let entry = AsPathList::new(
            asns.to_vec(), AsType::Sequence, AsRelDir::Up, afi
        );
        let path_id = entry.path_id;
        self.paths.insert(request.default_result.aspa, entry);
        let mut memo = Verdict::Undefined;
        self.paths.lookup(path_id, &mut memo);
        if memo == Verdict::Undefined {
            memo = self.aspa.verify(asns, AsType::Sequence, AsRelDir::Up);
            self.paths.update_aspa_result(
                path_id, memo, Utc::now().timestamp()
            );
        }
        result.aspa = memo;
        path_id
    }

    /// Processes one dequeued change event.
    fn process_event(&self, event: ChangeEvent) {
        let snapshot = {
            let updates = self.updates.lock();
            updates.get(&event.update_id.as_u32()).cloned()
        };
        let entry = match snapshot {
            Some(entry) => entry,
            None => {
                debug!(
                    "Dropping change event for unregistered update {}.",
                    event.update_id
                );
                return
            }
        };

        let mut result = entry.result;
        let mut result_type = ResultType::empty();

        if event.reason.contains(ChangeReason::ROA) {
            result.origin = self.origins.prefix_lookup(
                entry.origin_as, &entry.prefix
            );
            result_type |= ResultType::ORIGIN;
        }
        if event.reason.contains(ChangeReason::KEY) {
            if let Some(attr) = entry.bgpsec.as_ref() {
                if let Ok(path) = BgpsecPath::parse(attr) {
                    result.path = match self.ski.verify_keys(&path) {
                        RegisterOutcome::Invalid => Verdict::Invalid,
                        RegisterOutcome::Unknown => {
                            self.crypto.verify(&path)
                        }
                    };
                }
            }
            result_type |= ResultType::PATH;
        }
        if event.reason.contains(ChangeReason::ASPA) {
            if let Some(path_id) = entry.path_id {
                let mut memo = Verdict::Undefined;
                if let Some(list) = self.paths.lookup(path_id, &mut memo) {
                    let verdict = self.aspa.verify(
                        &list.asns, list.as_type, list.as_rel_dir
                    );
                    self.paths.update_aspa_result(
                        path_id, verdict, Utc::now().timestamp()
                    );
                    result.aspa = verdict;
                }
            }
            result_type |= ResultType::ASPA;
        }

        if result == entry.result {
            return
        }
        {
            let mut updates = self.updates.lock();
            if let Some(stored) = updates.get_mut(
                &event.update_id.as_u32()
            ) {
                stored.result = result;
            }
        }
        let notify = VerifyNotify {
            update_id: entry.update_id,
            local_id: None,
            result_type,
            result: result.publishable(),
        };
        for proxy in entry.proxies {
            self.sink.notify(proxy, ProxyReply::VerifyNotify(notify));
        }
    }
}


//============ Default collaborators =========================================

//------------ NotFoundOracle ------------------------------------------------

/// An origin oracle without any data.
///
/// Every lookup comes back not-found. The stand-in until a prefix cache
/// is attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotFoundOracle;

impl OriginOracle for NotFoundOracle {
    fn prefix_lookup(&self, _origin_as: u32, _prefix: &Prefix) -> Verdict {
        Verdict::NotFound
    }
}


//------------ AcceptAllVerifier ---------------------------------------------

/// A path verifier that accepts every path and signs nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllVerifier;

impl PathVerifier for AcceptAllVerifier {
    fn verify(&self, _path: &BgpsecPath) -> Verdict {
        Verdict::Valid
    }

    fn sign(
        &self, _path: &BgpsecPath, _peer_as: u32, _prepend_count: u8
    ) -> Option<Vec<u8>> {
        None
    }
}


//------------ LoggingSink ---------------------------------------------------

/// A notification sink that only logs what it would send.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn notify(&self, proxy: ProxyId, reply: ProxyReply) {
        match reply {
            ProxyReply::VerifyNotify(notify) => {
                info!(
                    "proxy {}: update {} origin={} path={} aspa={}",
                    proxy, notify.update_id, notify.result.origin,
                    notify.result.path, notify.result.aspa
                );
            }
            other => {
                info!("proxy {}: {:?}", proxy, other);
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use crate::bgpsec::{
        PathSegment, SignatureBlock, SignatureSegment, SKI_LENGTH,
    };
    use crate::ski::CacheInfo;
    use crate::utils::sync::Mutex as TestMutex;
    use super::*;

    /// A sink that records everything it is asked to send.
    #[derive(Debug, Default)]
    struct RecordingSink {
        sent: TestMutex<Vec<(ProxyId, ProxyReply)>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<(ProxyId, ProxyReply)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, proxy: ProxyId, reply: ProxyReply) {
            self.sent.lock().push((proxy, reply))
        }
    }

    struct Setup {
        ski: Arc<SkiCache>,
        queue: Arc<ChangeQueue>,
        aspa: Arc<AspaStore>,
        sink: Arc<RecordingSink>,
        coordinator: Arc<Coordinator>,
    }

    fn setup() -> Setup {
        let queue = Arc::new(
            ChangeQueue::new(Duration::from_millis(100))
        );
        let ski = Arc::new(SkiCache::new(queue.clone()));
        let paths = Arc::new(AsPathCache::new());
        let aspa = Arc::new(AspaStore::new());
        let sink = Arc::new(RecordingSink::default());
        let coordinator = Arc::new(Coordinator::new(
            ski.clone(), paths, aspa.clone(), queue.clone(),
            Arc::new(NotFoundOracle), Arc::new(AcceptAllVerifier),
            sink.clone(), 900, Duration::from_millis(50),
        ));
        Setup { ski, queue, aspa, sink, coordinator }
    }

    fn test_attr(hops: &[(u32, u8)]) -> Bytes {
        let mut segments = Vec::new();
        let mut sigs = Vec::new();
        for &(asn, fill) in hops {
            segments.push(PathSegment::new(asn));
            sigs.push(SignatureSegment {
                ski: [fill; SKI_LENGTH],
                signature: vec![fill; 4],
            });
        }
        BgpsecPath::new(
            segments,
            vec![SignatureBlock { algo_id: 1, segments: sigs }]
        ).to_attribute().into()
    }

    fn request(attr: Option<Bytes>) -> VerifyRequest {
        VerifyRequest {
            local_id: 42,
            flags: VerifyFlags::ORIGIN | VerifyFlags::PATH
                | VerifyFlags::RECEIPT,
            default_result: SrxResult::default(),
            prefix: "10.0.0.0/24".parse().unwrap(),
            origin_as: 64500,
            bgpsec: attr,
            as_path: vec![64496, 64500],
        }
    }

    #[test]
    fn verify_without_keys_is_invalid() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, vec![64496]);

        let notify = setup.coordinator.verify(
            1, request(Some(test_attr(&[(64496, 0xAB), (64500, 0xCD)])))
        );
        assert_eq!(notify.result.origin, Verdict::NotFound);
        assert_eq!(notify.result.path, Verdict::Invalid);
        assert_eq!(notify.local_id, Some(42));
        // No attested providers: the path’s ASPA state is unknown.
        assert_eq!(notify.result.aspa, Verdict::Unknown);
        // The receipt went through the sink, too.
        assert_eq!(setup.sink.take().len(), 1);
        // Nothing queued: missing keys alone are no change event.
        assert!(setup.queue.is_empty());
    }

    #[test]
    fn key_arrival_renotifies_router() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, vec![64496]);
        let attr = test_attr(&[(64500, 0xAB)]);
        let notify = setup.coordinator.verify(1, request(Some(attr)));
        assert_eq!(notify.result.path, Verdict::Invalid);
        setup.sink.take();

        // The missing key arrives via RTR.
        setup.ski.register_key(64500, &[0xAB; SKI_LENGTH], 1);
        let event = setup.queue.dequeue().unwrap();
        assert_eq!(event.reason, ChangeReason::KEY);
        setup.coordinator.process_event(event);

        let sent = setup.sink.take();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            ProxyReply::VerifyNotify(sent_notify) => {
                assert_eq!(sent_notify.update_id, notify.update_id);
                assert_eq!(sent_notify.local_id, None);
                assert_eq!(sent_notify.result.path, Verdict::Valid);
                assert!(sent_notify.result_type.contains(ResultType::PATH));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn unchanged_verdict_stays_quiet() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        let attr = test_attr(&[(64500, 0xAB)]);
        setup.coordinator.verify(1, request(Some(attr)));
        setup.sink.take();

        // A ROA event that does not change the origin verdict must not
        // produce a notification.
        setup.coordinator.roa_changed(&"10.0.0.0/16".parse().unwrap());
        let event = setup.queue.dequeue().unwrap();
        assert_eq!(event.reason, ChangeReason::ROA);
        setup.coordinator.process_event(event);
        assert!(setup.sink.take().is_empty());
    }

    #[test]
    fn roa_change_only_hits_covered_updates() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        let mut covered = request(None);
        covered.flags = VerifyFlags::ORIGIN;
        setup.coordinator.verify(1, covered);
        let mut elsewhere = request(None);
        elsewhere.flags = VerifyFlags::ORIGIN;
        elsewhere.prefix = "192.0.2.0/24".parse().unwrap();
        elsewhere.as_path = vec![64497];
        setup.coordinator.verify(1, elsewhere);

        setup.coordinator.roa_changed(&"10.0.0.0/16".parse().unwrap());
        assert_eq!(setup.queue.len(), 1);
    }

    #[test]
    fn delete_unregisters_from_ski_cache() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        let attr = test_attr(&[(64500, 0xAB)]);
        let notify = setup.coordinator.verify(1, request(Some(attr)));
        assert_eq!(setup.ski.examine().update_refs, 1);

        setup.coordinator.delete_update(1, 0, notify.update_id.as_u32());
        assert_eq!(setup.ski.examine().update_refs, 0);
        assert_eq!(setup.ski.examine().entries, 0);

        // Deleting again reports an unknown update.
        setup.sink.take();
        setup.coordinator.delete_update(1, 0, notify.update_id.as_u32());
        let sent = setup.sink.take();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            ProxyReply::Error { code, .. } => {
                assert_eq!(*code, ErrorCode::UnknownUpdate)
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn aspa_change_renotifies() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        let attr = test_attr(&[(64496, 0xAB), (64500, 0xCD)]);
        let notify = setup.coordinator.verify(1, request(Some(attr)));
        assert_eq!(notify.result.aspa, Verdict::Unknown);
        setup.sink.take();

        // The origin now attests its provider.
        setup.aspa.announce(64500, vec![64496]);
        setup.coordinator.aspa_changed(64500);
        let event = setup.queue.dequeue().unwrap();
        assert_eq!(event.reason, ChangeReason::ASPA);
        setup.coordinator.process_event(event);

        let sent = setup.sink.take();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            ProxyReply::VerifyNotify(sent_notify) => {
                assert_eq!(sent_notify.result.aspa, Verdict::Valid);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn dispatch_routes_messages() {
        let setup = setup();
        setup.coordinator.handle(1, ProxyMessage::Hello {
            proxy_as: 64501, peer_asns: Vec::new()
        });
        let sent = setup.sink.take();
        assert!(matches!(
            sent[0].1, ProxyReply::HelloResponse { keep_window: 900 }
        ));

        setup.coordinator.handle(
            1, ProxyMessage::Verify(request(None))
        );
        assert_eq!(setup.sink.take().len(), 1);

        setup.coordinator.handle(
            1, ProxyMessage::Goodbye { keep_window: 0 }
        );
        setup.coordinator.handle(
            1, ProxyMessage::Goodbye { keep_window: 0 }
        );
    }

    #[test]
    fn duplicate_hello_is_an_error() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        match setup.coordinator.hello(1, 64502, Vec::new()) {
            ProxyReply::Error { code, .. } => {
                assert_eq!(code, ErrorCode::DuplicateProxyId)
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn sign_without_crypto_support() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        let notify = setup.coordinator.verify(
            1, request(Some(test_attr(&[(64500, 0xAB)])))
        );
        setup.sink.take();
        setup.coordinator.sign(1, notify.update_id.as_u32(), 1, 64501);
        let sent = setup.sink.take();
        match &sent[0].1 {
            ProxyReply::Error { code, .. } => {
                assert_eq!(*code, ErrorCode::UnknownAlgorithm)
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn malformed_attribute_is_invalid_without_side_effects() {
        let setup = setup();
        setup.coordinator.hello(1, 64501, Vec::new());
        let mut attr = test_attr(&[(64500, 0xAB)]).to_vec();
        attr.truncate(attr.len() - 3);
        let notify = setup.coordinator.verify(
            1, request(Some(attr.into()))
        );
        assert_eq!(notify.result.path, Verdict::Invalid);
        assert_eq!(setup.ski.examine(), CacheInfo::default());
    }
}
