//! Router orchestrator: owns the four tables under one lock, runs the
//! heartbeat and dead-neighbor timers, and drives every update pass.
//!
//! All table mutation happens inside `tables` (a single [`Mutex`]); network
//! I/O (object fetch/produce, sync sends) is never performed while holding
//! it. Follow-up passes triggered by a RIB change run on spawned tasks that
//! re-acquire the lock themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::{ValidatedConfig, COST_INFINITY, ROUTE_ORIGIN};
use crate::executor::{CommandQueue, MgmtCmd, Retry};
use crate::fib::{Fib, FibEntry};
use crate::name::Name;
use crate::neighbors::NeighborTable;
use crate::prefixes::PrefixTable;
use crate::protocols::{
    create_perm_face, AdvertSync, CreatedFace, ForwarderControl, ObjectClient,
    PrefixPublication, PrefixPublicationSender, PrefixSync,
};
use crate::rib::Rib;
use crate::tlv::ControlArgs;

/// `faces/update` flag enabling local fields (incoming face indication).
const FACE_FLAG_LOCAL_FIELDS: u64 = 0x01;

/// Capacity of the prefix publication delivery channel.
const PUBS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

/// Everything guarded by the single table lock.
pub(crate) struct Tables {
    pub neighbors: NeighborTable,
    pub rib: Rib,
    pub fib: Fib,
    pub prefixes: PrefixTable,
    /// Router hash -> name, for active prefix-feed subscriptions.
    pub pfx_subs: HashMap<u64, Name>,
    /// Our advertisement sequence number.
    pub advert_seq: u64,
    /// Prefix publication sequence at the last snapshot.
    pub pfx_snapshot_at: u64,
}

pub(crate) struct RouterInner {
    pub config: Arc<ValidatedConfig>,
    pub forwarder: Arc<dyn ForwarderControl>,
    pub client: Arc<dyn ObjectClient>,
    pub advert_sync: Arc<dyn AdvertSync>,
    pub prefix_sync: Arc<dyn PrefixSync>,
    pub queue: CommandQueue,
    queue_task: Mutex<Option<JoinHandle<()>>>,
    /// Process epoch, distinguishing restarts to peers.
    pub boot_time: u64,
    pub tables: Mutex<Tables>,
    phase: AtomicU8,
    stop: Notify,
    pubs_tx: PrefixPublicationSender,
    pubs_rx: Mutex<Option<mpsc::Receiver<PrefixPublication>>>,
    faces: Mutex<Vec<CreatedFace>>,
}

#[derive(Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(
        config: ValidatedConfig,
        forwarder: Arc<dyn ForwarderControl>,
        client: Arc<dyn ObjectClient>,
        advert_sync: Arc<dyn AdvertSync>,
        prefix_sync: Arc<dyn PrefixSync>,
    ) -> Router {
        let config = Arc::new(config);
        let (queue, queue_task) = CommandQueue::spawn(forwarder.clone());
        let (pubs_tx, pubs_rx) = mpsc::channel(PUBS_CHANNEL_CAPACITY);

        let boot_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let tables = Tables {
            neighbors: NeighborTable::new(config.clone(), queue.clone()),
            rib: Rib::new(),
            fib: Fib::new(queue.clone()),
            prefixes: PrefixTable::new(config.router_name().clone()),
            pfx_subs: HashMap::new(),
            advert_seq: 0,
            pfx_snapshot_at: 0,
        };

        Router {
            inner: Arc::new(RouterInner {
                config,
                forwarder,
                client,
                advert_sync,
                prefix_sync,
                queue,
                queue_task: Mutex::new(Some(queue_task)),
                boot_time,
                tables: Mutex::new(tables),
                phase: AtomicU8::new(Phase::Stopped as u8),
                stop: Notify::new(),
                pubs_tx,
                pubs_rx: Mutex::new(Some(pubs_rx)),
                faces: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.inner.config
    }

    pub fn boot_time(&self) -> u64 {
        self.inner.boot_time
    }

    pub fn phase(&self) -> Phase {
        match self.inner.phase.load(Ordering::SeqCst) {
            1 => Phase::Starting,
            2 => Phase::Running,
            3 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Channel end the transport layer feeds prefix publications into.
    pub fn publication_sender(&self) -> PrefixPublicationSender {
        self.inner.pubs_tx.clone()
    }

    pub(crate) async fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.tables.lock().await
    }

    /// Run the router. Blocks until [`Router::stop`] is called. Only one
    /// start/stop cycle is supported per instance.
    pub async fn start(&self) -> Result<()> {
        if self.phase() != Phase::Stopped {
            bail!("router is not stopped");
        }
        let Some(mut pubs_rx) = self.inner.pubs_rx.lock().await.take() else {
            bail!("router was already started once");
        };

        self.set_phase(Phase::Starting);
        info!(
            network = %self.inner.config.network_name(),
            router = %self.inner.config.router_name(),
            "starting router"
        );

        self.configure_face();
        self.create_faces().await;
        self.register_static_routes();

        // Seed ourselves into the RIB and make the initial advertisement.
        {
            let mut tables = self.tables().await;
            let me = self.inner.config.router_name().clone();
            tables.rib.set(&me, &me, 0);
        }
        self.advert_generate().await;

        // Initialize the prefix table.
        let reset = self.tables().await.prefixes.reset();
        self.publish_prefix_op(reset).await;

        let mut heartbeat = interval(self.inner.config.advertise_interval());
        let mut deadcheck = interval(self.inner.config.router_dead_interval());
        heartbeat.tick().await;
        deadcheck.tick().await;

        self.set_phase(Phase::Running);
        loop {
            tokio::select! {
                _ = heartbeat.tick() => self.send_sync_interests().await,
                _ = deadcheck.tick() => self.check_dead_neighbors().await,
                Some(p) = pubs_rx.recv() => self.on_prefix_publication(p).await,
                _ = self.inner.stop.notified() => break,
            }
        }

        self.set_phase(Phase::Stopping);
        self.destroy_faces().await;
        self.inner.queue.stop();
        if let Some(task) = self.inner.queue_task.lock().await.take() {
            let _ = task.await;
        }
        self.set_phase(Phase::Stopped);
        info!("stopped router");
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.stop.notify_one();
    }

    /// Enable local fields on our forwarder face, so incoming face ids are
    /// reported on sync interests.
    fn configure_face(&self) {
        self.inner.queue.execute(MgmtCmd {
            module: "faces",
            cmd: "update",
            args: ControlArgs {
                mask: Some(FACE_FLAG_LOCAL_FIELDS),
                flags: Some(FACE_FLAG_LOCAL_FIELDS),
                ..Default::default()
            },
            retries: Retry::Infinite,
        });
    }

    /// Create permanent faces to all configured neighbors and point the
    /// active sync route at each.
    async fn create_faces(&self) {
        for neighbor in self.inner.config.neighbors() {
            let face = match create_perm_face(
                self.inner.forwarder.as_ref(),
                &neighbor.uri,
                neighbor.mtu,
            )
            .await
            {
                Ok(face) => face,
                Err(e) => {
                    error!(uri = %neighbor.uri, error = %e, "failed to create face to neighbor");
                    continue;
                }
            };
            info!(uri = %neighbor.uri, face_id = face.face_id, "created face to neighbor");
            self.inner.faces.lock().await.push(face);

            self.inner.queue.execute(MgmtCmd {
                module: "rib",
                cmd: "register",
                args: ControlArgs {
                    name: Some(self.inner.config.advert_sync_active_prefix().clone()),
                    cost: Some(1),
                    origin: Some(ROUTE_ORIGIN),
                    face_id: Some(face.face_id),
                    ..Default::default()
                },
                retries: Retry::Limit(3),
            });
        }
    }

    /// Synchronously tear down neighbor faces at shutdown, bypassing the
    /// queue so completion is observed before returning.
    async fn destroy_faces(&self) {
        let faces = std::mem::take(&mut *self.inner.faces.lock().await);
        for face in faces {
            let args = ControlArgs {
                name: Some(self.inner.config.advert_sync_active_prefix().clone()),
                origin: Some(ROUTE_ORIGIN),
                face_id: Some(face.face_id),
                ..Default::default()
            };
            if let Err(e) = self
                .inner
                .forwarder
                .exec_mgmt_cmd("rib", "unregister", &args)
                .await
            {
                error!(face_id = face.face_id, error = %e, "failed to unregister active sync route");
            }

            // Only destroy faces we created ourselves.
            if !face.created {
                continue;
            }
            let args = ControlArgs { face_id: Some(face.face_id), ..Default::default() };
            if let Err(e) = self
                .inner
                .forwarder
                .exec_mgmt_cmd("faces", "destroy", &args)
                .await
            {
                error!(face_id = face.face_id, error = %e, "failed to destroy face");
            }
        }
    }

    /// Register the static control-plane routes and set the multicast
    /// strategy on the sync prefixes.
    fn register_static_routes(&self) {
        let cfg = &self.inner.config;
        let static_routes = [
            cfg.advert_sync_prefix().clone(),
            cfg.advert_data_prefix().clone(),
            cfg.prefix_svs_prefix().clone(),
            cfg.prefix_data_prefix().clone(),
            cfg.mgmt_prefix().clone(),
        ];
        for prefix in static_routes {
            self.inner.queue.execute(MgmtCmd {
                module: "rib",
                cmd: "register",
                args: ControlArgs {
                    name: Some(prefix),
                    cost: Some(0),
                    origin: Some(ROUTE_ORIGIN),
                    ..Default::default()
                },
                retries: Retry::Infinite,
            });
        }

        for prefix in [cfg.advert_sync_prefix().clone(), cfg.prefix_svs_prefix().clone()] {
            self.inner.queue.execute(MgmtCmd {
                module: "strategy-choice",
                cmd: "set",
                args: ControlArgs {
                    name: Some(prefix),
                    strategy: Some(ValidatedConfig::multicast_strategy()),
                    ..Default::default()
                },
                retries: Retry::Infinite,
            });
        }
    }

    /// Fold one neighbor's current advertisement into the RIB.
    pub(crate) async fn update_rib(&self, neighbor: &Name) {
        let mut tables = self.tables().await;
        let tables = &mut *tables;

        let Some(ns) = tables.neighbors.get(neighbor) else {
            return;
        };
        let Some(advert) = ns.advert.clone() else {
            return;
        };

        let me = self.inner.config.router_name();
        let local_cost = self.inner.config.local_cost();
        let mut dirty = false;

        // Invalidate this neighbor's previous contribution, then re-apply.
        tables.rib.dirty_reset_next_hop(neighbor);

        for entry in &advert.entries {
            let mut cost = entry.cost.saturating_add(local_cost);

            // Poison reverse: the neighbor routes through us, so its
            // primary cost is a loop. Fall back to its other cost.
            if entry.next_hop == *me {
                cost = if entry.other_cost < COST_INFINITY {
                    entry.other_cost.saturating_add(local_cost)
                } else {
                    COST_INFINITY
                };
            }

            if cost >= COST_INFINITY {
                continue;
            }

            dirty |= tables.rib.set(&entry.destination, neighbor, cost);
        }

        dirty |= tables.rib.prune();

        if dirty {
            self.spawn_post_update_rib();
        }
    }

    /// Follow-up after a RIB change: FIB resync, advertisement
    /// regeneration, and prefix subscription reconciliation. Runs on a
    /// fresh task so the caller's critical section is not extended.
    pub(crate) fn spawn_post_update_rib(&self) {
        let router = self.clone();
        tokio::spawn(async move {
            router.update_fib().await;
            router.advert_generate().await;
            router.update_prefix_subs().await;
        });
    }

    /// Sweep neighbors that exceeded the dead interval. This is the only
    /// place neighbors are removed.
    pub(crate) async fn check_dead_neighbors(&self) {
        let mut tables = self.tables().await;
        let tables = &mut *tables;

        let mut dirty = false;
        for name in tables.neighbors.dead() {
            info!(router = %name, "neighbor is dead");
            tables.neighbors.remove(&name);
            dirty |= tables.rib.remove_next_hop(&name);
            dirty |= tables.rib.prune();
        }

        if dirty {
            self.spawn_post_update_rib();
        }
    }

    /// Synchronize the forwarder with the RIB and prefix table.
    pub(crate) async fn update_fib(&self) {
        debug!("synchronizing updates to forwarding table");

        let mut tables = self.tables().await;
        let tables = &mut *tables;

        let me = self.inner.config.router_name();
        let mut names: HashMap<u64, Name> = HashMap::new();
        let mut candidates: HashMap<u64, Vec<FibEntry>> = HashMap::new();

        let mut collect = |name: Name, fes: &[FibEntry], cost: u64| {
            let name_h = name.hash_u64();
            let slot = candidates.entry(name_h).or_default();
            for fe in fes {
                slot.push(fe.plus_cost(cost));
            }
            names.entry(name_h).or_insert(name);
        };

        for (hash, entry) in tables.rib.entries() {
            if entry.name() == me {
                continue;
            }

            let fes = tables.rib.fib_entries(&tables.neighbors, hash);

            // Route for the destination's prefix sync feed.
            let proute = self.inner.config.prefix_group_prefix().join(entry.name());
            collect(proute, &fes, 0);

            // Routes for every prefix the destination announces, sharing
            // the exit router's next hops. Duplicates across destinations
            // are deduplicated inside the FIB update.
            if let Some(router) = tables.prefixes.router(entry.name()) {
                for prefix in router.prefixes.values() {
                    collect(prefix.name.clone(), &fes, prefix.cost);
                }
            }
        }

        tables.fib.unmark_all();
        for (name_h, fes) in candidates {
            if let Some(name) = names.get(&name_h) {
                if tables.fib.update_h(name_h, name, &fes) {
                    tables.fib.mark_h(name_h);
                }
            }
        }
        tables.fib.remove_unmarked();
    }

    /// Reconcile prefix-feed subscriptions with RIB reachability: subscribe
    /// to routers that became reachable, unsubscribe from those that left.
    pub(crate) async fn update_prefix_subs(&self) {
        let mut subscribe = Vec::new();
        let mut unsubscribe = Vec::new();

        {
            let mut tables = self.tables().await;
            let tables = &mut *tables;

            let me = self.inner.config.router_name();
            for (hash, entry) in tables.rib.entries() {
                if entry.name() == me {
                    continue;
                }
                if !tables.pfx_subs.contains_key(&hash) {
                    info!(router = %entry.name(), "router is now reachable");
                    tables.pfx_subs.insert(hash, entry.name().clone());
                    subscribe.push(entry.name().clone());
                }
            }

            tables.pfx_subs.retain(|_, name| {
                if tables.rib.has(name) {
                    true
                } else {
                    info!(router = %name, "router is now unreachable");
                    unsubscribe.push(name.clone());
                    false
                }
            });
        }

        for name in subscribe {
            if let Err(e) = self.inner.prefix_sync.subscribe_publisher(&name).await {
                error!(router = %name, error = %e, "failed to subscribe to prefix feed");
            }
        }
        for name in unsubscribe {
            if let Err(e) = self.inner.prefix_sync.unsubscribe_publisher(&name).await {
                error!(router = %name, error = %e, "failed to unsubscribe from prefix feed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::time::sleep;

    use crate::config::Config;
    use crate::protocols::StateVectorEntry;
    use crate::tlv::{AdvEntry, Advertisement, ControlResponse};

    #[derive(Debug, Clone)]
    struct Call {
        module: String,
        cmd: String,
        name: Option<Name>,
        face_id: Option<u64>,
    }

    #[derive(Default)]
    struct RecordingForwarder {
        calls: StdMutex<Vec<Call>>,
    }

    impl RecordingForwarder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ForwarderControl for RecordingForwarder {
        async fn exec_mgmt_cmd(
            &self,
            module: &str,
            cmd: &str,
            args: &ControlArgs,
        ) -> anyhow::Result<ControlResponse> {
            self.calls.lock().unwrap().push(Call {
                module: module.into(),
                cmd: cmd.into(),
                name: args.name.clone(),
                face_id: args.face_id,
            });
            let mut res = ControlResponse::ok("OK");
            if module == "faces" && cmd == "create" {
                res.body = Some(ControlArgs { face_id: Some(100), ..Default::default() });
            }
            Ok(res)
        }
    }

    #[derive(Default)]
    struct MemoryObjects {
        store: StdMutex<HashMap<Name, Vec<u8>>>,
        /// Remaining fetches to fail before serving from the store.
        fail_fetches: StdMutex<u32>,
        fetch_log: StdMutex<Vec<Name>>,
    }

    impl MemoryObjects {
        fn insert(&self, name: Name, content: Vec<u8>) {
            self.store.lock().unwrap().insert(name, content);
        }

        fn get(&self, name: &Name) -> Option<Vec<u8>> {
            self.store.lock().unwrap().get(name).cloned()
        }

        fn fail_next_fetches(&self, n: u32) {
            *self.fail_fetches.lock().unwrap() = n;
        }

        fn fetches_of(&self, name: &Name) -> usize {
            self.fetch_log.lock().unwrap().iter().filter(|n| *n == name).count()
        }
    }

    #[async_trait::async_trait]
    impl ObjectClient for MemoryObjects {
        async fn produce(
            &self,
            name: &Name,
            content: Vec<u8>,
            _freshness: Duration,
        ) -> anyhow::Result<Name> {
            self.insert(name.clone(), content);
            Ok(name.clone())
        }

        async fn fetch(
            &self,
            name: &Name,
            _must_be_fresh: bool,
            _lifetime: Duration,
        ) -> anyhow::Result<Vec<u8>> {
            self.fetch_log.lock().unwrap().push(name.clone());
            {
                let mut remaining = self.fail_fetches.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("fetch timed out");
                }
            }
            self.get(name)
                .ok_or_else(|| anyhow::anyhow!("no object at {name}"))
        }
    }

    #[derive(Default)]
    struct RecordingSync {
        sends: StdMutex<Vec<(Name, u64)>>,
        published: StdMutex<Vec<Vec<u8>>>,
        subs: StdMutex<Vec<(Name, bool)>>,
    }

    #[async_trait::async_trait]
    impl AdvertSync for RecordingSync {
        async fn send_state_vector(
            &self,
            sync_prefix: &Name,
            _router: &Name,
            _boot: u64,
            seq: u64,
        ) -> anyhow::Result<()> {
            self.sends.lock().unwrap().push((sync_prefix.clone(), seq));
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl PrefixSync for RecordingSync {
        async fn publish(&self, content: Vec<u8>) -> anyhow::Result<u64> {
            let mut published = self.published.lock().unwrap();
            published.push(content);
            Ok(published.len() as u64)
        }

        async fn subscribe_publisher(&self, router: &Name) -> anyhow::Result<()> {
            self.subs.lock().unwrap().push((router.clone(), true));
            Ok(())
        }

        async fn unsubscribe_publisher(&self, router: &Name) -> anyhow::Result<()> {
            self.subs.lock().unwrap().push((router.clone(), false));
            Ok(())
        }
    }

    struct Harness {
        router: Router,
        fw: Arc<RecordingForwarder>,
        objects: Arc<MemoryObjects>,
        sync: Arc<RecordingSync>,
    }

    fn harness() -> Harness {
        let config = Config {
            network: "/net".into(),
            router: "/net/a".into(),
            advertise_interval: 2000,
            router_dead_interval: 5000,
            local_cost: 1,
            neighbors: Vec::new(),
        }
        .validate()
        .unwrap();

        let fw = Arc::new(RecordingForwarder::default());
        let objects = Arc::new(MemoryObjects::default());
        let sync = Arc::new(RecordingSync::default());
        let router = Router::new(config, fw.clone(), objects.clone(), sync.clone(), sync.clone());
        Harness { router, fw, objects, sync }
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn advert_name(router: &Name, seq: u64) -> Name {
        Name::localhop()
            .join(router)
            .append(crate::name::Component::keyword("DV"))
            .append(crate::name::Component::keyword("ADV"))
            .append(crate::name::Component::sequence_num(seq))
    }

    fn self_entry(router: &str) -> AdvEntry {
        AdvEntry {
            destination: name(router),
            next_hop: name(router),
            cost: 0,
            other_cost: COST_INFINITY,
        }
    }

    async fn seed_self(h: &Harness) {
        let me = h.router.config().router_name().clone();
        h.router.tables().await.rib.set(&me, &me, 0);
    }

    async fn install_neighbor(h: &Harness, neighbor: &Name, face_id: u64, advert: Advertisement) {
        let mut tables = h.router.tables().await;
        tables.neighbors.add(neighbor);
        tables.neighbors.recv_ping(neighbor, face_id, true);
        if let Some(ns) = tables.neighbors.get_mut(neighbor) {
            ns.advert_seq = 1;
            ns.advert = Some(advert);
        }
    }

    async fn settle() {
        // Let spawned post-update tasks run.
        sleep(Duration::from_millis(200)).await;
    }

    async fn own_advert(h: &Harness) -> Advertisement {
        let seq = h.router.tables().await.advert_seq;
        let obj = h
            .objects
            .get(&h.router.config().advert_data_prefix().append(crate::name::Component::sequence_num(seq)))
            .expect("own advertisement published");
        Advertisement::decode(&obj).unwrap()
    }

    fn cost_to(advert: &Advertisement, dest: &Name) -> Option<u64> {
        advert.entries.iter().find(|e| e.destination == *dest).map(|e| e.cost)
    }

    #[tokio::test(start_paused = true)]
    async fn update_rib_applies_poison_reverse() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        // B advertises: itself, a destination through a third router, one
        // through us (poisoned, fall back to other cost), and one through
        // us with no usable other cost.
        let advert = Advertisement {
            entries: vec![
                self_entry("/net/b"),
                AdvEntry {
                    destination: name("/net/c"),
                    next_hop: name("/net/d"),
                    cost: 2,
                    other_cost: 10,
                },
                AdvEntry {
                    destination: name("/net/d"),
                    next_hop: name("/net/a"),
                    cost: 2,
                    other_cost: 10,
                },
                AdvEntry {
                    destination: name("/net/e"),
                    next_hop: name("/net/a"),
                    cost: 2,
                    other_cost: COST_INFINITY,
                },
            ],
        };
        install_neighbor(&h, &b, 7, advert).await;

        h.router.update_rib(&b).await;
        settle().await;

        let own = own_advert(&h).await;
        assert_eq!(cost_to(&own, &name("/net/a")), Some(0));
        assert_eq!(cost_to(&own, &b), Some(1));
        assert_eq!(cost_to(&own, &name("/net/c")), Some(3));
        assert_eq!(cost_to(&own, &name("/net/d")), Some(11));
        // Poisoned with an infinite other cost: unreachable, not in RIB.
        assert_eq!(cost_to(&own, &name("/net/e")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reapplying_same_advertisement_is_a_no_op() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        install_neighbor(&h, &b, 7, Advertisement { entries: vec![self_entry("/net/b")] }).await;

        h.router.update_rib(&b).await;
        settle().await;
        let seq_after_first = h.router.tables().await.advert_seq;
        let commands_after_first = h.fw.calls().len();

        h.router.update_rib(&b).await;
        settle().await;

        assert_eq!(h.router.tables().await.advert_seq, seq_after_first);
        assert_eq!(h.fw.calls().len(), commands_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn fib_programs_top_two_faces_for_sync_group_route() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        let c = name("/net/c");
        let d = name("/net/d");
        install_neighbor(&h, &b, 7, Advertisement::default()).await;
        install_neighbor(&h, &c, 9, Advertisement::default()).await;
        {
            let mut tables = h.router.tables().await;
            tables.rib.set(&b, &b, 1);
            tables.rib.set(&c, &c, 1);
            tables.rib.set(&d, &b, 2);
            tables.rib.set(&d, &c, 3);
        }

        h.router.update_fib().await;
        settle().await;

        let group_route = h.router.config().prefix_group_prefix().join(&d);
        let faces: Vec<u64> = h
            .fw
            .calls()
            .iter()
            .filter(|call| call.cmd == "register" && call.name.as_ref() == Some(&group_route))
            .filter_map(|call| call.face_id)
            .collect();
        assert_eq!(faces.len(), 2);
        assert!(faces.contains(&7));
        assert!(faces.contains(&9));
    }

    #[tokio::test(start_paused = true)]
    async fn withdrawn_neighbor_leaves_fib_in_one_pass() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        let c = name("/net/c");
        let d = name("/net/d");
        install_neighbor(&h, &b, 7, Advertisement::default()).await;
        install_neighbor(&h, &c, 9, Advertisement::default()).await;
        {
            let mut tables = h.router.tables().await;
            tables.rib.set(&b, &b, 1);
            tables.rib.set(&c, &c, 1);
            tables.rib.set(&d, &b, 2);
            tables.rib.set(&d, &c, 3);
        }
        h.router.update_fib().await;

        {
            let mut tables = h.router.tables().await;
            tables.neighbors.remove(&c);
            tables.rib.remove_next_hop(&c);
            tables.rib.prune();
        }
        h.router.update_fib().await;
        settle().await;

        let group_route = h.router.config().prefix_group_prefix().join(&d);
        let unregistered: Vec<u64> = h
            .fw
            .calls()
            .iter()
            .filter(|call| call.cmd == "unregister" && call.name.as_ref() == Some(&group_route))
            .filter_map(|call| call.face_id)
            .collect();
        assert_eq!(unregistered, vec![9]);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_neighbor_sweep_removes_all_state() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        install_neighbor(&h, &b, 7, Advertisement { entries: vec![self_entry("/net/b")] }).await;
        h.router.update_rib(&b).await;
        settle().await;
        assert!(h.router.tables().await.rib.has(&b));

        tokio::time::advance(Duration::from_secs(6)).await;
        h.router.check_dead_neighbors().await;
        settle().await;

        let tables = h.router.tables().await;
        assert_eq!(tables.neighbors.size(), 0);
        assert!(!tables.rib.has(&b));
        assert_eq!(tables.fib.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_subscriptions_follow_reachability() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        {
            let mut tables = h.router.tables().await;
            tables.rib.set(&b, &b, 1);
        }
        h.router.update_prefix_subs().await;
        assert_eq!(h.sync.subs.lock().unwrap().clone(), vec![(b.clone(), true)]);

        {
            let mut tables = h.router.tables().await;
            tables.rib.remove_next_hop(&b);
            tables.rib.prune();
        }
        h.router.update_prefix_subs().await;
        assert_eq!(
            h.sync.subs.lock().unwrap().clone(),
            vec![(b.clone(), true), (b, false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_update_creates_neighbor_and_fetches_advert() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        h.objects.insert(
            advert_name(&b, 3),
            Advertisement { entries: vec![self_entry("/net/b")] }.encode(),
        );

        let sv = [StateVectorEntry { router: b.clone(), boot: 1, seq: 3 }];
        h.router.on_advert_sync(&sv, 7, true).await;
        settle().await;

        let tables = h.router.tables().await;
        assert_eq!(tables.neighbors.size(), 1);
        assert_eq!(tables.neighbors.get(&b).unwrap().advert_seq, 3);
        assert!(tables.rib.has(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn advert_fetch_retries_until_success() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        h.objects.insert(
            advert_name(&b, 3),
            Advertisement { entries: vec![self_entry("/net/b")] }.encode(),
        );
        h.objects.fail_next_fetches(2);

        let sv = [StateVectorEntry { router: b.clone(), boot: 1, seq: 3 }];
        h.router.on_advert_sync(&sv, 7, true).await;
        // Two failed attempts, then the 1s backoff loop lands the third.
        sleep(Duration::from_secs(3)).await;

        assert_eq!(h.objects.fetches_of(&advert_name(&b, 3)), 3);
        let tables = h.router.tables().await;
        assert!(tables.neighbors.get(&b).unwrap().advert.is_some());
        assert!(tables.rib.has(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_fetch_is_abandoned_mid_retry() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        h.objects.fail_next_fetches(u32::MAX);

        let sv = [StateVectorEntry { router: b.clone(), boot: 1, seq: 3 }];
        h.router.on_advert_sync(&sv, 7, true).await;
        sleep(Duration::from_millis(2500)).await;

        let stale_attempts = h.objects.fetches_of(&advert_name(&b, 3));
        assert!(stale_attempts >= 2);

        // The neighbor moves on to seq 4 while the old fetch is between
        // retries; the old task must notice and stop.
        h.objects.fail_next_fetches(0);
        h.objects.insert(
            advert_name(&b, 4),
            Advertisement {
                entries: vec![
                    self_entry("/net/b"),
                    AdvEntry {
                        destination: name("/net/x"),
                        next_hop: name("/net/b"),
                        cost: 1,
                        other_cost: COST_INFINITY,
                    },
                ],
            }
            .encode(),
        );
        let sv = [StateVectorEntry { router: b.clone(), boot: 1, seq: 4 }];
        h.router.on_advert_sync(&sv, 7, true).await;
        sleep(Duration::from_secs(5)).await;

        assert_eq!(h.objects.fetches_of(&advert_name(&b, 3)), stale_attempts);
        assert_eq!(h.objects.fetches_of(&advert_name(&b, 4)), 1);

        let tables = h.router.tables().await;
        assert_eq!(tables.neighbors.get(&b).unwrap().advert_seq, 4);
        assert!(tables.rib.has(&name("/net/x")));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_update_from_self_is_ignored() {
        let h = harness();
        seed_self(&h).await;

        let me = h.router.config().router_name().clone();
        let sv = [StateVectorEntry { router: me, boot: 1, seq: 9 }];
        h.router.on_advert_sync(&sv, 7, true).await;

        assert_eq!(h.router.tables().await.neighbors.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sync_update_only_refreshes_liveness() {
        let h = harness();
        seed_self(&h).await;

        let b = name("/net/b");
        install_neighbor(&h, &b, 7, Advertisement::default()).await;
        {
            let mut tables = h.router.tables().await;
            if let Some(ns) = tables.neighbors.get_mut(&b) {
                ns.advert_boot = 5;
                ns.advert_seq = 8;
            }
        }

        let sv = [StateVectorEntry { router: b.clone(), boot: 5, seq: 8 }];
        h.router.on_advert_sync(&sv, 7, true).await;
        settle().await;

        // Liveness refreshed, but nothing new to fetch.
        assert_eq!(h.objects.fetches_of(&advert_name(&b, 8)), 0);
        let tables = h.router.tables().await;
        assert_eq!(tables.neighbors.get(&b).unwrap().advert_seq, 8);
    }
}
