//! Neighbor liveness and face bindings.
//!
//! A neighbor exists between its first sync update and the dead-neighbor
//! sweep; nothing else creates or removes one. Each neighbor carries the
//! forwarder face it was last heard on, and the table keeps the per-face
//! routes (advertisement fetch, passive sync, prefix sync group) registered
//! through the command queue as faces change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::config::{ValidatedConfig, ROUTE_ORIGIN};
use crate::executor::{CommandQueue, MgmtCmd, Retry};
use crate::name::{Component, Name};
use crate::tlv::{Advertisement, ControlArgs};

pub struct NeighborTable {
    config: Arc<ValidatedConfig>,
    queue: CommandQueue,
    /// Neighbor name hash -> state.
    neighbors: HashMap<u64, NeighborState>,
}

pub struct NeighborState {
    /// Neighbor router name.
    pub name: Name,
    /// Advertisement boot time for the neighbor.
    pub advert_boot: u64,
    /// Advertisement sequence number for the neighbor.
    pub advert_seq: u64,
    /// Most recent parsed advertisement.
    pub advert: Option<Advertisement>,

    /// Time of the last sync update.
    last_seen: Instant,
    /// Latest known face id, 0 when unbound.
    face_id: u64,
    /// Whether the binding came from the active sync channel.
    face_active: bool,
}

impl NeighborState {
    fn new(name: Name) -> Self {
        NeighborState {
            name,
            advert_boot: 0,
            advert_seq: 0,
            advert: None,
            last_seen: Instant::now(),
            face_id: 0,
            face_active: false,
        }
    }

    pub fn face_id(&self) -> u64 {
        self.face_id
    }

    pub fn is_dead(&self, dead_interval: Duration) -> bool {
        self.last_seen.elapsed() > dead_interval
    }
}

impl NeighborTable {
    pub fn new(config: Arc<ValidatedConfig>, queue: CommandQueue) -> Self {
        NeighborTable {
            config,
            queue,
            neighbors: HashMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.neighbors.len()
    }

    pub fn get(&self, name: &Name) -> Option<&NeighborState> {
        self.get_h(name.hash_u64())
    }

    pub fn get_h(&self, name_hash: u64) -> Option<&NeighborState> {
        self.neighbors.get(&name_hash)
    }

    pub fn get_mut(&mut self, name: &Name) -> Option<&mut NeighborState> {
        self.neighbors.get_mut(&name.hash_u64())
    }

    /// Create a neighbor. The only call site is receipt of a sync update
    /// naming an unseen router.
    pub fn add(&mut self, name: &Name) -> &mut NeighborState {
        self.neighbors
            .entry(name.hash_u64())
            .or_insert_with(|| NeighborState::new(name.clone()))
    }

    /// Remove a neighbor and unregister its routes. The only call site is
    /// the dead-neighbor sweep.
    pub fn remove(&mut self, name: &Name) {
        let hash = name.hash_u64();
        if let Some(ns) = self.neighbors.get(&hash) {
            let face_id = ns.face_id;
            let neighbor = ns.name.clone();
            self.route_unregister(&neighbor, face_id);
        }
        self.neighbors.remove(&hash);
    }

    /// Names of neighbors whose `last_seen` exceeds the dead interval.
    pub fn dead(&self) -> Vec<Name> {
        let interval = self.config.router_dead_interval();
        self.neighbors
            .values()
            .filter(|ns| ns.is_dead(interval))
            .map(|ns| ns.name.clone())
            .collect()
    }

    /// Handle a sync update (ping) from `name` arriving on `face_id`.
    /// Returns whether the face binding changed.
    ///
    /// A passive ping is ignored entirely while an active binding exists,
    /// including the `last_seen` refresh: if the active link silently dies,
    /// the neighbor must still age out even though passive pings keep
    /// arriving on another face.
    pub fn recv_ping(&mut self, name: &Name, face_id: u64, active: bool) -> bool {
        let Some(ns) = self.neighbors.get_mut(&name.hash_u64()) else {
            return false;
        };

        if ns.face_active && !active {
            return false;
        }

        ns.last_seen = Instant::now();

        if ns.face_id != face_id {
            let old = ns.face_id;
            ns.face_active = active;
            ns.face_id = face_id;
            let neighbor = ns.name.clone();
            info!(%neighbor, face_id, old, "neighbor face change");
            self.route_unregister(&neighbor, old);
            self.route_register(&neighbor, face_id);
            return true;
        }

        false
    }

    /// Route for fetching this neighbor's advertisements.
    fn local_route(&self, neighbor: &Name) -> Name {
        Name::localhop()
            .join(neighbor)
            .append(Component::keyword("DV"))
    }

    fn route_register(&self, neighbor: &Name, face_id: u64) {
        let register = |route: Name| {
            self.queue.execute(MgmtCmd {
                module: "rib",
                cmd: "register",
                args: ControlArgs {
                    name: Some(route),
                    face_id: Some(face_id),
                    origin: Some(ROUTE_ORIGIN),
                    cost: Some(0),
                    ..Default::default()
                },
                retries: Retry::Limit(3),
            });
        };

        // For fetching advertisements from the neighbor.
        register(self.local_route(neighbor));
        // Passive advertisement sync toward the neighbor.
        register(self.config.advert_sync_passive_prefix().clone());
        // Prefix table sync group.
        register(self.config.prefix_svs_prefix().clone());
    }

    fn route_unregister(&self, neighbor: &Name, face_id: u64) {
        if face_id == 0 {
            return;
        }

        let unregister = |route: Name| {
            self.queue.execute(MgmtCmd {
                module: "rib",
                cmd: "unregister",
                args: ControlArgs {
                    name: Some(route),
                    face_id: Some(face_id),
                    origin: Some(ROUTE_ORIGIN),
                    ..Default::default()
                },
                retries: Retry::Limit(1),
            });
        };

        // Always remove the local data route to the neighbor.
        unregister(self.local_route(neighbor));

        // With multiple neighbors on one face, the global routes to the
        // face must survive.
        for ons in self.neighbors.values() {
            if ons.name != *neighbor && ons.face_id == face_id {
                return;
            }
        }

        unregister(self.config.advert_sync_passive_prefix().clone());
        unregister(self.config.prefix_svs_prefix().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::config::Config;
    use crate::protocols::ForwarderControl;
    use crate::tlv::ControlResponse;

    struct RecordingForwarder {
        calls: Mutex<Vec<(String, String, Option<Name>)>>,
    }

    #[async_trait]
    impl ForwarderControl for RecordingForwarder {
        async fn exec_mgmt_cmd(
            &self,
            module: &str,
            cmd: &str,
            args: &ControlArgs,
        ) -> Result<ControlResponse> {
            self.calls
                .lock()
                .unwrap()
                .push((module.into(), cmd.into(), args.name.clone()));
            Ok(ControlResponse::ok("OK"))
        }
    }

    fn config() -> Arc<ValidatedConfig> {
        Arc::new(
            Config {
                network: "/net".into(),
                router: "/net/a".into(),
                advertise_interval: 2000,
                router_dead_interval: 5000,
                local_cost: 1,
                neighbors: Vec::new(),
            }
            .validate()
            .unwrap(),
        )
    }

    async fn drained(
        queue: CommandQueue,
        handle: tokio::task::JoinHandle<()>,
        fw: &RecordingForwarder,
    ) -> Vec<(String, String, Option<Name>)> {
        queue.stop();
        handle.await.unwrap();
        fw.calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn ping_binds_face_and_registers_routes() {
        let fw = Arc::new(RecordingForwarder { calls: Mutex::new(Vec::new()) });
        let (queue, handle) = CommandQueue::spawn(fw.clone());
        let mut nt = NeighborTable::new(config(), queue.clone());

        let b: Name = "/net/b".parse().unwrap();
        nt.add(&b);
        assert!(nt.recv_ping(&b, 7, true));
        assert_eq!(nt.get(&b).unwrap().face_id(), 7);

        // Same face again: no change, no new commands.
        assert!(!nt.recv_ping(&b, 7, true));

        let calls = drained(queue, handle, &fw).await;
        let registers: Vec<_> = calls.iter().filter(|c| c.1 == "register").collect();
        assert_eq!(registers.len(), 3);
        assert_eq!(
            registers[0].2.as_ref().unwrap().to_string(),
            "/localhop/net/b/32=DV"
        );
    }

    #[tokio::test]
    async fn passive_ping_does_not_override_active_binding() {
        let fw = Arc::new(RecordingForwarder { calls: Mutex::new(Vec::new()) });
        let (queue, handle) = CommandQueue::spawn(fw.clone());
        let mut nt = NeighborTable::new(config(), queue.clone());

        let b: Name = "/net/b".parse().unwrap();
        nt.add(&b);
        nt.recv_ping(&b, 7, true);
        let seen_before = nt.get(&b).unwrap().last_seen;

        // Passive ping on a different face: fully ignored.
        assert!(!nt.recv_ping(&b, 9, false));
        let ns = nt.get(&b).unwrap();
        assert_eq!(ns.face_id(), 7);
        assert_eq!(ns.last_seen, seen_before);

        // Active ping on a new face does rebind.
        assert!(nt.recv_ping(&b, 9, true));
        assert_eq!(nt.get(&b).unwrap().face_id(), 9);

        drained(queue, handle, &fw).await;
    }

    #[tokio::test]
    async fn passive_binding_upgrades_and_rebinds() {
        let fw = Arc::new(RecordingForwarder { calls: Mutex::new(Vec::new()) });
        let (queue, handle) = CommandQueue::spawn(fw.clone());
        let mut nt = NeighborTable::new(config(), queue.clone());

        let b: Name = "/net/b".parse().unwrap();
        nt.add(&b);
        assert!(nt.recv_ping(&b, 5, false));
        // Passive binding accepts passive refreshes on the same face.
        assert!(!nt.recv_ping(&b, 5, false));
        // And an active ping takes the binding over.
        assert!(nt.recv_ping(&b, 6, true));

        drained(queue, handle, &fw).await;
    }

    #[tokio::test]
    async fn shared_face_keeps_global_routes() {
        let fw = Arc::new(RecordingForwarder { calls: Mutex::new(Vec::new()) });
        let (queue, handle) = CommandQueue::spawn(fw.clone());
        let mut nt = NeighborTable::new(config(), queue.clone());

        let b: Name = "/net/b".parse().unwrap();
        let c: Name = "/net/c".parse().unwrap();
        nt.add(&b);
        nt.add(&c);
        nt.recv_ping(&b, 7, true);
        nt.recv_ping(&c, 7, true);

        // Removing b keeps the shared-face global routes for c.
        nt.remove(&b);

        let calls = drained(queue, handle, &fw).await;
        let unregisters: Vec<_> = calls.iter().filter(|c| c.1 == "unregister").collect();
        assert_eq!(unregisters.len(), 1);
        assert_eq!(
            unregisters[0].2.as_ref().unwrap().to_string(),
            "/localhop/net/b/32=DV"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dead_detection_uses_dead_interval() {
        let fw = Arc::new(RecordingForwarder { calls: Mutex::new(Vec::new()) });
        let (queue, handle) = CommandQueue::spawn(fw.clone());
        let mut nt = NeighborTable::new(config(), queue.clone());

        let b: Name = "/net/b".parse().unwrap();
        nt.add(&b);
        nt.recv_ping(&b, 7, true);
        assert!(nt.dead().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(nt.dead(), vec![b]);

        drained(queue, handle, &fw).await;
    }
}
