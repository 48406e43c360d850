//! Per-router table of announced name prefixes.
//!
//! The local router's entries carry the full next-hop list behind each
//! announcement; an entry's advertised cost is the minimum over its next
//! hops. Remote entries carry only the cost announced by that router's
//! exit point. Mutations of the local state return the incremental
//! operation to publish to the sync group; applying remote operations
//! reports whether forwarding state may have changed.

use std::collections::HashMap;

use tracing::info;

use crate::name::Name;
use crate::tlv::{PrefixOpAdd, PrefixOpList};

/// Publish a snapshot after this many operations since the last one.
pub const PREFIX_SNAP_THRESHOLD: u64 = 100;

pub struct PrefixTable {
    local: Name,
    routers: HashMap<Name, PrefixTableRouter>,
}

#[derive(Debug, Default)]
pub struct PrefixTableRouter {
    pub prefixes: HashMap<Name, PrefixEntry>,
}

#[derive(Debug, Clone)]
pub struct PrefixEntry {
    pub name: Name,
    /// Advertised cost. For local entries, the minimum over next hops.
    pub cost: u64,
    /// Local announcements only; remote entries have no next-hop detail.
    pub next_hops: Vec<PrefixNextHop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixNextHop {
    pub face_id: u64,
    pub cost: u64,
}

impl PrefixTable {
    pub fn new(local: Name) -> Self {
        let mut routers = HashMap::new();
        routers.insert(local.clone(), PrefixTableRouter::default());
        PrefixTable { local, routers }
    }

    pub fn router(&self, name: &Name) -> Option<&PrefixTableRouter> {
        self.routers.get(name)
    }

    fn local_mut(&mut self) -> &mut PrefixTableRouter {
        self.routers.entry(self.local.clone()).or_default()
    }

    fn op(&self) -> PrefixOpList {
        PrefixOpList {
            exit_router: self.local.clone(),
            reset: false,
            adds: Vec::new(),
            removes: Vec::new(),
        }
    }

    /// Announce `name` with the given next hop. Returns the operation to
    /// publish if the advertised cost changed.
    pub fn announce(&mut self, name: &Name, face_id: u64, cost: u64) -> Option<PrefixOpList> {
        info!(%name, face_id, cost, "announce prefix");
        let me = self.local_mut();

        let entry = me.prefixes.entry(name.clone()).or_insert_with(|| PrefixEntry {
            name: name.clone(),
            cost: u64::MAX,
            next_hops: Vec::new(),
        });

        match entry.next_hops.iter_mut().find(|nh| nh.face_id == face_id) {
            Some(nh) => nh.cost = cost,
            None => entry.next_hops.push(PrefixNextHop { face_id, cost }),
        }

        let new_cost = entry.next_hops.iter().map(|nh| nh.cost).min().unwrap_or(u64::MAX);
        if new_cost == entry.cost {
            return None;
        }
        entry.cost = new_cost;

        let mut op = self.op();
        op.adds.push(PrefixOpAdd { name: name.clone(), cost: new_cost });
        Some(op)
    }

    /// Withdraw `name` from the given next hop. Returns the operation to
    /// publish: a remove when no next hop remains, or an add with the new
    /// minimum cost when one does and the cost changed.
    pub fn withdraw(&mut self, name: &Name, face_id: u64) -> Option<PrefixOpList> {
        info!(%name, face_id, "withdraw prefix");
        let local = self.local.clone();
        let me = self.routers.get_mut(&local)?;

        let entry = me.prefixes.get_mut(name)?;
        let before = entry.next_hops.len();
        entry.next_hops.retain(|nh| nh.face_id != face_id);
        if entry.next_hops.len() == before {
            return None;
        }

        if entry.next_hops.is_empty() {
            me.prefixes.remove(name);
            let mut op = self.op();
            op.removes.push(name.clone());
            return Some(op);
        }

        let new_cost = entry.next_hops.iter().map(|nh| nh.cost).min().unwrap_or(u64::MAX);
        if new_cost == entry.cost {
            return None;
        }
        entry.cost = new_cost;

        let mut op = self.op();
        op.adds.push(PrefixOpAdd { name: name.clone(), cost: new_cost });
        Some(op)
    }

    /// Clear all local announcements and return a reset operation.
    pub fn reset(&mut self) -> PrefixOpList {
        info!("reset prefix table");
        self.local_mut().prefixes.clear();
        let mut op = self.op();
        op.reset = true;
        op
    }

    /// Full local state as one operation: reset plus every announcement.
    pub fn snapshot(&mut self) -> PrefixOpList {
        let mut op = self.op();
        op.reset = true;
        op.adds = self
            .local_mut()
            .prefixes
            .values()
            .map(|e| PrefixOpAdd { name: e.name.clone(), cost: e.cost })
            .collect();
        op.adds.sort_by(|a, b| a.name.cmp(&b.name));
        op
    }

    /// Fold a remote router's operation list into its table. Returns
    /// whether anything changed.
    pub fn apply(&mut self, ops: &PrefixOpList) -> bool {
        let exit = ops.exit_router.clone();
        let router = self.routers.entry(exit.clone()).or_default();
        let mut dirty = false;

        if ops.reset {
            info!(router = %exit, "reset remote prefixes");
            router.prefixes.clear();
            dirty = true;
        }

        for add in &ops.adds {
            info!(router = %exit, name = %add.name, cost = add.cost, "add remote prefix");
            router.prefixes.insert(
                add.name.clone(),
                PrefixEntry {
                    name: add.name.clone(),
                    cost: add.cost,
                    next_hops: Vec::new(),
                },
            );
            dirty = true;
        }

        for remove in &ops.removes {
            info!(router = %exit, name = %remove, "remove remote prefix");
            router.prefixes.remove(remove);
            dirty = true;
        }

        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn table() -> PrefixTable {
        PrefixTable::new(name("/net/a"))
    }

    #[test]
    fn announce_publishes_minimum_cost() {
        let mut pt = table();
        let p = name("/svc/video");

        let op = pt.announce(&p, 7, 4).unwrap();
        assert_eq!(op.adds[0].cost, 4);

        // A cheaper next hop lowers the advertised cost.
        let op = pt.announce(&p, 9, 2).unwrap();
        assert_eq!(op.adds[0].cost, 2);

        // A pricier one does not.
        assert!(pt.announce(&p, 11, 8).is_none());
        assert_eq!(pt.router(&name("/net/a")).unwrap().prefixes[&p].cost, 2);
    }

    #[test]
    fn reannounce_same_cost_is_silent() {
        let mut pt = table();
        let p = name("/svc/video");

        assert!(pt.announce(&p, 7, 4).is_some());
        assert!(pt.announce(&p, 7, 4).is_none());
    }

    #[test]
    fn withdraw_last_hop_removes_entry() {
        let mut pt = table();
        let p = name("/svc/video");

        pt.announce(&p, 7, 4);
        let op = pt.withdraw(&p, 7).unwrap();
        assert_eq!(op.removes, vec![p.clone()]);
        assert!(op.adds.is_empty());
        assert!(!pt.router(&name("/net/a")).unwrap().prefixes.contains_key(&p));
    }

    #[test]
    fn withdraw_cheapest_hop_republishes_cost() {
        let mut pt = table();
        let p = name("/svc/video");

        pt.announce(&p, 7, 2);
        pt.announce(&p, 9, 5);
        let op = pt.withdraw(&p, 7).unwrap();
        assert_eq!(op.adds[0].cost, 5);
        assert!(op.removes.is_empty());
    }

    #[test]
    fn withdraw_unknown_is_silent() {
        let mut pt = table();
        assert!(pt.withdraw(&name("/svc/none"), 7).is_none());

        pt.announce(&name("/svc/video"), 7, 2);
        assert!(pt.withdraw(&name("/svc/video"), 99).is_none());
    }

    #[test]
    fn apply_folds_remote_ops() {
        let mut pt = table();
        let b = name("/net/b");

        let mut op = PrefixOpList {
            exit_router: b.clone(),
            reset: false,
            adds: vec![PrefixOpAdd { name: name("/svc/audio"), cost: 3 }],
            removes: Vec::new(),
        };
        assert!(pt.apply(&op));
        assert_eq!(pt.router(&b).unwrap().prefixes[&name("/svc/audio")].cost, 3);

        op.adds.clear();
        op.removes.push(name("/svc/audio"));
        assert!(pt.apply(&op));
        assert!(pt.router(&b).unwrap().prefixes.is_empty());
    }

    #[test]
    fn apply_reset_clears_router_state() {
        let mut pt = table();
        let b = name("/net/b");

        pt.apply(&PrefixOpList {
            exit_router: b.clone(),
            reset: false,
            adds: vec![PrefixOpAdd { name: name("/svc/audio"), cost: 3 }],
            removes: Vec::new(),
        });
        pt.apply(&PrefixOpList {
            exit_router: b.clone(),
            reset: true,
            adds: vec![PrefixOpAdd { name: name("/svc/video"), cost: 1 }],
            removes: Vec::new(),
        });

        let prefixes = &pt.router(&b).unwrap().prefixes;
        assert_eq!(prefixes.len(), 1);
        assert!(prefixes.contains_key(&name("/svc/video")));
    }

    #[test]
    fn snapshot_contains_all_local_entries() {
        let mut pt = table();
        pt.announce(&name("/svc/video"), 7, 2);
        pt.announce(&name("/svc/audio"), 7, 1);

        let snap = pt.snapshot();
        assert!(snap.reset);
        assert_eq!(snap.adds.len(), 2);
        assert_eq!(snap.adds[0].name, name("/svc/audio"));
    }
}
