//! Routing information base: the distance-vector core.
//!
//! One entry per destination router, holding the cost reported through each
//! neighbor and a cached top-2 of (cost, next hop). The top-2 is what gets
//! advertised: the best cost plus the second-best as the "other cost" used
//! by peers for poison reverse.

use std::collections::HashMap;

use crate::config::COST_INFINITY;
use crate::fib::FibEntry;
use crate::name::Name;
use crate::neighbors::NeighborTable;
use crate::tlv::{AdvEntry, Advertisement};

#[derive(Debug, Default)]
pub struct Rib {
    /// Destination name hash -> entry.
    entries: HashMap<u64, RibEntry>,
    /// Neighbor name hash -> name, for advert generation.
    neighbor_names: HashMap<u64, Name>,
}

#[derive(Debug)]
pub struct RibEntry {
    name: Name,
    /// Neighbor name hash -> cost to the destination via that neighbor.
    costs: HashMap<u64, u64>,
    lowest1: u64,
    lowest2: u64,
    next_hop1: u64,
    next_hop2: u64,
}

impl RibEntry {
    fn new(name: Name) -> Self {
        RibEntry {
            name,
            costs: HashMap::new(),
            lowest1: COST_INFINITY,
            lowest2: COST_INFINITY,
            next_hop1: 0,
            next_hop2: 0,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Recompute the cached top-2 from the cost map. Returns whether the
    /// top-2 changed.
    fn refresh(&mut self) -> bool {
        let old = (self.lowest1, self.next_hop1, self.lowest2, self.next_hop2);

        self.lowest1 = COST_INFINITY;
        self.lowest2 = COST_INFINITY;
        self.next_hop1 = 0;
        self.next_hop2 = 0;

        for (&hop, &cost) in &self.costs {
            if cost < self.lowest1 {
                self.lowest2 = self.lowest1;
                self.next_hop2 = self.next_hop1;
                self.lowest1 = cost;
                self.next_hop1 = hop;
            } else if cost < self.lowest2 {
                self.lowest2 = cost;
                self.next_hop2 = hop;
            }
        }

        old != (self.lowest1, self.next_hop1, self.lowest2, self.next_hop2)
    }
}

impl Rib {
    pub fn new() -> Self {
        Rib::default()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn has(&self, name: &Name) -> bool {
        self.entries.contains_key(&name.hash_u64())
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, &RibEntry)> {
        self.entries.iter().map(|(&h, e)| (h, e))
    }

    /// Record `cost` to `destination` via `next_hop`. Returns whether the
    /// destination's top-2 changed.
    pub fn set(&mut self, destination: &Name, next_hop: &Name, cost: u64) -> bool {
        let nh_hash = next_hop.hash_u64();
        self.neighbor_names
            .entry(nh_hash)
            .or_insert_with(|| next_hop.clone());

        let entry = self
            .entries
            .entry(destination.hash_u64())
            .or_insert_with(|| RibEntry::new(destination.clone()));
        entry.costs.insert(nh_hash, cost);
        entry.refresh()
    }

    /// Invalidate one neighbor's contribution to every destination, before
    /// its full advertisement is re-applied. Entries are left with stale
    /// cached top-2 values; the following [`Rib::set`] and [`Rib::prune`]
    /// calls refresh them.
    pub fn dirty_reset_next_hop(&mut self, next_hop: &Name) {
        let nh_hash = next_hop.hash_u64();
        for entry in self.entries.values_mut() {
            if entry.costs.contains_key(&nh_hash) {
                entry.costs.insert(nh_hash, COST_INFINITY);
            }
        }
    }

    /// Strip a removed neighbor from every entry. Returns whether any top-2
    /// changed.
    pub fn remove_next_hop(&mut self, next_hop: &Name) -> bool {
        let nh_hash = next_hop.hash_u64();
        let mut dirty = false;
        for entry in self.entries.values_mut() {
            if entry.costs.remove(&nh_hash).is_some() {
                dirty |= entry.refresh();
            }
        }
        self.neighbor_names.remove(&nh_hash);
        dirty
    }

    /// Refresh all entries and drop destinations with no reachable path.
    /// Returns whether anything changed.
    pub fn prune(&mut self) -> bool {
        let mut dirty = false;
        self.entries.retain(|_, entry| {
            dirty |= entry.refresh();
            if entry.lowest1 >= COST_INFINITY {
                dirty = true;
                false
            } else {
                true
            }
        });
        dirty
    }

    /// Build this router's advertisement from the current table.
    pub fn advert(&self) -> Advertisement {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            let Some(next_hop) = self.neighbor_names.get(&entry.next_hop1) else {
                continue;
            };
            entries.push(AdvEntry {
                destination: entry.name.clone(),
                next_hop: next_hop.clone(),
                cost: entry.lowest1,
                other_cost: entry.lowest2,
            });
        }
        entries.sort_by(|a, b| a.destination.cmp(&b.destination));
        Advertisement { entries }
    }

    /// Top-2 forwarder next hops for the destination with hash `router`:
    /// the entry's best two neighbors, skipping any unknown to the neighbor
    /// table or at infinite cost.
    pub fn fib_entries(&self, neighbors: &NeighborTable, router: u64) -> Vec<FibEntry> {
        let Some(entry) = self.entries.get(&router) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(2);
        for (cost, hop) in [
            (entry.lowest1, entry.next_hop1),
            (entry.lowest2, entry.next_hop2),
        ] {
            if cost >= COST_INFINITY {
                continue;
            }
            if let Some(ns) = neighbors.get_h(hop) {
                out.push(FibEntry::new(ns.face_id(), cost));
            }
        }
        out
    }
}
