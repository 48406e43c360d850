//! Forwarding table synchronizer.
//!
//! Diffs the routes derived from the RIB and prefix table against what was
//! last programmed into the forwarder, and emits the minimal set of
//! register/unregister commands. Per-face `prev_cost` suppresses no-op
//! re-registrations; a mark/sweep pass withdraws prefixes no destination
//! advertises anymore.

use std::collections::{HashMap, HashSet};

use crate::config::{COST_PFX_INFINITY, ROUTE_ORIGIN};
use crate::executor::{CommandQueue, MgmtCmd, Retry};
use crate::name::Name;
use crate::tlv::ControlArgs;

/// One programmed next hop for a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibEntry {
    pub face_id: u64,
    pub cost: u64,
    /// Cost at the last programming, used to suppress no-op registers.
    prev_cost: u64,
}

impl FibEntry {
    pub fn new(face_id: u64, cost: u64) -> Self {
        FibEntry { face_id, cost, prev_cost: COST_PFX_INFINITY }
    }

    /// Copy with `add` folded into the cost (path cost + announced cost).
    pub fn plus_cost(self, add: u64) -> Self {
        FibEntry { cost: self.cost.saturating_add(add), ..self }
    }
}

pub struct Fib {
    queue: CommandQueue,
    /// Prefix hash -> name, for command construction.
    names: HashMap<u64, Name>,
    /// Prefix hash -> programmed entries.
    prefixes: HashMap<u64, Vec<FibEntry>>,
    /// Prefixes seen during the current resync pass.
    mark: HashSet<u64>,
}

impl Fib {
    pub fn new(queue: CommandQueue) -> Self {
        Fib {
            queue,
            names: HashMap::new(),
            prefixes: HashMap::new(),
            mark: HashSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.prefixes.len()
    }

    /// Reprogram `name` with `new_entries`, merging against what is already
    /// programmed. Returns whether any reachable entry remains.
    pub fn update(&mut self, name: &Name, new_entries: &[FibEntry]) -> bool {
        self.update_h(name.hash_u64(), name, new_entries)
    }

    pub fn update_h(&mut self, name_h: u64, name: &Name, new_entries: &[FibEntry]) -> bool {
        self.names.entry(name_h).or_insert_with(|| name.clone());

        // Default every programmed face to withdrawal, remembering what it
        // was programmed at.
        let mut old_entries = self.prefixes.remove(&name_h).unwrap_or_default();
        for oe in &mut old_entries {
            oe.prev_cost = oe.cost;
            oe.cost = COST_PFX_INFINITY;
        }

        for ne in new_entries {
            if ne.cost >= COST_PFX_INFINITY {
                continue;
            }
            // Duplicates across destinations (multi-homed prefixes) fold to
            // the minimum cost per face.
            match old_entries.iter_mut().find(|oe| oe.face_id == ne.face_id) {
                Some(oe) => oe.cost = oe.cost.min(ne.cost),
                None => old_entries.push(FibEntry {
                    face_id: ne.face_id,
                    cost: ne.cost,
                    prev_cost: COST_PFX_INFINITY,
                }),
            }
        }

        let mut final_entries = Vec::with_capacity(old_entries.len());
        for oe in old_entries {
            if oe.cost >= COST_PFX_INFINITY {
                self.queue.execute(MgmtCmd {
                    module: "rib",
                    cmd: "unregister",
                    args: ControlArgs {
                        name: Some(name.clone()),
                        face_id: Some(oe.face_id),
                        origin: Some(ROUTE_ORIGIN),
                        ..Default::default()
                    },
                    retries: Retry::Limit(3),
                });
            } else {
                final_entries.push(oe);
            }
        }

        for entry in &final_entries {
            if entry.cost == entry.prev_cost {
                continue;
            }
            self.queue.execute(MgmtCmd {
                module: "rib",
                cmd: "register",
                args: ControlArgs {
                    name: Some(name.clone()),
                    face_id: Some(entry.face_id),
                    cost: Some(entry.cost),
                    origin: Some(ROUTE_ORIGIN),
                    ..Default::default()
                },
                retries: Retry::Limit(3),
            });
        }

        if final_entries.is_empty() {
            self.mark.remove(&name_h);
            self.names.remove(&name_h);
            false
        } else {
            self.prefixes.insert(name_h, final_entries);
            true
        }
    }

    pub fn mark_h(&mut self, name_h: u64) {
        self.mark.insert(name_h);
    }

    pub fn unmark_all(&mut self) {
        self.mark.clear();
    }

    /// Withdraw every prefix the current pass did not mark.
    pub fn remove_unmarked(&mut self) {
        let unmarked: Vec<u64> = self
            .prefixes
            .keys()
            .filter(|h| !self.mark.contains(h))
            .copied()
            .collect();
        for name_h in unmarked {
            if let Some(name) = self.names.get(&name_h).cloned() {
                self.update_h(name_h, &name, &[]);
            }
        }
    }
}
