//! # namedv - Distance-Vector Routing for Named-Data Networks
//!
//! namedv computes, for every router in a network, the lowest-cost next
//! hops to reach it, propagates that reachability to peers, and programs
//! the local packet forwarder accordingly. It also disseminates each
//! router's announced service name-prefixes so traffic reaches the right
//! egress.
//!
//! ## Architecture
//!
//! Four tables (neighbors, RIB, FIB, prefix table) live behind one lock
//! owned by the [`Router`] orchestrator; every network event mutates them
//! as one atomic unit. Follow-up work (FIB resync, advertisement
//! regeneration) runs on spawned tasks that re-acquire the lock, so no
//! critical section spans network I/O. All transport concerns are behind
//! traits in [`protocols`]: the routing core can be driven entirely by
//! in-process fakes.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `router` | Orchestrator: lifecycle, timers, table update passes |
//! | `advert` | Advertisement sync, fetch, and generation |
//! | `prefix_sync` | Prefix table propagation over the sync group |
//! | `mgmt` | Local management surface (status, readvertise) |
//! | `neighbors` | Neighbor liveness and face bindings |
//! | `rib` | Distance-vector core with poison reverse |
//! | `fib` | Forwarder route diffing and programming |
//! | `prefixes` | Announced name-prefix table, local and remote |
//! | `executor` | Serialized, retrying forwarder command queue |
//! | `protocols` | Collaborator trait definitions |
//! | `tlv` | Wire codecs for the inter-router protocol |
//! | `name` | Hierarchical names and their encoding |
//! | `config` | Configuration and the derived name table |

mod advert;
pub mod config;
pub mod executor;
mod fib;
mod mgmt;
pub mod name;
mod neighbors;
mod prefix_sync;
mod prefixes;
pub mod protocols;
mod rib;
mod router;
pub mod tlv;

pub use config::{Config, NeighborConfig, ValidatedConfig, COST_INFINITY};
pub use mgmt::MgmtReply;
pub use router::{Phase, Router};
