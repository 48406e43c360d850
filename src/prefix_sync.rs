//! Prefix table propagation over the network-wide sync group.
//!
//! Local announce/withdraw operations publish an incremental op list; a
//! full snapshot is republished periodically so late joiners converge in
//! one fetch. Remote publications, incremental and snapshot alike, arrive
//! on the router's delivery channel and fold in through the same path.

use tracing::{debug, error, warn};

use crate::name::Name;
use crate::prefixes::PREFIX_SNAP_THRESHOLD;
use crate::protocols::PrefixPublication;
use crate::router::Router;
use crate::tlv::PrefixOpList;

impl Router {
    /// Announce a local prefix. Publishes to the sync group when the
    /// advertised cost changed.
    pub async fn announce_prefix(&self, name: &Name, face_id: u64, cost: u64) {
        let op = self.tables().await.prefixes.announce(name, face_id, cost);
        if let Some(op) = op {
            self.publish_prefix_op(op).await;
        }
    }

    /// Withdraw a local prefix from one next hop.
    pub async fn withdraw_prefix(&self, name: &Name, face_id: u64) {
        let op = self.tables().await.prefixes.withdraw(name, face_id);
        if let Some(op) = op {
            self.publish_prefix_op(op).await;
        }
    }

    /// Publish one op list, snapshotting when enough operations have
    /// accumulated since the last snapshot.
    pub(crate) async fn publish_prefix_op(&self, op: PrefixOpList) {
        let seq = match self.inner.prefix_sync.publish(op.encode()).await {
            Ok(seq) => seq,
            Err(e) => {
                error!(error = %e, "failed to publish prefix table update");
                return;
            }
        };

        let snapshot = {
            let mut tables = self.tables().await;
            if seq.saturating_sub(tables.pfx_snapshot_at) >= PREFIX_SNAP_THRESHOLD / 2 {
                tables.pfx_snapshot_at = seq;
                Some(tables.prefixes.snapshot())
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            debug!(seq, "publishing prefix table snapshot");
            if let Err(e) = self.inner.prefix_sync.publish(snapshot.encode()).await {
                error!(error = %e, "failed to publish prefix table snapshot");
            }
        }
    }

    /// Handle a publication delivered from a subscribed router's feed.
    pub(crate) async fn on_prefix_publication(&self, publication: PrefixPublication) {
        let ops = match PrefixOpList::decode(&publication.content) {
            Ok(ops) => ops,
            Err(e) => {
                warn!(publisher = %publication.publisher, error = %e, "failed to parse prefix op list");
                return;
            }
        };

        if ops.exit_router == *self.config().router_name() {
            return;
        }

        let dirty = self.tables().await.prefixes.apply(&ops);
        if dirty {
            // Prefix changes can alter forwarder routes.
            self.update_fib().await;
        }
    }
}
