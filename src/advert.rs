//! Advertisement exchange: state-vector sync handling, debounced fetch of
//! neighbor advertisements, and publication of our own.
//!
//! A sync update only says "router R is at sequence S". The advertisement
//! itself is a versioned data object fetched separately; a fetch result is
//! applied only if S still matches the neighbor's live state, which makes
//! per-neighbor processing idempotent on sequence number.

use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::name::{Component, Name};
use crate::protocols::StateVectorEntry;
use crate::router::Router;
use crate::tlv::Advertisement;

/// Debounce before fetching, coalescing rapid sequence churn.
const FETCH_DEBOUNCE: Duration = Duration::from_millis(10);

/// Backoff between failed fetch attempts.
const FETCH_RETRY: Duration = Duration::from_secs(1);

/// Interest lifetime for advertisement fetches.
const FETCH_LIFETIME: Duration = Duration::from_secs(4);

/// Freshness of published advertisement objects.
const ADVERT_FRESHNESS: Duration = Duration::from_secs(10);

impl Router {
    /// Handle a state vector received on a sync channel. `active` says
    /// which channel: the one we initiate toward neighbors, or the one
    /// they initiate toward us.
    pub async fn on_advert_sync(&self, entries: &[StateVectorEntry], face_id: u64, active: bool) {
        let mut fib_dirty = false;
        {
            let mut tables = self.tables().await;
            let tables = &mut *tables;

            for entry in entries {
                if entry.router == *self.config().router_name() {
                    continue;
                }

                if let Some(ns) = tables.neighbors.get(&entry.router) {
                    if ns.advert_boot >= entry.boot && ns.advert_seq >= entry.seq {
                        // Nothing new; just refresh liveness.
                        fib_dirty |= tables.neighbors.recv_ping(&entry.router, face_id, active);
                        continue;
                    }
                } else {
                    tables.neighbors.add(&entry.router);
                }

                fib_dirty |= tables.neighbors.recv_ping(&entry.router, face_id, active);
                if let Some(ns) = tables.neighbors.get_mut(&entry.router) {
                    ns.advert_boot = entry.boot;
                    ns.advert_seq = entry.seq;
                }

                self.spawn_advert_fetch(entry.router.clone(), entry.seq);
            }
        }

        if fib_dirty {
            let router = self.clone();
            tokio::spawn(async move { router.update_fib().await });
        }
    }

    /// Name of a neighbor's advertisement object at a given sequence.
    fn advert_object_name(neighbor: &Name, seq: u64) -> Name {
        Name::localhop()
            .join(neighbor)
            .append(Component::keyword("DV"))
            .append(Component::keyword("ADV"))
            .append(Component::sequence_num(seq))
    }

    /// Fetch `neighbor`'s advertisement at `seq` on a fresh task, retrying
    /// until it succeeds or the sequence number is superseded.
    fn spawn_advert_fetch(&self, neighbor: Name, seq: u64) {
        let router = self.clone();
        tokio::spawn(async move {
            sleep(FETCH_DEBOUNCE).await;

            loop {
                // Abandon a stale in-flight fetch: if the neighbor is gone
                // or already at a newer sequence, this result is worthless.
                {
                    let tables = router.tables().await;
                    match tables.neighbors.get(&neighbor) {
                        Some(ns) if ns.advert_seq == seq => {}
                        _ => return,
                    }
                }

                let name = Self::advert_object_name(&neighbor, seq);
                let content = match router.inner.client.fetch(&name, true, FETCH_LIFETIME).await {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(%name, error = %e, "advertisement fetch failed, retrying");
                        sleep(FETCH_RETRY).await;
                        continue;
                    }
                };

                let advert = match Advertisement::decode(&content) {
                    Ok(advert) => advert,
                    Err(e) => {
                        warn!(%name, error = %e, "failed to parse advertisement");
                        return;
                    }
                };

                {
                    let mut tables = router.tables().await;
                    let Some(ns) = tables.neighbors.get_mut(&neighbor) else {
                        return;
                    };
                    if ns.advert_seq != seq {
                        debug!(%neighbor, seq, "discarding stale advertisement");
                        return;
                    }
                    ns.advert = Some(advert);
                }

                router.update_rib(&neighbor).await;
                return;
            }
        });
    }

    /// Bump our sequence number, publish the advertisement derived from
    /// the RIB, and notify neighbors immediately.
    pub(crate) async fn advert_generate(&self) {
        let (seq, content) = {
            let mut tables = self.tables().await;
            tables.advert_seq += 1;
            (tables.advert_seq, tables.rib.advert().encode())
        };

        let name = self
            .config()
            .advert_data_prefix()
            .append(Component::sequence_num(seq));
        if let Err(e) = self.inner.client.produce(&name, content, ADVERT_FRESHNESS).await {
            warn!(%name, error = %e, "failed to publish advertisement");
        }

        self.send_sync_interests().await;
    }

    /// Announce our current sequence number on both sync channels.
    pub(crate) async fn send_sync_interests(&self) {
        let seq = self.tables().await.advert_seq;
        let me = self.config().router_name().clone();

        for prefix in [
            self.config().advert_sync_active_prefix().clone(),
            self.config().advert_sync_passive_prefix().clone(),
        ] {
            if let Err(e) = self
                .inner
                .advert_sync
                .send_state_vector(&prefix, &me, self.inner.boot_time, seq)
                .await
            {
                warn!(%prefix, error = %e, "failed to send sync interest");
            }
        }
    }
}
