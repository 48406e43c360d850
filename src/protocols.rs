//! Collaborator trait definitions for the routing control plane.
//!
//! The routing logic depends only on these traits, never on a concrete
//! transport. Each external subsystem the daemon talks to has its own trait:
//!
//! | Collaborator | Trait | Purpose |
//! |--------------|-------|---------|
//! | Forwarder | [`ForwarderControl`] | Management commands (rib, faces, strategy) |
//! | Object layer | [`ObjectClient`] | Publish and fetch versioned data objects |
//! | Advert gossip | [`AdvertSync`] | Broadcast state-vector sync interests |
//! | Prefix sync group | [`PrefixSync`] | Disseminate prefix table operations |
//!
//! Keeping the traits separate from any implementation lets the tables and
//! the orchestrator be driven end to end by in-process fakes in tests.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::name::Name;
use crate::tlv::{ControlArgs, ControlResponse};

/// Management command surface of the local packet forwarder.
#[async_trait]
pub trait ForwarderControl: Send + Sync + 'static {
    /// Execute one management command, e.g. `("rib", "register", ...)`.
    async fn exec_mgmt_cmd(
        &self,
        module: &str,
        cmd: &str,
        args: &ControlArgs,
    ) -> Result<ControlResponse>;
}

/// Outcome of creating a face through the forwarder.
#[derive(Debug, Clone, Copy)]
pub struct CreatedFace {
    pub face_id: u64,
    /// False when the face already existed and was reused.
    pub created: bool,
}

/// Create a permanent face to `uri`, reusing an existing one if present.
pub async fn create_perm_face(
    forwarder: &dyn ForwarderControl,
    uri: &str,
    mtu: Option<u64>,
) -> Result<CreatedFace> {
    // Persistency 2 = permanent. The forwarder answers 409 with the face
    // parameters when the face already exists, so errors are only fatal
    // when no face id comes back at all.
    let args = ControlArgs {
        uri: Some(uri.to_string()),
        face_persistency: Some(2),
        mtu,
        ..Default::default()
    };
    let res = forwarder.exec_mgmt_cmd("faces", "create", &args).await?;
    let face_id = res
        .body
        .as_ref()
        .and_then(|b| b.face_id)
        .ok_or_else(|| anyhow::anyhow!("face create returned no face id: {}", res.status_text))?;
    Ok(CreatedFace { face_id, created: res.status_code == 200 })
}

/// Publish/fetch interface for versioned data objects.
#[async_trait]
pub trait ObjectClient: Send + Sync + 'static {
    /// Publish `content` under `name`, returning the full published name.
    async fn produce(&self, name: &Name, content: Vec<u8>, freshness: Duration) -> Result<Name>;

    /// Fetch the object at `name`. One attempt; retry policy is the
    /// caller's concern.
    async fn fetch(&self, name: &Name, must_be_fresh: bool, lifetime: Duration) -> Result<Vec<u8>>;
}

/// Lightweight gossip channel announcing our advertisement sequence number
/// to neighbors. One send per sync prefix (active and passive channels).
#[async_trait]
pub trait AdvertSync: Send + Sync + 'static {
    async fn send_state_vector(
        &self,
        sync_prefix: &Name,
        router: &Name,
        boot: u64,
        seq: u64,
    ) -> Result<()>;
}

/// One state-vector entry received on an advertisement sync channel.
#[derive(Debug, Clone)]
pub struct StateVectorEntry {
    pub router: Name,
    pub boot: u64,
    pub seq: u64,
}

/// A prefix table publication delivered from the sync group.
#[derive(Debug, Clone)]
pub struct PrefixPublication {
    pub publisher: Name,
    /// Encoded `PrefixOpList` (incremental op or full snapshot).
    pub content: Vec<u8>,
}

/// Channel carrying prefix publications into the router event loop.
pub type PrefixPublicationSender = mpsc::Sender<PrefixPublication>;

/// Network-wide state-vector sync group for the prefix table.
#[async_trait]
pub trait PrefixSync: Send + Sync + 'static {
    /// Publish an encoded `PrefixOpList`, returning its sequence number.
    async fn publish(&self, content: Vec<u8>) -> Result<u64>;

    /// Start delivering `router`'s publications (incremental and snapshot
    /// alike) to the subscriber channel handed to the implementation.
    async fn subscribe_publisher(&self, router: &Name) -> Result<()>;

    /// Stop delivering `router`'s publications.
    async fn unsubscribe_publisher(&self, router: &Name) -> Result<()>;
}
