//! Local management surface, served under the router-local prefix.
//!
//! Two commands: `status` replies with an encoded [`Status`], and `rib`
//! accepts NFD-style readvertise requests (register/unregister) that feed
//! the prefix table. Anything else is dropped without a reply; a malformed
//! `rib` request still gets a 400 response.

use tracing::{debug, warn};

use crate::name::Name;
use crate::router::Router;
use crate::tlv::{ControlArgs, ControlResponse, Status};

/// Origin reported back in successful readvertise responses, matching what
/// NFD's readvertise clients expect.
const CLIENT_ORIGIN: u64 = 65;

/// Reply to one management interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MgmtReply {
    Status(Status),
    Rib(ControlResponse),
}

impl MgmtReply {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            MgmtReply::Status(status) => status.encode(),
            MgmtReply::Rib(res) => res.encode(),
        }
    }
}

fn component_str(name: &Name, i: usize) -> &str {
    name.at(i)
        .and_then(|c| std::str::from_utf8(&c.value).ok())
        .unwrap_or("")
}

impl Router {
    /// Current router status for the `status` command.
    pub async fn status(&self) -> Status {
        let tables = self.tables().await;
        Status {
            version: env!("CARGO_PKG_VERSION").to_string(),
            network_name: self.config().network_name().clone(),
            router_name: self.config().router_name().clone(),
            n_rib_entries: tables.rib.size() as u64,
            n_neighbors: tables.neighbors.size() as u64,
            n_fib_entries: tables.fib.size() as u64,
        }
    }

    /// Dispatch a management interest by name. `None` means no reply is
    /// sent (unknown or malformed command).
    pub async fn handle_mgmt(&self, interest_name: &Name) -> Option<MgmtReply> {
        let prefix_len = self.config().mgmt_prefix().len();
        if !interest_name.starts_with(self.config().mgmt_prefix())
            || interest_name.len() < prefix_len + 1
        {
            warn!(name = %interest_name, "invalid management interest");
            return None;
        }

        match component_str(interest_name, prefix_len) {
            "status" => Some(MgmtReply::Status(self.status().await)),
            "rib" => Some(MgmtReply::Rib(self.handle_rib_command(interest_name).await)),
            other => {
                warn!(name = %interest_name, command = other, "unknown management command");
                None
            }
        }
    }

    /// Handle a readvertise request:
    /// `/localhost/nlsr/rib/<cmd>/<control-parameters>/<params-sha256>`.
    async fn handle_rib_command(&self, interest_name: &Name) -> ControlResponse {
        let failed = ControlResponse::error(400, "Failed to execute command");

        if interest_name.len() != 6 {
            warn!(name = %interest_name, "invalid readvertise interest");
            return failed;
        }
        if component_str(interest_name, 2) != "rib" {
            warn!(name = %interest_name, "unknown readvertise module");
            return failed;
        }

        let params = interest_name
            .at(4)
            .and_then(|c| ControlArgs::decode(&c.value).ok());
        let Some(params) = params else {
            warn!(name = %interest_name, "failed to parse readvertise parameters");
            return failed;
        };
        let Some(name) = params.name else {
            warn!(name = %interest_name, "readvertise parameters carry no name");
            return failed;
        };
        let face_id = params.face_id.unwrap_or(0);
        let cost = params.cost.unwrap_or(0);

        let cmd = component_str(interest_name, 3);
        debug!(cmd, %name, "received readvertise request");
        match cmd {
            "register" => self.announce_prefix(&name, face_id, cost).await,
            "unregister" => self.withdraw_prefix(&name, face_id).await,
            other => {
                warn!(cmd = other, "unknown readvertise command");
                return failed;
            }
        }

        ControlResponse {
            status_code: 200,
            status_text: "Readvertise command successful".to_string(),
            body: Some(ControlArgs {
                name: Some(name),
                // NFD compatibility values.
                face_id: Some(1),
                origin: Some(CLIENT_ORIGIN),
                ..Default::default()
            }),
        }
    }
}
