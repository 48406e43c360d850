//! Router configuration and the name table derived from it.
//!
//! The raw fields deserialize from the daemon's YAML config file (under the
//! `dv:` key). [`Config::validate`] checks them once at startup — the only
//! place where errors are fatal — and precomputes every derived prefix so
//! the hot paths never re-parse names.

use std::time::Duration;

use serde::Deserialize;

use crate::name::{Component, Name};

/// Costs at or above this are unreachable in the RIB.
pub const COST_INFINITY: u64 = 16;

/// Marks a forwarder route entry for withdrawal.
pub const COST_PFX_INFINITY: u64 = u32::MAX as u64;

/// Route origin tag for all routes this daemon programs (NLSR origin).
pub const ROUTE_ORIGIN: u64 = 128;

/// A statically configured neighbor link.
#[derive(Debug, Clone, Deserialize)]
pub struct NeighborConfig {
    /// Face URI, e.g. `udp4://192.0.2.1:6363`.
    pub uri: String,
    /// Optional MTU override for the created face.
    #[serde(default)]
    pub mtu: Option<u64>,
}

/// Raw configuration for one router instance.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Network prefix, identical on every router in the network.
    pub network: String,
    /// Router prefix, unique per router.
    pub router: String,
    /// Period of advertisement sync interests, in milliseconds.
    #[serde(default = "default_advertise_interval")]
    pub advertise_interval: u64,
    /// Silence after which a neighbor is declared dead, in milliseconds.
    #[serde(default = "default_dead_interval")]
    pub router_dead_interval: u64,
    /// Cost of the link to each neighbor. Per-link metrics are not
    /// supported; one value applies to all links.
    #[serde(default = "default_local_cost")]
    pub local_cost: u64,
    /// Neighbors to create faces to at startup.
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
}

fn default_advertise_interval() -> u64 {
    5000
}

fn default_dead_interval() -> u64 {
    30000
}

fn default_local_cost() -> u64 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("network and router must be set")]
    MissingNames,

    #[error("invalid name {0:?}: {1}")]
    BadName(String, crate::name::NameError),

    #[error("advertise_interval must be at least 1 second")]
    AdvertiseIntervalTooShort,

    #[error("router_dead_interval must be at least 2x advertise_interval")]
    DeadIntervalTooShort,

    #[error("local_cost must be in 1..{}", COST_INFINITY)]
    BadLocalCost,
}

/// Validated configuration with the precomputed name table.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    raw: Config,
    network_name: Name,
    router_name: Name,
    adv_sync_prefix: Name,
    adv_sync_active_prefix: Name,
    adv_sync_passive_prefix: Name,
    adv_data_prefix: Name,
    pfx_group_prefix: Name,
    pfx_svs_prefix: Name,
    pfx_data_prefix: Name,
    mgmt_prefix: Name,
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.network.is_empty() || self.router.is_empty() {
            return Err(ConfigError::MissingNames);
        }

        let network_name: Name = self
            .network
            .parse()
            .map_err(|e| ConfigError::BadName(self.network.clone(), e))?;
        let router_name: Name = self
            .router
            .parse()
            .map_err(|e| ConfigError::BadName(self.router.clone(), e))?;

        if self.advertise_interval < 1000 {
            return Err(ConfigError::AdvertiseIntervalTooShort);
        }
        if self.router_dead_interval < 2 * self.advertise_interval {
            return Err(ConfigError::DeadIntervalTooShort);
        }
        if self.local_cost == 0 || self.local_cost >= COST_INFINITY {
            return Err(ConfigError::BadLocalCost);
        }

        let dv = Component::keyword("DV");

        // /localhop/<network>/32=DV/32=ADS
        let adv_sync_prefix = Name::localhop()
            .join(&network_name)
            .append(dv.clone())
            .append(Component::keyword("ADS"));
        let adv_sync_active_prefix = adv_sync_prefix.append(Component::keyword("ACT"));
        let adv_sync_passive_prefix = adv_sync_prefix.append(Component::keyword("PSV"));

        // /localhop/<router>/32=DV/32=ADV
        let adv_data_prefix = Name::localhop()
            .join(&router_name)
            .append(dv.clone())
            .append(Component::keyword("ADV"));

        // /<network>/32=DV/32=PFS
        let pfx_group_prefix = network_name
            .append(dv.clone())
            .append(Component::keyword("PFS"));
        let pfx_svs_prefix = pfx_group_prefix.append(Component::keyword("svs"));

        // /<router>/32=DV/32=PFX
        let pfx_data_prefix = router_name.append(dv).append(Component::keyword("PFX"));

        // /localhost/nlsr
        let mgmt_prefix = Name::localhost().append(Component::generic("nlsr"));

        Ok(ValidatedConfig {
            raw: self,
            network_name,
            router_name,
            adv_sync_prefix,
            adv_sync_active_prefix,
            adv_sync_passive_prefix,
            adv_data_prefix,
            pfx_group_prefix,
            pfx_svs_prefix,
            pfx_data_prefix,
            mgmt_prefix,
        })
    }
}

impl ValidatedConfig {
    pub fn network_name(&self) -> &Name {
        &self.network_name
    }

    pub fn router_name(&self) -> &Name {
        &self.router_name
    }

    pub fn neighbors(&self) -> &[NeighborConfig] {
        &self.raw.neighbors
    }

    pub fn local_cost(&self) -> u64 {
        self.raw.local_cost
    }

    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.raw.advertise_interval)
    }

    pub fn router_dead_interval(&self) -> Duration {
        Duration::from_millis(self.raw.router_dead_interval)
    }

    /// Advertisement sync group prefix (both channels).
    pub fn advert_sync_prefix(&self) -> &Name {
        &self.adv_sync_prefix
    }

    /// Sync prefix for links this router initiates.
    pub fn advert_sync_active_prefix(&self) -> &Name {
        &self.adv_sync_active_prefix
    }

    /// Sync prefix for links initiated by the neighbor.
    pub fn advert_sync_passive_prefix(&self) -> &Name {
        &self.adv_sync_passive_prefix
    }

    /// Prefix under which this router's advertisements are published.
    pub fn advert_data_prefix(&self) -> &Name {
        &self.adv_data_prefix
    }

    /// Network-wide prefix table sync group.
    pub fn prefix_group_prefix(&self) -> &Name {
        &self.pfx_group_prefix
    }

    /// Sync interest route for the prefix table group.
    pub fn prefix_svs_prefix(&self) -> &Name {
        &self.pfx_svs_prefix
    }

    /// Prefix under which this router's prefix table ops are published.
    pub fn prefix_data_prefix(&self) -> &Name {
        &self.pfx_data_prefix
    }

    /// Local management surface (`/localhost/nlsr`).
    pub fn mgmt_prefix(&self) -> &Name {
        &self.mgmt_prefix
    }

    /// Multicast strategy name for the sync prefixes.
    pub fn multicast_strategy() -> Name {
        Name::localhost()
            .append(Component::generic("nfd"))
            .append(Component::generic("strategy"))
            .append(Component::generic("multicast"))
    }
}
