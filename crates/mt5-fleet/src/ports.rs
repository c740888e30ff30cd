//! Next-free port pair selection.
//!
//! The choice is point-in-time and reserves nothing: two concurrent creates can
//! pick the same pair before either container exists. The loser then fails at
//! create time with the daemon's "port is already allocated" error.

use crate::registry::InstanceRegistry;
use mt5_common::{FleetError, PortPair, Result};
use std::collections::HashSet;

pub const DEFAULT_BASE_VNC: u16 = 3000;
pub const DEFAULT_BASE_API: u16 = 8001;

#[derive(Clone)]
pub struct PortAllocator {
    registry: InstanceRegistry,
}

impl PortAllocator {
    pub fn new(registry: InstanceRegistry) -> Self {
        Self { registry }
    }

    /// Lowest free VNC and API ports at or above the given bases, scanned
    /// independently against a fresh registry listing.
    pub async fn next_available(&self, base_vnc: u16, base_api: u16) -> Result<PortPair> {
        let instances = self.registry.try_list().await?;
        let used_vnc: HashSet<u16> = instances.iter().filter_map(|i| i.vnc_port).collect();
        let used_api: HashSet<u16> = instances.iter().filter_map(|i| i.api_port).collect();

        Ok(PortPair {
            vnc: next_free(base_vnc, &used_vnc)?,
            api: next_free(base_api, &used_api)?,
        })
    }
}

/// Linear scan upward from `base` for the first port not in `used`.
pub fn next_free(base: u16, used: &HashSet<u16>) -> Result<u16> {
    (base..=u16::MAX)
        .find(|port| !used.contains(port))
        .ok_or(FleetError::PortsExhausted { base })
}
