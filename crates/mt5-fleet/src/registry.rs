//! Projects fleet containers into [`InstanceRecord`]s. Nothing is cached: each
//! call asks the runtime again.

use crate::gateway::{ContainerRef, GatewayError, RuntimeGateway};
use crate::naming::{self, API_CONTAINER_PORT, VNC_CONTAINER_PORT};
use mt5_common::{InstanceRecord, InstanceStatus, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Length of the short id shown to callers.
pub const SHORT_ID_LEN: usize = 12;

#[derive(Clone)]
pub struct InstanceRegistry {
    gateway: Arc<dyn RuntimeGateway>,
}

impl InstanceRegistry {
    pub fn new(gateway: Arc<dyn RuntimeGateway>) -> Self {
        Self { gateway }
    }

    /// All fleet instances, running or not, in runtime order. An unreachable
    /// runtime yields an empty list; use [`InstanceRegistry::try_list`] or a
    /// ping to tell the two apart.
    pub async fn list(&self) -> Vec<InstanceRecord> {
        match self.try_list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Error listing containers");
                Vec::new()
            }
        }
    }

    /// Fleet containers as the runtime lists them, without inspecting any.
    pub async fn members(&self) -> Result<Vec<ContainerRef>> {
        let containers = self.gateway.list(true).await?;
        Ok(containers
            .into_iter()
            .filter(|c| naming::is_fleet_member(&c.name))
            .collect())
    }

    /// Like [`InstanceRegistry::list`] but fails when the runtime is
    /// unreachable. A container that cannot be inspected is still listed,
    /// with status `Unknown` and no ports.
    pub async fn try_list(&self) -> Result<Vec<InstanceRecord>> {
        let mut records = Vec::new();

        for container in self.members().await? {
            match self.gateway.inspect(&container.id).await {
                Ok(details) => records.push(InstanceRecord {
                    id: short_id(&details.id).to_string(),
                    name: details.name,
                    status: details.status,
                    vnc_port: details.host_ports.get(VNC_CONTAINER_PORT).copied(),
                    api_port: details.host_ports.get(API_CONTAINER_PORT).copied(),
                }),
                // removed between list and inspect
                Err(GatewayError::NotFound(_)) => {
                    debug!(container = %container.name, "Container vanished during listing");
                }
                Err(e @ GatewayError::Connectivity(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Inspect failed");
                    records.push(InstanceRecord {
                        id: short_id(&container.id).to_string(),
                        name: container.name,
                        status: InstanceStatus::Unknown,
                        vnc_port: None,
                        api_port: None,
                    });
                }
            }
        }

        Ok(records)
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockContainer, MockGateway};

    #[tokio::test]
    async fn test_only_fleet_members_listed() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add(MockContainer::running("trading_mt5_alpha").with_ports(3000, 8001));
        gateway.add(MockContainer::running("postgres"));
        gateway.add(MockContainer::exited("trading_mt5_beta").with_ports(3001, 8002));
        gateway.add(MockContainer::running("mt5_trading_gamma"));

        let registry = InstanceRegistry::new(gateway);
        let records = registry.list().await;

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["trading_mt5_alpha", "trading_mt5_beta"]);
        assert_eq!(records[0].status, InstanceStatus::Running);
        assert_eq!(records[1].status, InstanceStatus::Exited);
        assert_eq!(records[1].vnc_port, Some(3001));
        assert_eq!(records[1].api_port, Some(8002));
        assert_eq!(records[0].id.len(), SHORT_ID_LEN);
    }

    #[tokio::test]
    async fn test_missing_bindings_stay_absent() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add(MockContainer::running("trading_mt5_novnc").with_api_port(8004));

        let records = InstanceRegistry::new(gateway).list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vnc_port, None);
        assert_eq!(records[0].api_port, Some(8004));
    }

    #[tokio::test]
    async fn test_unreachable_runtime_lists_nothing() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add(MockContainer::running("trading_mt5_alpha"));
        gateway.set_offline(true);

        let registry = InstanceRegistry::new(gateway);
        assert!(registry.list().await.is_empty());
        assert!(matches!(
            registry.try_list().await,
            Err(mt5_common::FleetError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn test_inspect_failure_keeps_other_instances() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add(MockContainer::running("trading_mt5_a").with_ports(3000, 8001));
        gateway.add(MockContainer::running("trading_mt5_b").with_ports(3001, 8002));
        gateway.add(MockContainer::exited("trading_mt5_c").with_ports(3002, 8003));
        gateway.fail(
            "inspect",
            "trading_mt5_b",
            GatewayError::Api("driver overlay2 failed".to_string()),
        );

        let registry = InstanceRegistry::new(gateway);
        let records = registry.try_list().await.unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["trading_mt5_a", "trading_mt5_b", "trading_mt5_c"]);
        assert_eq!(records[1].status, InstanceStatus::Unknown);
        assert_eq!(records[1].vnc_port, None);
        assert_eq!(records[1].api_port, None);
        assert_eq!(records[1].id.len(), SHORT_ID_LEN);
        assert_eq!(records[2].status, InstanceStatus::Exited);
        assert_eq!(registry.list().await.len(), 3);
    }

    #[tokio::test]
    async fn test_members_skips_inspect() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add(MockContainer::running("trading_mt5_a"));
        gateway.add(MockContainer::running("redis"));

        let members = InstanceRegistry::new(gateway.clone()).members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "trading_mt5_a");
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
