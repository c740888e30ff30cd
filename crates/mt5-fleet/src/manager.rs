//! [`FleetManager`] is the operation surface handed to front-ends. It owns the
//! runtime connection; there is no process-wide client.

use crate::config::FleetConfig;
use crate::deploy::ArtifactDeployer;
use crate::gateway::{BollardGateway, RuntimeGateway};
use crate::lifecycle::LifecycleController;
use crate::logs::LogAccessor;
use crate::naming;
use crate::ports::PortAllocator;
use crate::registry::InstanceRegistry;
use crate::stats::StatsCollector;
use mt5_common::{
    BulkReport, FleetSummary, InstanceRecord, LogCategory, PortPair, Result, StatsSnapshot,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of [`FleetManager::create_instance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInstance {
    pub id: String,
    pub name: String,
    pub ports: PortPair,
}

#[derive(Clone)]
pub struct FleetManager {
    gateway: Arc<dyn RuntimeGateway>,
    config: FleetConfig,
    registry: InstanceRegistry,
    ports: PortAllocator,
    lifecycle: LifecycleController,
    stats: StatsCollector,
    logs: LogAccessor,
    deployer: ArtifactDeployer,
}

impl FleetManager {
    /// Connects to the local Docker daemon, failing if it does not answer.
    pub async fn connect(config: FleetConfig) -> Result<Self> {
        let gateway = BollardGateway::connect().await?;
        Ok(Self::with_gateway(Arc::new(gateway), config))
    }

    pub fn with_gateway(gateway: Arc<dyn RuntimeGateway>, config: FleetConfig) -> Self {
        let registry = InstanceRegistry::new(gateway.clone());
        Self {
            ports: PortAllocator::new(registry.clone()),
            lifecycle: LifecycleController::new(gateway.clone(), config.clone()),
            stats: StatsCollector::new(gateway.clone()),
            logs: LogAccessor::new(gateway.clone()),
            deployer: ArtifactDeployer::new(gateway.clone()),
            registry,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Whether the daemon answers a ping right now.
    pub async fn is_connected(&self) -> bool {
        self.gateway.ping().await.is_ok()
    }

    pub async fn list(&self) -> Vec<InstanceRecord> {
        self.registry.list().await
    }

    pub async fn try_list(&self) -> Result<Vec<InstanceRecord>> {
        self.registry.try_list().await
    }

    pub async fn summary(&self) -> FleetSummary {
        FleetSummary::from_records(&self.registry.list().await)
    }

    /// Instances whose name contains `query`, case-insensitively. A blank
    /// query matches everything.
    pub async fn filter_by_name(&self, query: &str) -> Vec<InstanceRecord> {
        let query = query.trim().to_lowercase();
        let mut records = self.registry.list().await;
        if !query.is_empty() {
            records.retain(|r| r.name.to_lowercase().contains(&query));
        }
        records
    }

    pub async fn next_available_ports(&self) -> Result<PortPair> {
        self.ports
            .next_available(self.config.base_vnc_port, self.config.base_api_port)
            .await
    }

    /// Picks the next free port pair and creates the instance on it.
    #[instrument(skip(self))]
    pub async fn create_instance(&self, account: &str) -> Result<CreatedInstance> {
        let name = naming::container_name(naming::normalize_account(account)?);
        let ports = self.next_available_ports().await?;
        let id = self.lifecycle.create(account, ports.vnc, ports.api).await?;
        info!(%name, vnc = ports.vnc, api = ports.api, "Instance ready");
        Ok(CreatedInstance { id, name, ports })
    }

    pub async fn create(&self, account: &str, vnc_port: u16, api_port: u16) -> Result<String> {
        self.lifecycle.create(account, vnc_port, api_port).await
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.lifecycle.start(id).await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.lifecycle.stop(id).await
    }

    pub async fn restart(&self, id: &str) -> Result<()> {
        self.lifecycle.restart(id).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.lifecycle.remove(id).await
    }

    pub async fn kill_all(&self) -> BulkReport {
        self.lifecycle.kill_all().await
    }

    pub async fn stats(&self, id: &str) -> StatsSnapshot {
        self.stats.snapshot(id).await
    }

    pub async fn list_log_files(&self, id: &str, category: LogCategory) -> Vec<String> {
        self.logs.list_files(id, category).await
    }

    pub async fn read_log_file(
        &self,
        id: &str,
        category: LogCategory,
        filename: &str,
    ) -> Result<String> {
        self.logs.read_file(id, category, filename).await
    }

    pub async fn upload(&self, id: &str, path: impl AsRef<Path>) -> Result<()> {
        self.deployer.upload(id, path).await
    }

    pub async fn upload_bytes(&self, id: &str, file_name: &str, contents: &[u8]) -> Result<()> {
        self.deployer.upload_bytes(id, file_name, contents).await
    }

    /// Uploads one artifact to every running instance in a registry snapshot,
    /// carrying on past failures.
    #[instrument(skip(self, contents))]
    pub async fn upload_to_running(&self, file_name: &str, contents: &[u8]) -> BulkReport {
        if let Err(e) = crate::deploy::artifact_kind(file_name) {
            return BulkReport::aborted(&e);
        }
        let instances = match self.registry.try_list().await {
            Ok(instances) => instances,
            Err(e) => return BulkReport::aborted(&e),
        };

        let mut results = Vec::new();
        for instance in instances.into_iter().filter(|i| i.status.is_running()) {
            let result = self.deployer.upload_bytes(&instance.id, file_name, contents).await;
            if let Err(e) = &result {
                warn!(instance = %instance.name, error = %e, "Upload failed");
            }
            results.push((instance.name, result));
        }
        BulkReport::collect("upload to", results)
    }
}
