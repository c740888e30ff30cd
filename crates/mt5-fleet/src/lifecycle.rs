//! Create, start, stop, restart, remove and force-kill fleet instances.
//!
//! Instance state is owned by the runtime; every operation here is one or two
//! gateway calls with the failure passed back unchanged. Nothing is rolled
//! back: a failed create may leave its volume behind.

use crate::config::FleetConfig;
use crate::gateway::{RestartMode, RunSpec, RuntimeGateway, VolumeMount};
use crate::naming::{self, API_CONTAINER_PORT, CONFIG_MOUNT, VNC_CONTAINER_PORT};
use crate::registry::InstanceRegistry;
use mt5_common::{BulkReport, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct LifecycleController {
    gateway: Arc<dyn RuntimeGateway>,
    registry: InstanceRegistry,
    config: FleetConfig,
}

impl LifecycleController {
    pub fn new(gateway: Arc<dyn RuntimeGateway>, config: FleetConfig) -> Self {
        Self {
            registry: InstanceRegistry::new(gateway.clone()),
            gateway,
            config,
        }
    }

    /// The run spec for an account. Container and volume names derive from
    /// the account the same way, so re-creating reuses the volume.
    pub fn run_spec(&self, account: &str, vnc_port: u16, api_port: u16) -> Result<RunSpec> {
        let account = naming::normalize_account(account)?;
        Ok(RunSpec {
            image: self.config.image.clone(),
            name: naming::container_name(account),
            port_bindings: vec![
                (VNC_CONTAINER_PORT.to_string(), vnc_port),
                (API_CONTAINER_PORT.to_string(), api_port),
            ],
            env: self.config.instance_env(),
            volumes: vec![VolumeMount {
                volume: naming::volume_name(account),
                target: CONFIG_MOUNT.to_string(),
                read_only: false,
            }],
            restart: RestartMode::UnlessStopped,
            network: Some(self.config.network.clone()),
        })
    }

    #[instrument(skip(self))]
    pub async fn create(&self, account: &str, vnc_port: u16, api_port: u16) -> Result<String> {
        let spec = self.run_spec(account, vnc_port, api_port)?;
        let id = self.gateway.run(&spec).await?;
        info!(container_id = %id, name = %spec.name, "Instance created");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn start(&self, id: &str) -> Result<()> {
        self.gateway.start(id).await?;
        Ok(())
    }

    /// Graceful stop: the runtime forces termination after the grace period.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.gateway.stop(id, Some(self.config.stop_grace)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restart(&self, id: &str) -> Result<()> {
        self.gateway.restart(id, Some(self.config.stop_grace)).await?;
        Ok(())
    }

    /// Stops with the runtime's default timeout, then removes. The first
    /// failing step is reported and the second is not attempted.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.gateway.stop(id, None).await?;
        self.gateway.remove(id).await?;
        info!(container_id = %id, "Instance removed");
        Ok(())
    }

    /// Force-kills every fleet instance in a snapshot of the registry taken
    /// now, one after another, carrying on past failures. Works from the
    /// runtime listing alone, so an instance that cannot be inspected is
    /// still killed.
    #[instrument(skip(self))]
    pub async fn kill_all(&self) -> BulkReport {
        let instances = match self.registry.members().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Kill switch could not enumerate instances");
                return BulkReport::aborted(&e);
            }
        };

        let mut results = Vec::with_capacity(instances.len());
        for instance in instances {
            let result: Result<()> = self.gateway.kill(&instance.id).await.map_err(Into::into);
            if let Err(e) = &result {
                warn!(instance = %instance.name, error = %e, "Kill failed");
            }
            results.push((instance.name, result));
        }

        let report = BulkReport::collect("kill", results);
        info!(
            killed = report.succeeded.len(),
            failed = report.errors.len(),
            "Kill switch finished"
        );
        report
    }
}
