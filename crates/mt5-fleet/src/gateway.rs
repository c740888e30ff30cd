//! Thin adapter over the container daemon. Every other component talks to the
//! runtime only through [`RuntimeGateway`].

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, HostConfig, PortBinding, PortMap, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use mt5_common::{FleetError, InstanceStatus};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Closed set of gateway failures, so callers match on the kind instead of
/// inspecting messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    Connectivity(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Api(String),
}

impl From<BollardError> for GatewayError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => GatewayError::NotFound(message),
            BollardError::DockerResponseServerError { message, .. } => GatewayError::Api(message),
            e @ (BollardError::RequestTimeoutError
            | BollardError::IOError { .. }
            | BollardError::HyperResponseError { .. }
            | BollardError::HyperLegacyError { .. }) => GatewayError::Connectivity(e.to_string()),
            other => GatewayError::Api(other.to_string()),
        }
    }
}

impl From<GatewayError> for FleetError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Connectivity(msg) => FleetError::Connectivity(msg),
            GatewayError::NotFound(msg) => FleetError::NotFound(msg),
            GatewayError::Api(msg) => FleetError::Runtime(msg),
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

/// Inspected attributes the fleet cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    /// Container port spec (`"3000/tcp"`) to the first bound host port.
    pub host_ports: HashMap<String, u16>,
    /// RFC 3339 start timestamp as reported by the daemon.
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    Never,
    UnlessStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    /// (container port spec, host port)
    pub port_bindings: Vec<(String, u16)>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<VolumeMount>,
    pub restart: RestartMode,
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    /// stdout and stderr, interleaved as received.
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One non-streaming resource counter sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

#[async_trait]
pub trait RuntimeGateway: Send + Sync {
    async fn ping(&self) -> GatewayResult<()>;
    async fn list(&self, all: bool) -> GatewayResult<Vec<ContainerRef>>;
    async fn inspect(&self, id: &str) -> GatewayResult<ContainerDetails>;
    /// Creates and starts a container, returning its id.
    async fn run(&self, spec: &RunSpec) -> GatewayResult<String>;
    async fn start(&self, id: &str) -> GatewayResult<()>;
    /// `None` leaves the grace period to the daemon default.
    async fn stop(&self, id: &str, grace: Option<Duration>) -> GatewayResult<()>;
    async fn restart(&self, id: &str, grace: Option<Duration>) -> GatewayResult<()>;
    async fn remove(&self, id: &str) -> GatewayResult<()>;
    async fn kill(&self, id: &str) -> GatewayResult<()>;
    async fn exec(&self, id: &str, cmd: &[String]) -> GatewayResult<ExecOutput>;
    /// Extracts a tar archive into `path` inside the container.
    async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> GatewayResult<()>;
    async fn stats(&self, id: &str) -> GatewayResult<ResourceSample>;
}

/// [`RuntimeGateway`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct BollardGateway {
    docker: Docker,
}

impl BollardGateway {
    /// Connects with the local defaults (socket or `DOCKER_HOST`) and pings
    /// the daemon, failing if it does not answer.
    pub async fn connect() -> GatewayResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| GatewayError::Connectivity(e.to_string()))?;
        let gateway = Self::from_docker(docker);
        gateway.ping().await?;
        info!("Connected to Docker daemon");
        Ok(gateway)
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn create(&self, spec: &RunSpec) -> GatewayResult<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;
        Ok(created.id)
    }

    async fn pull(&self, image: &str) -> GatewayResult<()> {
        let (repo, tag) = split_image(image);
        let options = CreateImageOptions {
            from_image: repo.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(step) = progress.next().await {
            let step = step?;
            if let Some(status) = step.status {
                debug!(%image, %status, "pull progress");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeGateway for BollardGateway {
    async fn ping(&self) -> GatewayResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::Connectivity(e.to_string()))
    }

    async fn list(&self, all: bool) -> GatewayResult<Vec<ContainerRef>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                Some(ContainerRef { id, name })
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> GatewayResult<ContainerDetails> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(project_inspect(response))
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn run(&self, spec: &RunSpec) -> GatewayResult<String> {
        let id = match self.create(spec).await {
            Ok(id) => id,
            Err(e) if needs_image_pull(&e) => {
                info!(error = %e, "Image not present, pulling");
                self.pull(&spec.image).await.map_err(create_failure)?;
                self.create(spec).await.map_err(create_failure)?
            }
            Err(e) => return Err(create_failure(e)),
        };
        self.docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %id, "Container created and started");
        Ok(id)
    }

    async fn start(&self, id: &str) -> GatewayResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Option<Duration>) -> GatewayResult<()> {
        let options = grace.map(|g| StopContainerOptions {
            t: g.as_secs() as i64,
        });
        match self.docker.stop_container(id, options).await {
            // already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            result => result.map_err(Into::into),
        }
    }

    async fn restart(&self, id: &str, grace: Option<Duration>) -> GatewayResult<()> {
        let options = grace.map(|g| RestartContainerOptions {
            t: g.as_secs() as isize,
        });
        self.docker.restart_container(id, options).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> GatewayResult<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn kill(&self, id: &str) -> GatewayResult<()> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await?;
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> GatewayResult<ExecOutput> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };
        let exec = self.docker.create_exec(id, exec_config).await?;

        let mut output = Vec::new();
        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    output.extend_from_slice(&chunk?.into_bytes());
                }
            }
            StartExecResults::Detached => {}
        }

        let inspected = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            exit_code: inspected.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> GatewayResult<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), Bytes::from(archive))
            .await?;
        Ok(())
    }

    async fn stats(&self, id: &str) -> GatewayResult<ResourceSample> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut samples = self.docker.stats(id, Some(options));
        let stats = samples
            .next()
            .await
            .ok_or_else(|| GatewayError::Api("stats stream closed without a sample".to_string()))??;

        Ok(ResourceSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }
}

fn container_config(spec: &RunSpec) -> Config<String> {
    let exposed_ports = spec
        .port_bindings
        .iter()
        .map(|(port, _)| (port.clone(), HashMap::new()))
        .collect();
    let port_bindings: PortMap = spec
        .port_bindings
        .iter()
        .map(|(port, host)| {
            (
                port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host.to_string()),
                }]),
            )
        })
        .collect();
    let binds = spec
        .volumes
        .iter()
        .map(|v| {
            let mode = if v.read_only { "ro" } else { "rw" };
            format!("{}:{}:{}", v.volume, v.target, mode)
        })
        .collect();
    let restart_policy = match spec.restart {
        RestartMode::Never => RestartPolicyNameEnum::NO,
        RestartMode::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(binds),
            restart_policy: Some(RestartPolicy {
                name: Some(restart_policy),
                maximum_retry_count: None,
            }),
            network_mode: spec.network.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Live port map first, falling back to the bindings declared at creation,
/// which is all a stopped container still carries.
fn project_inspect(response: ContainerInspectResponse) -> ContainerDetails {
    let live = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref());
    let declared = response
        .host_config
        .as_ref()
        .and_then(|host| host.port_bindings.as_ref());

    let mut host_ports = HashMap::new();
    for map in [declared, live].into_iter().flatten() {
        for port in map.keys() {
            if let Some(host) = first_host_port(map, port) {
                host_ports.insert(port.clone(), host);
            }
        }
    }

    let (status, started_at) = match response.state {
        Some(state) => (
            state
                .status
                .map(|s| InstanceStatus::from(s.to_string().as_str()))
                .unwrap_or(InstanceStatus::Unknown),
            state.started_at,
        ),
        None => (InstanceStatus::Unknown, None),
    };

    ContainerDetails {
        id: response.id.unwrap_or_default(),
        name: response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        status,
        host_ports,
        started_at,
    }
}

/// Host port of the first binding for `port`. A missing, empty or non-numeric
/// binding yields `None`.
pub fn first_host_port(map: &PortMap, port: &str) -> Option<u16> {
    map.get(port)?
        .as_ref()?
        .first()?
        .host_port
        .as_deref()?
        .parse()
        .ok()
}

/// Whether a failed create means the image is absent locally.
fn needs_image_pull(err: &GatewayError) -> bool {
    matches!(err, GatewayError::NotFound(message) if message.contains("No such image"))
}

/// Create has no target instance, so its 404s (missing image, missing
/// network) are daemon rejections rather than a missing instance.
fn create_failure(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::NotFound(message) => GatewayError::Api(message),
        other => other,
    }
}

/// Splits `repo[:tag]`, leaving registry ports (`host:5000/img`) intact.
fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}
