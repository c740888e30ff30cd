/// Test utilities: an in-memory gateway and conditional Docker checks.
use crate::gateway::{
    ContainerDetails, ContainerRef, ExecOutput, GatewayError, GatewayResult, ResourceSample,
    RunSpec, RuntimeGateway,
};
use async_trait::async_trait;
use mt5_common::InstanceStatus;
use std::collections::HashMap;
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub fn has_docker() -> bool {
    // Check if docker command exists
    Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Macro to skip tests when requirements aren't met
#[macro_export]
macro_rules! require_docker {
    () => {
        if !$crate::test_utils::has_docker() {
            eprintln!("Test ignored: Docker not available");
            return;
        }
    };
}

/// Scripted container held by [`MockGateway`].
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub host_ports: HashMap<String, u16>,
    pub started_at: Option<String>,
    pub sample: ResourceSample,
    /// argv joined with spaces -> scripted result
    pub exec_results: HashMap<String, ExecOutput>,
}

impl MockContainer {
    pub fn new(name: &str, status: InstanceStatus) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            status,
            host_ports: HashMap::new(),
            started_at: None,
            sample: ResourceSample::default(),
            exec_results: HashMap::new(),
        }
    }

    pub fn running(name: &str) -> Self {
        Self::new(name, InstanceStatus::Running)
    }

    pub fn exited(name: &str) -> Self {
        Self::new(name, InstanceStatus::Exited)
    }

    pub fn with_ports(self, vnc: u16, api: u16) -> Self {
        self.with_vnc_port(vnc).with_api_port(api)
    }

    pub fn with_vnc_port(mut self, port: u16) -> Self {
        self.host_ports.insert("3000/tcp".to_string(), port);
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.host_ports.insert("8001/tcp".to_string(), port);
        self
    }

    pub fn with_started_at(mut self, started_at: &str) -> Self {
        self.started_at = Some(started_at.to_string());
        self
    }

    pub fn with_sample(mut self, sample: ResourceSample) -> Self {
        self.sample = sample;
        self
    }

    pub fn with_exec(mut self, cmd: &[&str], exit_code: i64, output: &[u8]) -> Self {
        self.exec_results.insert(
            cmd.join(" "),
            ExecOutput {
                exit_code,
                output: output.to_vec(),
            },
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub container: String,
    pub path: String,
    pub archive: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    offline: bool,
    next_id: u64,
    /// (operation, container name) -> injected failure
    failures: HashMap<(String, String), GatewayError>,
    calls: Vec<String>,
    runs: Vec<RunSpec>,
    uploads: Vec<RecordedUpload>,
}

/// In-memory [`RuntimeGateway`] that behaves like a small Docker daemon.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a container and returns its full id.
    pub fn add(&self, mut container: MockContainer) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        container.id = format!("{:012x}{}", state.next_id, "c".repeat(52));
        let id = container.id.clone();
        state.containers.push(container);
        id
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Makes `op` ("kill", "stop", "exec", ...) fail for the named container.
    pub fn fail(&self, op: &str, name: &str, err: GatewayError) {
        self.lock()
            .failures
            .insert((op.to_string(), name.to_string()), err);
    }

    pub fn status_of(&self, name: &str) -> Option<InstanceStatus> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.lock().runs.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.lock().uploads.clone()
    }

    /// Resolves like the daemon does: full id, unique id prefix or name.
    /// Records the call and applies offline/injected failures.
    fn enter(&self, op: &str, target: &str) -> GatewayResult<(MutexGuard<'_, MockState>, usize)> {
        let mut state = self.lock();
        if state.offline {
            return Err(GatewayError::Connectivity(
                "error trying to connect: No such file or directory".to_string(),
            ));
        }
        let idx = state
            .containers
            .iter()
            .position(|c| c.name == target || c.id.starts_with(target))
            .ok_or_else(|| GatewayError::NotFound(format!("No such container: {target}")))?;
        let name = state.containers[idx].name.clone();
        state.calls.push(format!("{op} {name}"));
        if let Some(err) = state.failures.get(&(op.to_string(), name)) {
            return Err(err.clone());
        }
        Ok((state, idx))
    }

    fn check_online(&self) -> GatewayResult<MutexGuard<'_, MockState>> {
        let state = self.lock();
        if state.offline {
            return Err(GatewayError::Connectivity(
                "error trying to connect: No such file or directory".to_string(),
            ));
        }
        Ok(state)
    }
}

fn not_running(name: &str) -> GatewayError {
    GatewayError::Api(format!("Container {name} is not running"))
}

#[async_trait]
impl RuntimeGateway for MockGateway {
    async fn ping(&self) -> GatewayResult<()> {
        self.check_online().map(|_| ())
    }

    async fn list(&self, all: bool) -> GatewayResult<Vec<ContainerRef>> {
        let state = self.check_online()?;
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.status.is_running())
            .map(|c| ContainerRef {
                id: c.id.clone(),
                name: c.name.clone(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> GatewayResult<ContainerDetails> {
        let (state, idx) = self.enter("inspect", id)?;
        let c = &state.containers[idx];
        Ok(ContainerDetails {
            id: c.id.clone(),
            name: c.name.clone(),
            status: c.status,
            host_ports: c.host_ports.clone(),
            started_at: c.started_at.clone(),
        })
    }

    async fn run(&self, spec: &RunSpec) -> GatewayResult<String> {
        {
            let mut state = self.check_online()?;
            state.calls.push(format!("run {}", spec.name));
            state.runs.push(spec.clone());
            if let Some(err) = state.failures.get(&("run".to_string(), spec.name.clone())) {
                return Err(err.clone());
            }
            if state.containers.iter().any(|c| c.name == spec.name) {
                return Err(GatewayError::Api(format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    spec.name
                )));
            }
            let taken = state.containers.iter().any(|c| {
                c.status.is_running()
                    && spec
                        .port_bindings
                        .iter()
                        .any(|(_, host)| c.host_ports.values().any(|p| p == host))
            });
            if taken {
                return Err(GatewayError::Api("port is already allocated".to_string()));
            }
        }

        let mut container = MockContainer::running(&spec.name);
        container.host_ports = spec.port_bindings.iter().cloned().collect();
        Ok(self.add(container))
    }

    async fn start(&self, id: &str) -> GatewayResult<()> {
        let (mut state, idx) = self.enter("start", id)?;
        state.containers[idx].status = InstanceStatus::Running;
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Option<Duration>) -> GatewayResult<()> {
        let op = match grace {
            Some(g) => format!("stop({}s)", g.as_secs()),
            None => "stop".to_string(),
        };
        let (mut state, idx) = self.enter("stop", id)?;
        let name = state.containers[idx].name.clone();
        if let Some(last) = state.calls.last_mut() {
            *last = format!("{op} {name}");
        }
        state.containers[idx].status = InstanceStatus::Exited;
        Ok(())
    }

    async fn restart(&self, id: &str, _grace: Option<Duration>) -> GatewayResult<()> {
        let (mut state, idx) = self.enter("restart", id)?;
        state.containers[idx].status = InstanceStatus::Running;
        Ok(())
    }

    async fn remove(&self, id: &str) -> GatewayResult<()> {
        let (mut state, idx) = self.enter("remove", id)?;
        if state.containers[idx].status.is_running() {
            return Err(GatewayError::Api(
                "You cannot remove a running container. Stop the container before attempting removal"
                    .to_string(),
            ));
        }
        state.containers.remove(idx);
        Ok(())
    }

    async fn kill(&self, id: &str) -> GatewayResult<()> {
        let (mut state, idx) = self.enter("kill", id)?;
        if !state.containers[idx].status.is_running() {
            return Err(not_running(&state.containers[idx].name));
        }
        state.containers[idx].status = InstanceStatus::Exited;
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> GatewayResult<ExecOutput> {
        let (state, idx) = self.enter("exec", id)?;
        let c = &state.containers[idx];
        if !c.status.is_running() {
            return Err(not_running(&c.name));
        }
        Ok(c.exec_results
            .get(&cmd.join(" "))
            .cloned()
            .unwrap_or_else(|| ExecOutput {
                exit_code: 1,
                output: b"No such file or directory\n".to_vec(),
            }))
    }

    async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> GatewayResult<()> {
        let (mut state, idx) = self.enter("put_archive", id)?;
        let container = state.containers[idx].name.clone();
        state.uploads.push(RecordedUpload {
            container,
            path: path.to_string(),
            archive,
        });
        Ok(())
    }

    async fn stats(&self, id: &str) -> GatewayResult<ResourceSample> {
        let (state, idx) = self.enter("stats", id)?;
        Ok(state.containers[idx].sample)
    }
}
