//! In-memory container runtime.
//!
//! Keeps containers in a map and publishes every box port on a single configurable host
//! port, so a local HTTP server can play the part of the sandbox's box service. Used to
//! exercise the manager and the HTTP front door without a Docker daemon.

use crate::sandbox::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, RuntimeError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct MemoryContainer {
    id: String,
    name: String,
    spec: ContainerSpec,
    running: bool,
}

#[derive(Debug, Default)]
struct State {
    containers: Vec<MemoryContainer>,
    next_id: u64,
    failures: HashMap<String, String>,
}

impl State {
    fn find(&mut self, container: &str) -> Result<&mut MemoryContainer, RuntimeError> {
        self.containers
            .iter_mut()
            .find(|c| c.id == container || c.name == container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))
    }

    fn injected(&mut self, op: &str) -> Result<(), RuntimeError> {
        match self.failures.remove(op) {
            Some(message) => Err(RuntimeError::Api(message)),
            None => Ok(()),
        }
    }
}

/// [`ContainerRuntime`] backed by a map
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<State>,
    host_port: u16,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `port` as the host side of every published port
    pub fn with_host_port(port: u16) -> Self {
        Self {
            host_port: port,
            ..Default::default()
        }
    }

    /// Make the next call of `op` (`create`, `start`, `inspect`, `stop`, `remove`, `list`)
    /// fail with `message`
    pub async fn fail_next(&self, op: &str, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(op.to_string(), message.to_string());
    }

    /// Names of all containers, running or not
    pub async fn container_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.containers.iter().map(|c| c.name.clone()).collect()
    }

    pub async fn is_running(&self, container: &str) -> bool {
        let mut state = self.state.lock().await;
        state.find(container).map(|c| c.running).unwrap_or(false)
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create(&self, name: &str, spec: ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        state.injected("create")?;

        if state.containers.iter().any(|c| c.name == name) {
            return Err(RuntimeError::Api(format!(
                "Conflict. The container name {:?} is already in use",
                name
            )));
        }

        state.next_id += 1;
        let id = format!("{:012x}", state.next_id);
        state.containers.push(MemoryContainer {
            id: id.clone(),
            name: name.to_string(),
            spec,
            running: false,
        });
        Ok(id)
    }

    async fn start(&self, container: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.injected("start")?;
        state.find(container)?.running = true;
        Ok(())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerDetails, RuntimeError> {
        let mut state = self.state.lock().await;
        state.injected("inspect")?;
        let host_port = self.host_port.to_string();
        let c = state.find(container)?;

        let host_ports = c
            .spec
            .ports
            .iter()
            .map(|p| {
                let port = if p.host_port == "0" {
                    host_port.clone()
                } else {
                    p.host_port.clone()
                };
                (p.container_port.clone(), vec![port])
            })
            .collect();

        Ok(ContainerDetails {
            id: c.id.clone(),
            image: c.spec.image.clone(),
            env: c.spec.env.clone(),
            labels: c.spec.labels.clone(),
            host_ports,
        })
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.injected("stop")?;
        state.find(container)?.running = false;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.injected("remove")?;
        if state.find(container)?.running {
            return Err(RuntimeError::Api(format!(
                "cannot remove running container {:?}",
                container
            )));
        }
        state
            .containers
            .retain(|c| c.id != container && c.name != container);
        Ok(())
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut state = self.state.lock().await;
        state.injected("list")?;
        Ok(state
            .containers
            .iter()
            .filter(|c| c.spec.labels.get(key).map(String::as_str) == Some(value))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                labels: c.spec.labels.clone(),
            })
            .collect())
    }
}
