use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors reported by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The addressed container does not exist
    #[error("container {0:?} not found")]
    NotFound(String),

    /// Any other runtime API failure
    #[error("{0}")]
    Api(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Port published from the container to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublish {
    /// Container-side port, e.g. `8000/tcp`
    pub container_port: String,
    /// Host interface to bind, e.g. `127.0.0.1`
    pub host_ip: String,
    /// Host port; `"0"` lets the runtime pick a free one
    pub host_port: String,
}

/// Everything the runtime needs to create a container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortPublish>,
}

/// Runtime view of an existing container
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Container port (`8000/tcp`) to the host ports bound for it
    pub host_ports: HashMap<String, Vec<String>>,
}

/// Entry returned when listing containers
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub labels: HashMap<String, String>,
}

/// Narrow lifecycle interface over a container runtime.
///
/// Every operation addressing a single container accepts either its name or its id
/// and reports [`RuntimeError::NotFound`] when it does not exist.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container named `name`, returning its runtime id
    async fn create(&self, name: &str, spec: ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, container: &str) -> Result<(), RuntimeError>;

    async fn inspect(&self, container: &str) -> Result<ContainerDetails, RuntimeError>;

    /// Stop a container. Stopping an already stopped container succeeds.
    async fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, container: &str) -> Result<(), RuntimeError>;

    /// List containers (running or not) carrying label `key=value`
    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;
}
