mod cleanup;
pub mod docker;
pub mod env;
mod error;
mod health;
pub mod memory;
pub mod runtime;
mod types;

pub use cleanup::{cleanup_sandboxes, CleanupReport};
pub use error::SandboxError;
pub use health::HealthCheck;
pub use runtime::ContainerRuntime;
pub use types::{
    container_name, generate_name, parse_env_entry, CreateSandboxRequest, ManagedSandbox,
    Sandbox, SandboxSpacedName, SandboxSpec, GENERATED_NAME_LEN,
};

use crate::config::SandboxConfig;
use runtime::{ContainerDetails, ContainerSpec, PortPublish};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, debug_span, info, info_span, warn, Instrument, Span};

pub const LABEL_SCOPE: &str = "sandboxd.scope";
pub const LABEL_SPACE: &str = "sandboxd.space";
pub const LABEL_NAME: &str = "sandboxd.name";

/// Port the box service listens on inside every sandbox
pub const BOX_PORT: u16 = 8000;

fn box_port_key() -> String {
    format!("{}/tcp", BOX_PORT)
}

/// Creates, looks up and deletes sandboxes on a container runtime.
///
/// Holds no mutable state: the runtime is the only source of truth, so a manager can be
/// shared freely between tasks. Every container it creates carries its scope label, and
/// containers labelled with another scope are invisible to it.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    health: HealthCheck,
    scope: String,
    span: Span,
}

impl SandboxManager {
    /// Create a new sandbox manager. Its events are recorded under `span`.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        http: reqwest::Client,
        config: &SandboxConfig,
        span: Span,
    ) -> Self {
        let health = HealthCheck::new(
            http,
            config.health_check.interval(),
            config.health_check.timeout(),
        );

        span.in_scope(|| {
            info!(
                "Sandbox manager initialized: scope={}, healthcheck interval={:?} timeout={:?}",
                config.scope,
                config.health_check.interval(),
                config.health_check.timeout()
            )
        });

        Self {
            runtime,
            health,
            scope: config.scope.clone(),
            span,
        }
    }

    /// Create and start a sandbox, returning once its box service is healthy.
    ///
    /// An empty `request.name` gets a generated one. If the health check fails or `cancel`
    /// resolves first, the container is left running for the caller to delete.
    pub async fn create_sandbox<C>(
        &self,
        space: &str,
        mut request: CreateSandboxRequest,
        cancel: C,
    ) -> Result<ManagedSandbox, SandboxError>
    where
        C: Future<Output = ()> + Send,
    {
        if space.is_empty() {
            return Err(SandboxError::EmptySpace);
        }
        if request.name.is_empty() {
            request.name = generate_name();
        }
        let cname = container_name(space, &request.name);

        let span = info_span!(parent: &self.span, "create_sandbox", sandbox = %cname);
        async {
            let spec = self.container_spec(space, &request);

            let id = self
                .runtime
                .create(&cname, spec)
                .await
                .map_err(|source| SandboxError::Runtime {
                    stage: "create",
                    resource: cname.clone(),
                    source,
                })?;

            self.runtime
                .start(&id)
                .await
                .map_err(|source| SandboxError::Runtime {
                    stage: "start",
                    resource: cname.clone(),
                    source,
                })?;

            info!("Started sandbox: {} (id: {})", cname, id);

            let details = self
                .runtime
                .inspect(&id)
                .await
                .map_err(|source| SandboxError::Runtime {
                    stage: "inspect",
                    resource: cname.clone(),
                    source,
                })?;
            let created = to_managed(&cname, details)?;

            self.health
                .wait_until_healthy(created.box_host_port, cancel)
                .await?;

            info!("Sandbox ready: {} (port: {})", cname, created.box_host_port);
            Ok(created)
        }
        .instrument(span)
        .await
    }

    /// Look up a sandbox by `(space, name)`
    pub async fn get_sandbox(
        &self,
        space: &str,
        name: &str,
    ) -> Result<ManagedSandbox, SandboxError> {
        if space.is_empty() {
            return Err(SandboxError::EmptySpace);
        }
        let cname = container_name(space, name);

        let span = debug_span!(parent: &self.span, "get_sandbox", sandbox = %cname);
        async {
            let details = self.inspect_owned(&cname).await?;
            to_managed(&cname, details)
        }
        .instrument(span)
        .await
    }

    /// Stop then remove a sandbox's container.
    ///
    /// Deleting a sandbox that does not exist (or was already deleted) reports not-found.
    pub async fn delete_sandbox(&self, space: &str, name: &str) -> Result<(), SandboxError> {
        if space.is_empty() {
            return Err(SandboxError::EmptySpace);
        }
        let cname = container_name(space, name);

        let span = info_span!(parent: &self.span, "delete_sandbox", sandbox = %cname);
        async {
            self.inspect_owned(&cname).await?;

            self.runtime
                .stop(&cname)
                .await
                .map_err(|e| SandboxError::from_runtime("stop", &cname, e))?;

            self.runtime
                .remove(&cname)
                .await
                .map_err(|e| SandboxError::from_runtime("remove", &cname, e))?;

            info!("Deleted sandbox: {}", cname);
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Every sandbox labelled with this manager's scope, in any space
    pub async fn list_all_sandboxes(&self) -> Result<Vec<SandboxSpacedName>, SandboxError> {
        let span = debug_span!(parent: &self.span, "list_all_sandboxes");
        async {
            let containers = self
                .runtime
                .list_by_label(LABEL_SCOPE, &self.scope)
                .await
                .map_err(|source| SandboxError::Runtime {
                    stage: "list",
                    resource: format!("{}={}", LABEL_SCOPE, self.scope),
                    source,
                })?;

            let refs: Vec<SandboxSpacedName> = containers
                .into_iter()
                .filter_map(|c| {
                    match (c.labels.get(LABEL_SPACE), c.labels.get(LABEL_NAME)) {
                        (Some(space), Some(name)) => Some(SandboxSpacedName {
                            space: space.clone(),
                            name: name.clone(),
                        }),
                        _ => {
                            warn!("Skipping container {} without space/name labels", c.id);
                            None
                        }
                    }
                })
                .collect();

            debug!("Found {} sandboxes in scope", refs.len());
            Ok(refs)
        }
        .instrument(span)
        .await
    }

    fn container_spec(&self, space: &str, request: &CreateSandboxRequest) -> ContainerSpec {
        ContainerSpec {
            image: request.spec.image.clone(),
            env: request
                .spec
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            labels: HashMap::from([
                (LABEL_SCOPE.to_string(), self.scope.clone()),
                (LABEL_SPACE.to_string(), space.to_string()),
                (LABEL_NAME.to_string(), request.name.clone()),
            ]),
            ports: vec![PortPublish {
                container_port: box_port_key(),
                host_ip: "127.0.0.1".to_string(),
                host_port: "0".to_string(),
            }],
        }
    }

    /// Inspect a container, hiding it when it belongs to another scope
    async fn inspect_owned(&self, cname: &str) -> Result<ContainerDetails, SandboxError> {
        let details = self
            .runtime
            .inspect(cname)
            .await
            .map_err(|e| SandboxError::from_runtime("inspect", cname, e))?;

        if details.labels.get(LABEL_SCOPE) != Some(&self.scope) {
            debug!("Container {} is outside scope {}", cname, self.scope);
            return Err(SandboxError::NotFound {
                resource: cname.to_string(),
            });
        }
        Ok(details)
    }
}

/// Read a container back as a sandbox
fn to_managed(cname: &str, details: ContainerDetails) -> Result<ManagedSandbox, SandboxError> {
    let invalid = |reason: String| SandboxError::InvalidContainer {
        resource: cname.to_string(),
        reason,
    };

    let host_port = details
        .host_ports
        .get(&box_port_key())
        .and_then(|ports| ports.first())
        .ok_or_else(|| invalid(format!("no host port bound for {}", box_port_key())))?;
    let box_host_port = host_port.parse::<u16>().map_err(|e| {
        invalid(format!(
            "converting host port {:?} to a port number: {}",
            host_port, e
        ))
    })?;

    let env = details
        .env
        .iter()
        .filter_map(|entry| parse_env_entry(entry))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Ok(ManagedSandbox {
        sandbox: Sandbox {
            name: details.labels.get(LABEL_NAME).cloned().unwrap_or_default(),
            uid: details.id,
            spec: SandboxSpec {
                image: details.image,
                env,
            },
        },
        box_host_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthCheckConfig;
    use memory::MemoryRuntime;

    fn test_config(scope: &str) -> SandboxConfig {
        SandboxConfig {
            scope: scope.to_string(),
            health_check: HealthCheckConfig {
                interval_ms: 10,
                timeout_ms: 2_000,
            },
            ..Default::default()
        }
    }

    fn manager(runtime: Arc<MemoryRuntime>, scope: &str) -> SandboxManager {
        SandboxManager::new(
            runtime,
            reqwest::Client::new(),
            &test_config(scope),
            info_span!("sandbox_manager", scope = %scope),
        )
    }

    fn details(labels: &[(&str, &str)], ports: &[(&str, &str)]) -> ContainerDetails {
        ContainerDetails {
            id: "abc123".to_string(),
            image: "box".to_string(),
            env: vec!["FOO=bar".to_string(), "A=B=c".to_string(), "junk".to_string()],
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            host_ports: ports
                .iter()
                .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
                .collect(),
        }
    }

    #[test]
    fn test_to_managed() {
        let d = details(&[(LABEL_NAME, "abc")], &[("8000/tcp", "49153")]);
        let managed = to_managed("default.abc", d).unwrap();
        assert_eq!(managed.box_host_port, 49153);
        assert_eq!(managed.sandbox.name, "abc");
        assert_eq!(managed.sandbox.uid, "abc123");
        assert_eq!(managed.sandbox.spec.env.len(), 2);
        assert_eq!(managed.sandbox.spec.env["A"], "B=c");
        assert_eq!(managed.box_base_url(), "http://127.0.0.1:49153");
    }

    #[test]
    fn test_to_managed_bad_port() {
        let d = details(&[(LABEL_NAME, "abc")], &[("8000/tcp", "not-a-port")]);
        let err = to_managed("default.abc", d).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidContainer { .. }));

        let d = details(&[(LABEL_NAME, "abc")], &[]);
        assert!(to_managed("default.abc", d).is_err());
    }

    #[tokio::test]
    async fn test_empty_space_rejected() {
        let m = manager(Arc::new(MemoryRuntime::new()), "test");
        let req = CreateSandboxRequest::default();
        assert!(matches!(
            m.create_sandbox("", req, std::future::pending()).await,
            Err(SandboxError::EmptySpace)
        ));
        assert!(matches!(
            m.get_sandbox("", "abc").await,
            Err(SandboxError::EmptySpace)
        ));
        assert!(matches!(
            m.delete_sandbox("", "abc").await,
            Err(SandboxError::EmptySpace)
        ));
    }

    #[tokio::test]
    async fn test_create_failure_names_stage_and_skips_healthcheck() {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.fail_next("start", "no such image").await;
        let m = manager(runtime.clone(), "test");

        let req = CreateSandboxRequest {
            name: "abc".to_string(),
            spec: SandboxSpec {
                image: "box".to_string(),
                ..Default::default()
            },
        };
        let err = m
            .create_sandbox("default", req, std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("start:"), "{}", err);
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_container_spec_labels_and_port() {
        let m = manager(Arc::new(MemoryRuntime::new()), "scope-a");
        let req = CreateSandboxRequest {
            name: "abc".to_string(),
            spec: SandboxSpec {
                image: "box".to_string(),
                env: HashMap::from([("K".to_string(), "v".to_string())]),
            },
        };
        let spec = m.container_spec("default", &req);
        assert_eq!(spec.labels[LABEL_SCOPE], "scope-a");
        assert_eq!(spec.labels[LABEL_SPACE], "default");
        assert_eq!(spec.labels[LABEL_NAME], "abc");
        assert_eq!(spec.env, vec!["K=v".to_string()]);
        assert_eq!(spec.ports.len(), 1);
        assert_eq!(spec.ports[0].container_port, "8000/tcp");
        assert_eq!(spec.ports[0].host_ip, "127.0.0.1");
        assert_eq!(spec.ports[0].host_port, "0");
    }
}
