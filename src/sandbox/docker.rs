use crate::sandbox::env::{endpoint_from_env, DockerEndpoint, EnvironmentResolver};
use crate::sandbox::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, RuntimeError,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use bollard::Docker;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// How the client reaches the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    Unix(String),
    Http(String),
    Tls { addr: String, cert_dir: PathBuf },
}

/// Pick the transport for an endpoint, the way the docker CLI reads `DOCKER_HOST`
fn transport(endpoint: &DockerEndpoint) -> Result<Transport> {
    let host = endpoint.host.as_str();

    if host.starts_with("unix://") {
        return Ok(Transport::Unix(host.to_string()));
    }

    let plain = host.starts_with("tcp://") || host.starts_with("http://");
    if host.starts_with("https://") || (plain && endpoint.tls_verify) {
        let cert_dir = endpoint.cert_path.as_ref().ok_or_else(|| {
            anyhow!(
                "TLS verification is enabled for {} but no certificate directory is set",
                host
            )
        })?;
        return Ok(Transport::Tls {
            addr: host.to_string(),
            cert_dir: PathBuf::from(cert_dir),
        });
    }

    if plain {
        return Ok(Transport::Http(host.to_string()));
    }

    bail!("Unsupported docker host: {}", host)
}

/// Docker-backed [`ContainerRuntime`]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// `DOCKER_HOST` (with `DOCKER_TLS_VERIFY` and `DOCKER_CERT_PATH`) is honoured when set;
    /// otherwise the endpoint of the current docker CLI context is asked from `resolver`,
    /// falling back to the local defaults.
    pub async fn connect(resolver: &dyn EnvironmentResolver) -> Result<Self> {
        Self::connect_to(endpoint_from_env(|key| std::env::var(key).ok()), resolver).await
    }

    /// Connect to `explicit` when given, else to whatever `resolver` finds
    pub async fn connect_to(
        explicit: Option<DockerEndpoint>,
        resolver: &dyn EnvironmentResolver,
    ) -> Result<Self> {
        let endpoint = match explicit {
            Some(endpoint) => Some(endpoint),
            None => match resolver.resolve().await {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("Failed to resolve docker context, using local defaults: {:#}", e);
                    None
                }
            },
        };

        let client = match &endpoint {
            Some(endpoint) => Self::connect_endpoint(endpoint)?,
            None => Docker::connect_with_local_defaults()
                .context("Failed to connect to Docker daemon")?,
        };

        let client = client
            .negotiate_version()
            .await
            .context("Failed to negotiate Docker API version")?;

        client.ping().await.context("Docker ping failed")?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    fn connect_endpoint(endpoint: &DockerEndpoint) -> Result<Docker> {
        let docker = match transport(endpoint)? {
            #[cfg(unix)]
            Transport::Unix(path) => {
                debug!("Connecting to Docker over unix socket {}", path);
                Docker::connect_with_unix(
                    &path,
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            #[cfg(not(unix))]
            Transport::Unix(path) => bail!("Unix sockets are not available here: {}", path),
            Transport::Http(addr) => {
                debug!("Connecting to Docker over http at {}", addr);
                Docker::connect_with_http(
                    &addr,
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            Transport::Tls { addr, cert_dir } => {
                debug!(
                    "Connecting to Docker over TLS at {} (certs: {})",
                    addr,
                    cert_dir.display()
                );
                Docker::connect_with_ssl(
                    &addr,
                    &cert_dir.join("key.pem"),
                    &cert_dir.join("cert.pem"),
                    &cert_dir.join("ca.pem"),
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
        };

        docker.with_context(|| format!("Failed to connect to Docker at {}", endpoint.host))
    }

    /// Pull an image from registry if not present
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.client.inspect_image(image).await.is_ok() {
            debug!("Image already exists: {}", image);
            return Ok(());
        }

        info!("Pulling Docker image: {}", image);

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| RuntimeError::Api(format!("pull {}: {}", image, e)))?;
        }

        info!("Successfully pulled Docker image: {}", image);
        Ok(())
    }
}

/// Map a bollard error, turning HTTP 404 into [`RuntimeError::NotFound`]
fn map_err(container: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(container.to_string()),
        other => RuntimeError::Api(other.to_string()),
    }
}

/// Stopping an already stopped container (304) is not a failure
fn stop_result(
    container: &str,
    result: Result<(), bollard::errors::Error>,
) -> Result<(), RuntimeError> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(e) => Err(map_err(container, e)),
    }
}

fn container_details(response: ContainerInspectResponse) -> ContainerDetails {
    let config = response.config.unwrap_or_default();
    let host_ports = response
        .network_settings
        .and_then(|n| n.ports)
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| {
            let hosts = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|b| b.host_port)
                .collect();
            (port, hosts)
        })
        .collect();

    ContainerDetails {
        id: response.id.unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        labels: config.labels.unwrap_or_default(),
        host_ports,
    }
}

fn host_config(spec: &ContainerSpec) -> HostConfig {
    let port_bindings = spec
        .ports
        .iter()
        .map(|p| {
            (
                p.container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: Some(p.host_ip.clone()),
                    host_port: Some(p.host_port.clone()),
                }]),
            )
        })
        .collect::<HashMap<_, _>>();

    HostConfig {
        port_bindings: Some(port_bindings),
        publish_all_ports: Some(true),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, name: &str, spec: ContainerSpec) -> Result<String, RuntimeError> {
        self.pull_image(&spec.image).await?;

        let exposed_ports = spec
            .ports
            .iter()
            .map(|p| (p.container_port.clone(), HashMap::new()))
            .collect::<HashMap<_, _>>();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config(&spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        debug!("Created container: {} (id: {})", name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(container, e))
    }

    async fn inspect(&self, container: &str) -> Result<ContainerDetails, RuntimeError> {
        let response = self
            .client
            .inspect_container(container, Some(InspectContainerOptions { size: false }))
            .await
            .map_err(|e| map_err(container, e))?;

        Ok(container_details(response))
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        stop_result(container, self.client.stop_container(container, None).await)
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        self.client
            .remove_container(container, None)
            .await
            .map_err(|e| map_err(container, e))
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}={}", key, value)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::env::fake::StaticResolver;
    use crate::sandbox::runtime::PortPublish;
    use bollard::models::{ContainerConfig, NetworkSettings};
    use mockito::Matcher;

    fn endpoint(host: &str, tls_verify: bool, cert_path: Option<&str>) -> DockerEndpoint {
        DockerEndpoint {
            host: host.to_string(),
            cert_path: cert_path.map(String::from),
            tls_verify,
        }
    }

    /// Runtime talking plain HTTP to a mock daemon
    fn runtime_for(server: &mockito::ServerGuard) -> DockerRuntime {
        let client =
            Docker::connect_with_http(&server.host_with_port(), 5, bollard::API_DEFAULT_VERSION)
                .unwrap();
        DockerRuntime { client }
    }

    async fn mock_daemon_handshake(
        server: &mut mockito::ServerGuard,
    ) -> (mockito::Mock, mockito::Mock) {
        let version = server
            .mock("GET", Matcher::Regex(r"/version$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ApiVersion":"1.43","Version":"24.0.7"}"#)
            .expect_at_least(1)
            .create_async()
            .await;
        let ping = server
            .mock("GET", Matcher::Regex(r"/_ping$".to_string()))
            .with_status(200)
            .with_body("OK")
            .expect_at_least(1)
            .create_async()
            .await;
        (version, ping)
    }

    #[test]
    fn test_host_config_binds_loopback_any_port() {
        let spec = ContainerSpec {
            image: "box".to_string(),
            ports: vec![PortPublish {
                container_port: "8000/tcp".to_string(),
                host_ip: "127.0.0.1".to_string(),
                host_port: "0".to_string(),
            }],
            ..Default::default()
        };

        let host_config = host_config(&spec);
        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings.get("8000/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding.len(), 1);
        assert_eq!(binding[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding[0].host_port.as_deref(), Some("0"));
        assert_eq!(host_config.publish_all_ports, Some(true));
    }

    #[test]
    fn test_map_err_not_found() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert!(map_err("default.abc", err).is_not_found());

        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        let mapped = map_err("default.abc", err);
        assert!(!mapped.is_not_found());
        assert!(mapped.to_string().contains("boom"));
    }

    #[test]
    fn test_transport_selection() {
        assert_eq!(
            transport(&endpoint("unix:///var/run/docker.sock", true, None)).unwrap(),
            Transport::Unix("unix:///var/run/docker.sock".to_string())
        );
        assert_eq!(
            transport(&endpoint("tcp://10.0.0.5:2375", false, None)).unwrap(),
            Transport::Http("tcp://10.0.0.5:2375".to_string())
        );
        assert_eq!(
            transport(&endpoint("tcp://10.0.0.5:2376", true, Some("/certs"))).unwrap(),
            Transport::Tls {
                addr: "tcp://10.0.0.5:2376".to_string(),
                cert_dir: PathBuf::from("/certs"),
            }
        );
        assert!(matches!(
            transport(&endpoint("https://docker.example:2376", false, Some("/certs"))).unwrap(),
            Transport::Tls { .. }
        ));

        // Verification without certificates cannot be honoured
        assert!(transport(&endpoint("tcp://10.0.0.5:2376", true, None)).is_err());
        assert!(transport(&endpoint("ssh://me@docker.example", false, None)).is_err());
    }

    #[tokio::test]
    async fn test_connect_explicit_tcp_host() {
        let mut server = mockito::Server::new_async().await;
        let (version, ping) = mock_daemon_handshake(&mut server).await;

        let explicit = endpoint(&format!("tcp://{}", server.host_with_port()), false, None);
        // Never consulted while a host is given
        let resolver = StaticResolver(Some(endpoint(
            "unix:///nonexistent/docker.sock",
            false,
            None,
        )));

        DockerRuntime::connect_to(Some(explicit), &resolver)
            .await
            .unwrap();
        version.assert_async().await;
        ping.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_resolved_context() {
        let mut server = mockito::Server::new_async().await;
        let (version, ping) = mock_daemon_handshake(&mut server).await;

        let resolver = StaticResolver(Some(endpoint(
            &format!("tcp://{}", server.host_with_port()),
            false,
            None,
        )));

        DockerRuntime::connect_to(None, &resolver).await.unwrap();
        version.assert_async().await;
        ping.assert_async().await;
    }

    #[tokio::test]
    async fn test_pull_image_when_missing() {
        let mut server = mockito::Server::new_async().await;
        let inspect = server
            .mock("GET", Matcher::Regex(r"/images/box/json$".to_string()))
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"No such image: box"}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", Matcher::Regex(r"/images/create\?.*fromImage=box".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{\"status\":\"Pulling from library/box\"}\n{\"status\":\"Download complete\"}\n")
            .create_async()
            .await;

        runtime_for(&server).pull_image("box").await.unwrap();
        inspect.assert_async().await;
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn test_pull_image_skipped_when_present() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"/images/box/json$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Id":"sha256:0123456789ab"}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", Matcher::Regex(r"/images/create".to_string()))
            .expect(0)
            .create_async()
            .await;

        runtime_for(&server).pull_image("box").await.unwrap();
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn test_stop_already_stopped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex(r"/containers/default\.idle/stop".to_string()))
            .with_status(304)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex(r"/containers/default\.gone/stop".to_string()))
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"No such container: default.gone"}"#)
            .create_async()
            .await;

        let runtime = runtime_for(&server);
        runtime.stop("default.idle").await.unwrap();
        assert!(runtime.stop("default.gone").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_stop_result() {
        let not_modified = bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            message: String::new(),
        };
        assert!(stop_result("default.abc", Err(not_modified)).is_ok());

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        let err = stop_result("default.abc", Err(conflict)).unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_container_details_from_inspect() {
        let response = ContainerInspectResponse {
            id: Some("abc123".to_string()),
            config: Some(ContainerConfig {
                image: Some("box:latest".to_string()),
                env: Some(vec!["FOO=bar".to_string()]),
                labels: Some(HashMap::from([(
                    "sandboxd.name".to_string(),
                    "abc".to_string(),
                )])),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(HashMap::from([
                    (
                        "8000/tcp".to_string(),
                        Some(vec![PortBinding {
                            host_ip: Some("127.0.0.1".to_string()),
                            host_port: Some("49153".to_string()),
                        }]),
                    ),
                    ("9000/tcp".to_string(), None),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = container_details(response);
        assert_eq!(details.id, "abc123");
        assert_eq!(details.image, "box:latest");
        assert_eq!(details.env, vec!["FOO=bar".to_string()]);
        assert_eq!(details.labels["sandboxd.name"], "abc");
        assert_eq!(details.host_ports["8000/tcp"], vec!["49153".to_string()]);
        assert!(details.host_ports["9000/tcp"].is_empty());

        let empty = container_details(ContainerInspectResponse::default());
        assert!(empty.id.is_empty());
        assert!(empty.host_ports.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker daemon
    async fn test_connect_local_daemon() {
        let resolver = crate::sandbox::env::CliEnvironmentResolver::default();
        assert!(DockerRuntime::connect(&resolver).await.is_ok());
    }
}
